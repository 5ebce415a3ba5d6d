use std::fmt;
use std::fmt::Display;
use std::fmt::Formatter;

/// Diagnostic severity.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Severity {
  Error,
  Warning,
}

impl Severity {
  pub const fn as_str(&self) -> &'static str {
    match self {
      Severity::Error => "error",
      Severity::Warning => "warning",
    }
  }
}

impl Display for Severity {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A stable classification of the diagnostics produced by the engine.
///
/// Diagnostic codes (prefix `BY`) are assigned per variant and are stable:
/// - `BY0001`: [`DiagKind::UnterminatedBlockComment`]
/// - `BY0002`: [`DiagKind::UnterminatedString`]
/// - `BY0003`: [`DiagKind::UnterminatedInstruction`]
/// - `BY0004`: [`DiagKind::UnterminatedScript`]
/// - `BY0005`: [`DiagKind::MissingClosers`]
/// - `BY0006`: [`DiagKind::MismatchedCloser`]
/// - `BY0007`: [`DiagKind::CommentContinuation`]
/// - `BY0008`: [`DiagKind::InstructionInQuote`]
/// - `BY0009`: [`DiagKind::ScriptEndInQuote`]
/// - `BY0010`: [`DiagKind::ControlZStripped`]
/// - `BY0011`: [`DiagKind::LineTooLong`]
/// - `BY0012`: [`DiagKind::NestingTooDeep`]
/// - `BY0013`: [`DiagKind::ArchiveInMarkup`]
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum DiagKind {
  UnterminatedBlockComment { closer: &'static str },
  UnterminatedString { delimiter: u8 },
  UnterminatedInstruction { punct: u8 },
  UnterminatedScript,
  MissingClosers { tags: Vec<u8> },
  MismatchedCloser { closer: u8, context: String },
  CommentContinuation { context: String },
  InstructionInQuote { punct: u8, context: String },
  ScriptEndInQuote { context: String },
  ControlZStripped,
  LineTooLong { limit: usize },
  NestingTooDeep { limit: usize },
  ArchiveInMarkup,
}

impl DiagKind {
  /// Stable diagnostic code for this variant.
  pub fn code(&self) -> &'static str {
    match self {
      DiagKind::UnterminatedBlockComment { .. } => "BY0001",
      DiagKind::UnterminatedString { .. } => "BY0002",
      DiagKind::UnterminatedInstruction { .. } => "BY0003",
      DiagKind::UnterminatedScript => "BY0004",
      DiagKind::MissingClosers { .. } => "BY0005",
      DiagKind::MismatchedCloser { .. } => "BY0006",
      DiagKind::CommentContinuation { .. } => "BY0007",
      DiagKind::InstructionInQuote { .. } => "BY0008",
      DiagKind::ScriptEndInQuote { .. } => "BY0009",
      DiagKind::ControlZStripped => "BY0010",
      DiagKind::LineTooLong { .. } => "BY0011",
      DiagKind::NestingTooDeep { .. } => "BY0012",
      DiagKind::ArchiveInMarkup => "BY0013",
    }
  }

  pub fn severity(&self) -> Severity {
    match self {
      DiagKind::UnterminatedBlockComment { .. }
      | DiagKind::UnterminatedString { .. }
      | DiagKind::UnterminatedInstruction { .. }
      | DiagKind::UnterminatedScript
      | DiagKind::MissingClosers { .. }
      | DiagKind::LineTooLong { .. }
      | DiagKind::NestingTooDeep { .. } => Severity::Error,
      DiagKind::MismatchedCloser { .. }
      | DiagKind::CommentContinuation { .. }
      | DiagKind::InstructionInQuote { .. }
      | DiagKind::ScriptEndInQuote { .. }
      | DiagKind::ControlZStripped
      | DiagKind::ArchiveInMarkup => Severity::Warning,
    }
  }

  /// Human-readable message describing this diagnostic.
  pub fn message(&self) -> String {
    match self {
      DiagKind::UnterminatedBlockComment { closer } => {
        format!("{} missing at end of file", closer)
      }
      DiagKind::UnterminatedString { delimiter } => {
        format!("{} missing at end of file", char::from(*delimiter))
      }
      DiagKind::UnterminatedInstruction { punct } => {
        format!("{}> missing at end of file", char::from(*punct))
      }
      DiagKind::UnterminatedScript => "</script> missing at end of file".into(),
      DiagKind::MissingClosers { tags } => {
        let list = tags
          .iter()
          .map(|&t| char::from(t).to_string())
          .collect::<Vec<_>>()
          .join(", ");
        format!("{} missing at end of file", list)
      }
      DiagKind::MismatchedCloser { closer, context } => {
        format!(
          "matching opening bracket for '{}' not found\n{}{}...",
          char::from(*closer),
          context,
          char::from(*closer),
        )
      }
      DiagKind::CommentContinuation { context } => {
        format!(
          "backslash followed by space(s) detected at end of comment\n\
           assuming this comment is meant to continue at the next line\n{}",
          context,
        )
      }
      DiagKind::InstructionInQuote { punct, context } => {
        format!(
          "'{}>' found in string or comment (ignored)\n{}>...",
          char::from(*punct),
          context,
        )
      }
      DiagKind::ScriptEndInQuote { context } => {
        format!("'</script>' found in string or comment (ignored)\n{}>...", context)
      }
      DiagKind::ControlZStripped => "<CTRL>-Z and everything after it is stripped".into(),
      DiagKind::LineTooLong { limit } => format!("line longer than {} bytes", limit),
      DiagKind::NestingTooDeep { limit } => format!("more than {} open levels", limit),
      DiagKind::ArchiveInMarkup => {
        "archive trailer cannot be combined with markup mode (ignored)".into()
      }
    }
  }
}

/// A single diagnostic, positioned within the current file when the engine
/// knows where it arose.
#[derive(Clone, Debug)]
pub struct Diagnostic {
  pub kind: DiagKind,
  pub pos: Option<(u32, usize)>,
}

impl Diagnostic {
  pub fn new(kind: DiagKind) -> Diagnostic {
    Diagnostic { kind, pos: None }
  }

  pub fn at(kind: DiagKind, line: u32, col: usize) -> Diagnostic {
    Diagnostic {
      kind,
      pos: Some((line, col)),
    }
  }

  /// Renders the fully formatted message handed to the sink.
  pub fn render(&self, name: &str) -> String {
    match self.pos {
      Some((line, col)) => format!(
        "{}({},{}): {}[{}]: {}",
        name,
        line,
        col,
        self.kind.severity(),
        self.kind.code(),
        self.kind.message(),
      ),
      None => format!(
        "{}: {}[{}]: {}",
        name,
        self.kind.severity(),
        self.kind.code(),
        self.kind.message(),
      ),
    }
  }
}

/// Receives fully formatted diagnostic and progress messages. The core never
/// writes to a stream directly; the caller decides where messages go.
pub trait MessageSink {
  fn emit(&mut self, message: &str);
}

impl<F: FnMut(&str)> MessageSink for F {
  fn emit(&mut self, message: &str) {
    self(message)
  }
}

/// Per-file outcome flags returned by the engine.
#[derive(Copy, Clone, Default, Eq, PartialEq, Debug)]
pub struct Status {
  /// Output differs from input.
  pub changed: bool,
  /// A fatal condition was diagnosed; output should be discarded unless
  /// force mode is set.
  pub fatal: bool,
  /// At least one warning was diagnosed.
  pub warned: bool,
}

impl Status {
  pub fn merge(&mut self, other: Status) {
    self.changed |= other.changed;
    self.fatal |= other.fatal;
    self.warned |= other.warned;
  }
}

/// Worst outcome of a whole batch, folded from the per-file statuses.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SessionResult {
  Success,
  SuccessWithChanges,
  WarningsOnly,
  Failed,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn renders_position_and_code() {
    let d = Diagnostic::at(DiagKind::UnterminatedBlockComment { closer: "*/" }, 3, 7);
    assert_eq!(d.render("x.c"), "x.c(3,7): error[BY0001]: */ missing at end of file");
  }

  #[test]
  fn renders_without_position() {
    let d = Diagnostic::new(DiagKind::ControlZStripped);
    assert_eq!(
      d.render("x.htm"),
      "x.htm: warning[BY0010]: <CTRL>-Z and everything after it is stripped"
    );
  }

  #[test]
  fn missing_closers_lists_every_tag() {
    let kind = DiagKind::MissingClosers {
      tags: vec![b')', b'}'],
    };
    assert_eq!(kind.message(), "), } missing at end of file");
  }
}
