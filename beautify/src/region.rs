/// The lexical region the recognizer currently attributes to each byte.
///
/// Exactly one region is active at a time. A region may carry an inner quote
/// (tracked separately by the engine) used only for whitespace decisions
/// inside comments; it never changes the outer region.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Region {
  Code,
  /// `//`-style, `#`-at-line-start and markup-embedded line comments.
  LineComment,
  /// `/* ... */`
  BlockStar,
  /// `/+ ... +/`
  BlockPlus,
  /// Markup text and tags outside any embedded script.
  Markup,
  /// Transient: a `<` was just seen inside markup; the next byte decides
  /// between a processing instruction and plain tag text.
  MarkupAngle,
  Regex,
  StringSingle,
  StringDouble,
  StringBacktick,
}

impl Region {
  pub fn from_quote(b: u8) -> Region {
    match b {
      b'\'' => Region::StringSingle,
      b'"' => Region::StringDouble,
      b'`' => Region::StringBacktick,
      _ => unreachable!("not a quote byte"),
    }
  }

  pub fn is_comment(self) -> bool {
    matches!(self, Region::LineComment | Region::BlockStar | Region::BlockPlus)
  }

  pub fn is_block_comment(self) -> bool {
    matches!(self, Region::BlockStar | Region::BlockPlus)
  }

  pub fn is_comment_or_markup(self) -> bool {
    self.is_comment() || self == Region::Markup
  }

  pub fn is_string_or_regex(self) -> bool {
    matches!(
      self,
      Region::Regex | Region::StringSingle | Region::StringDouble | Region::StringBacktick
    )
  }

  /// Whether bytes of this region survive into the output under strip mode.
  /// Only comments are removed.
  pub fn written_in_strip(self) -> bool {
    !self.is_comment()
  }

  /// Whether a line starting inside this region is re-indented. Code lines
  /// and block-comment continuation lines are; strings, markup and line
  /// comments keep their own layout.
  pub fn indents_at_line_start(self) -> bool {
    matches!(self, Region::Code | Region::BlockStar | Region::BlockPlus)
  }

  /// The second byte of the two-step block-comment closer (`*/` or `+/`).
  pub fn block_marker(self) -> Option<u8> {
    match self {
      Region::BlockStar => Some(b'*'),
      Region::BlockPlus => Some(b'+'),
      _ => None,
    }
  }

  /// The single byte that ends (or, for markup, advances) this region.
  pub fn close_byte(self) -> Option<u8> {
    match self {
      Region::LineComment => Some(b'\n'),
      Region::Markup => Some(b'<'),
      Region::MarkupAngle => Some(b'%'),
      Region::Regex => Some(b'/'),
      Region::StringSingle => Some(b'\''),
      Region::StringDouble => Some(b'"'),
      Region::StringBacktick => Some(b'`'),
      _ => None,
    }
  }

  /// Backslash escaping applies in every region except backtick strings.
  pub fn escapes_backslash(self) -> bool {
    self != Region::StringBacktick
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn comments_are_stripped_and_everything_else_survives() {
    assert!(!Region::LineComment.written_in_strip());
    assert!(!Region::BlockStar.written_in_strip());
    assert!(!Region::BlockPlus.written_in_strip());
    assert!(Region::Code.written_in_strip());
    assert!(Region::Markup.written_in_strip());
    assert!(Region::StringDouble.written_in_strip());
  }

  #[test]
  fn close_bytes_match_delimiters() {
    assert_eq!(Region::StringSingle.close_byte(), Some(b'\''));
    assert_eq!(Region::Regex.close_byte(), Some(b'/'));
    assert_eq!(Region::BlockStar.close_byte(), None);
  }
}
