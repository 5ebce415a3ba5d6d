//! The streaming beautify driver.
//!
//! A [`Beautifier`] is constructed once by the caller and reused for every
//! file of a batch; all per-file state is reset at the start of
//! [`Beautifier::beautify`]. The driver pulls one byte at a time (with one
//! byte of lookahead for line-ending fusion), classifies it against the
//! current lexical region, feeds structural bytes through the indent stack
//! and defers whitespace decisions to the active [`SpacePolicy`]. Output is
//! accumulated per logical line and flushed — possibly split across several
//! physical lines — on every newline.

use crate::cfg::FileOptions;
use crate::cfg::TabStop;
use crate::char::ByteFilter;
use crate::char::BODY_PENDING_TAGS;
use crate::char::BRACE_TIGHT;
use crate::char::HSPACE;
use crate::char::OPERATOR_CONTEXT;
use crate::char::OPERATOR_RUN;
use crate::char::PSEUDO_TAGS;
use crate::char::REGEX_PRECEDERS;
use crate::char::SPLIT_SKIP_TAGS;
use crate::char::STRIP_TIGHT;
use crate::char::TERNARY_TAGS;
use crate::char::TOKEN_BOUNDARY;
use crate::error::DiagKind;
use crate::error::Diagnostic;
use crate::error::MessageSink;
use crate::error::SessionResult;
use crate::error::Severity;
use crate::error::Status;
use crate::line::LineWriter;
use crate::region::Region;
use crate::space::SpacePolicy;
use crate::stack::IndentStack;
use crate::stack::Level;
use memchr::memmem;

/// Historic end-of-text marker; everything after it is copied verbatim.
const CTRL_Z: u8 = 0x1a;

const BANNER: &str = concat!(
  "beautify ",
  env!("CARGO_PKG_VERSION"),
  ": heuristic source-code beautifier"
);

/// Byte source with one byte of pushback. `\r\n` and lone `\r` are both
/// fused into a single `\n`; the byte after a lone `\r` is re-queued.
struct Cursor<'a> {
  src: &'a [u8],
  pos: usize,
  pending: Option<u8>,
}

impl<'a> Cursor<'a> {
  fn new(src: &'a [u8]) -> Cursor<'a> {
    Cursor {
      src,
      pos: 0,
      pending: None,
    }
  }

  fn bump(&mut self) -> Option<u8> {
    let b = *self.src.get(self.pos)?;
    self.pos += 1;
    Some(b)
  }

  /// Next byte with line-ending fusion applied.
  fn next(&mut self) -> Option<u8> {
    let c = match self.pending.take() {
      Some(b) => b,
      None => self.bump()?,
    };
    if c == b'\r' {
      match self.bump() {
        Some(b'\n') | None => {}
        Some(other) => self.pending = Some(other),
      }
      return Some(b'\n');
    }
    Some(c)
  }

  /// Next byte without fusion, for the verbatim tail after an end-of-text
  /// marker.
  fn next_raw(&mut self) -> Option<u8> {
    match self.pending.take() {
      Some(b) => Some(b),
      None => self.bump(),
    }
  }

  fn copy_rest(&mut self, out: &mut Vec<u8>) {
    if let Some(b) = self.pending.take() {
      out.push(b);
    }
    out.extend_from_slice(&self.src[self.pos..]);
    self.pos = self.src.len();
  }
}

/// What the main loop should do after dispatching one byte.
enum Flow {
  /// Fetch the next byte from the cursor.
  Next,
  /// A handler consumed lookahead; dispatch this byte next.
  Redispatch(u8),
}

/// A capacity guard tripped; processing of the file stops.
enum Halt {
  LineTooLong,
  NestingTooDeep,
}

type Step = Result<Flow, Halt>;

/// The per-file engine state plus the session-spanning diagnostic state
/// (banner, worst severity). Reset at the start of every file; never shared
/// between two files' processing.
pub struct Beautifier {
  // Session-wide.
  banner_emitted: bool,
  errors_seen: bool,
  warnings_seen: bool,
  // Per-file, reset by `beautify`.
  opts: FileOptions,
  region: Region,
  comment_quote: Option<u8>,
  instruction: Option<u8>,
  policy: SpacePolicy,
  backslash: bool,
  near_end: bool,
  extra_indent: bool,
  changed: bool,
  fatal: bool,
  warned: bool,
  archive: bool,
  inbuf: Vec<u8>,
  line: LineWriter,
  stack: IndentStack,
  cur_indent: usize,
  numstrip: isize,
  linenum: u32,
}

impl Default for Beautifier {
  fn default() -> Self {
    Beautifier::new()
  }
}

impl Beautifier {
  pub fn new() -> Beautifier {
    let opts = FileOptions::default();
    Beautifier {
      banner_emitted: false,
      errors_seen: false,
      warnings_seen: false,
      region: Region::Code,
      comment_quote: None,
      instruction: None,
      policy: SpacePolicy::Strip,
      backslash: false,
      near_end: false,
      extra_indent: false,
      changed: false,
      fatal: false,
      warned: false,
      archive: false,
      inbuf: Vec::new(),
      line: LineWriter::new(opts.max_line_len * 2),
      stack: IndentStack::new(opts.max_depth),
      cur_indent: 0,
      numstrip: 0,
      linenum: 1,
      opts,
    }
  }

  /// Beautifies one file from `source` into `output`, returning the
  /// per-file status flags. Diagnostics are rendered and handed to `sink`.
  /// The core never opens files; the caller owns both ends.
  pub fn beautify(
    &mut self,
    opts: &FileOptions,
    source: &[u8],
    output: &mut Vec<u8>,
    sink: &mut dyn MessageSink,
  ) -> Status {
    self.reset(opts);
    if self.opts.markup && self.archive {
      self.archive = false;
      self.diag(sink, Diagnostic::new(DiagKind::ArchiveInMarkup));
    }
    if self.opts.markup {
      self.region = Region::Markup;
      self.policy = SpacePolicy::AsIs;
    }
    let mut cur = Cursor::new(source);
    let mut flow = Flow::Next;
    let mut halted = false;
    loop {
      let c = match flow {
        Flow::Redispatch(b) => b,
        Flow::Next => match cur.next() {
          Some(b) => b,
          None => break,
        },
      };
      flow = Flow::Next;
      if c == CTRL_Z {
        if let Err(halt) = self.end_of_text(&mut cur, output, sink) {
          self.halt(halt, sink);
          halted = true;
        }
        break;
      }
      let step = self.push_input(c).and_then(|()| {
        if self.region == Region::Code {
          self.dispatch_code(c, &mut cur, output, sink)
        } else {
          self.dispatch_quoted(c, &mut cur, output, sink)
        }
      });
      match step {
        Ok(next) => flow = next,
        Err(halt) => {
          self.halt(halt, sink);
          halted = true;
          break;
        }
      }
    }
    if !halted {
      if !self.line.is_empty() {
        if let Err(halt) = self.put_newline(output) {
          self.halt(halt, sink);
          halted = true;
        }
      }
    }
    if !halted {
      if self.archive {
        self.write_trailer(output);
      }
      self.terminal_checks(sink);
    }
    if self.fatal {
      if !self.opts.force {
        self.changed = false;
      }
    } else if self.opts.strip {
      self.changed = true;
    }
    Status {
      changed: self.changed,
      fatal: self.fatal,
      warned: self.warned,
    }
  }

  /// Emits a progress note (banner included once per session).
  pub fn note(&mut self, sink: &mut dyn MessageSink, message: &str) {
    self.ensure_banner(sink);
    sink.emit(message);
  }

  /// Reports an externally produced diagnostic (environment errors from the
  /// file transaction layer) through the common sink, folding its severity
  /// into the session result.
  pub fn report(&mut self, sink: &mut dyn MessageSink, severity: Severity, message: &str) {
    match severity {
      Severity::Error => self.errors_seen = true,
      Severity::Warning => self.warnings_seen = true,
    }
    self.ensure_banner(sink);
    sink.emit(message);
  }

  /// Ends the session: emits the "no sources modified" note when applicable
  /// and folds everything seen into a session result.
  pub fn finish(
    &mut self,
    changed: bool,
    quiet: bool,
    sink: &mut dyn MessageSink,
  ) -> SessionResult {
    if !changed && !quiet {
      self.note(sink, "no sources modified");
    }
    if self.errors_seen {
      SessionResult::Failed
    } else if self.warnings_seen {
      SessionResult::WarningsOnly
    } else if changed {
      SessionResult::SuccessWithChanges
    } else {
      SessionResult::Success
    }
  }

  fn reset(&mut self, opts: &FileOptions) {
    self.opts = opts.clone();
    self.archive = opts.archive;
    self.region = Region::Code;
    self.comment_quote = None;
    self.instruction = None;
    self.policy = SpacePolicy::Strip;
    self.backslash = false;
    self.near_end = false;
    self.extra_indent = false;
    self.changed = false;
    self.fatal = false;
    self.warned = false;
    self.inbuf.clear();
    self.line.reset(opts.max_line_len.saturating_mul(2));
    self.stack.reset(opts.max_depth);
    self.cur_indent = 0;
    self.numstrip = 0;
    self.linenum = 1;
  }

  fn ensure_banner(&mut self, sink: &mut dyn MessageSink) {
    if !self.banner_emitted {
      self.banner_emitted = true;
      sink.emit(BANNER);
    }
  }

  fn diag(&mut self, sink: &mut dyn MessageSink, diagnostic: Diagnostic) {
    match diagnostic.kind.severity() {
      Severity::Error => {
        self.fatal = true;
        self.errors_seen = true;
      }
      Severity::Warning => {
        self.warned = true;
        self.warnings_seen = true;
      }
    }
    self.ensure_banner(sink);
    sink.emit(&diagnostic.render(&self.opts.name));
  }

  fn halt(&mut self, halt: Halt, sink: &mut dyn MessageSink) {
    let kind = match halt {
      Halt::LineTooLong => DiagKind::LineTooLong {
        limit: self.opts.max_line_len,
      },
      Halt::NestingTooDeep => DiagKind::NestingTooDeep {
        limit: self.opts.max_depth,
      },
    };
    let col = self.line.len();
    self.diag(sink, Diagnostic::at(kind, self.linenum, col));
  }

  fn line_context(&self) -> String {
    String::from_utf8_lossy(self.line.as_bytes()).into_owned()
  }

  // ---- buffers ----

  fn push_input(&mut self, c: u8) -> Result<(), Halt> {
    if self.inbuf.len() >= self.opts.max_line_len {
      return Err(Halt::LineTooLong);
    }
    self.inbuf.push(c);
    Ok(())
  }

  fn push_line(&mut self, b: u8) -> Result<(), Halt> {
    if self.line.try_push(b) {
      Ok(())
    } else {
      Err(Halt::LineTooLong)
    }
  }

  fn push_level(&mut self, level: Level) -> Result<(), Halt> {
    if self.stack.push(level) {
      Ok(())
    } else {
      Err(Halt::NestingTooDeep)
    }
  }

  /// Pops one level, restoring its whitespace-policy snapshot.
  fn pop_level(&mut self) -> Option<Level> {
    let level = self.stack.pop();
    if let Some(level) = level {
      self.policy = level.policy;
    }
    level
  }

  fn ending(&self) -> &'static [u8] {
    self.opts.line_ending.as_bytes()
  }

  fn prev_input_in(&self, set: &ByteFilter) -> bool {
    self.inbuf.len() > 1 && set.has(self.inbuf[self.inbuf.len() - 2])
  }

  /// Whether the output line ends with `key` preceded by a token boundary.
  fn lookback_keyword(&self, key: &[u8]) -> bool {
    let out = self.line.as_bytes();
    if out.len() < key.len() {
      return false;
    }
    let begin = out.len() - key.len();
    if begin > 0 && !TOKEN_BOUNDARY.has(out[begin - 1]) {
      return false;
    }
    &out[begin..] == key
  }

  // ---- output ----

  fn write_indent(&mut self, depth: usize) -> Result<(), Halt> {
    if self.opts.strip {
      return Ok(());
    }
    match self.opts.tab {
      TabStop::Spaces(n) => {
        for _ in 0..n as usize * depth {
          self.push_line(b' ')?;
        }
      }
      TabStop::Tabs(_) => {
        for _ in 0..depth {
          self.push_line(b'\t')?;
        }
      }
    }
    Ok(())
  }

  /// Appends one byte to the current output line, re-indenting at line
  /// start inside code and block-comment continuations; a newline flushes
  /// the line through the splitter.
  fn put(&mut self, c: u8, out: &mut Vec<u8>) -> Result<(), Halt> {
    let depth = self.stack.depth();
    self.put_at_depth(c, depth, out)
  }

  fn put_at_depth(&mut self, c: u8, depth: usize, out: &mut Vec<u8>) -> Result<(), Halt> {
    if c == b'\n' {
      return self.put_newline(out);
    }
    if !self.opts.strip || self.region.written_in_strip() {
      if self.line.is_empty() && self.region.indents_at_line_start() {
        self.write_indent(depth)?;
      }
      self.push_line(c)?;
    }
    Ok(())
  }

  /// Flushes the buffered logical line: re-indents `#region` directives,
  /// splits the line when it opened more than one level, detects changes
  /// against the raw input line and renders the configured line ending.
  fn put_newline(&mut self, out: &mut Vec<u8>) -> Result<(), Halt> {
    let mut beg = 0usize;
    let save_depth = self.stack.depth();
    self.linenum += 1;
    self.push_line(b'\n')?;
    if !self.opts.strip {
      self.reindent_region_directive(save_depth)?;
      while self.cur_indent + 1 < save_depth {
        let tag = self.stack.level(self.cur_indent).tag;
        self.cur_indent += 1;
        if SPLIT_SKIP_TAGS.has(tag) {
          continue;
        }
        let save_len = self.line.len();
        let cut = self.stack.level(self.cur_indent).offset;
        let mut end = cut;
        while end > beg && HSPACE.has(self.line.byte(end - 1)) {
          end -= 1;
        }
        self.changed = true;
        out.extend_from_slice(&self.line.as_bytes()[beg..end]);
        out.extend_from_slice(self.ending());
        beg = cut;
        self.linenum += 1;
        self.write_indent(self.cur_indent)?;
        out.extend_from_slice(&self.line.as_bytes()[save_len..]);
        self.line.truncate(save_len);
      }
    }
    self.cur_indent = save_depth;
    if !self.opts.strip || self.line.len() > 1 || !self.region.is_comment() {
      if !self.changed && self.line.as_bytes() != self.inbuf.as_slice() {
        self.changed = true;
      }
      out.extend_from_slice(&self.line.as_bytes()[beg..self.line.len() - 1]);
      out.extend_from_slice(self.ending());
    } else {
      // A comment-only line vanished entirely under strip mode.
      self.changed = true;
    }
    self.line.clear();
    self.inbuf.clear();
    Ok(())
  }

  /// Lines starting `#region`/`#endregion` pass through at column zero like
  /// any other `#` line, then get re-indented here at flush time.
  fn reindent_region_directive(&mut self, depth: usize) -> Result<(), Halt> {
    if self.line.first() != Some(b'#') || !self.opts.tab.indents() {
      return Ok(());
    }
    let is_directive = {
      let body = &self.line.as_bytes()[1..];
      let body = body.strip_prefix(b"end".as_slice()).unwrap_or(body);
      body.starts_with(b"region")
    };
    if !is_directive {
      return Ok(());
    }
    let (fill, count) = match self.opts.tab {
      TabStop::Spaces(n) => (b' ', n as usize * depth),
      TabStop::Tabs(_) => (b'\t', depth),
    };
    if !self.line.insert_fill(0, fill, count) {
      return Err(Halt::LineTooLong);
    }
    Ok(())
  }

  /// Renders whatever whitespace the active policy owes before a token.
  fn flush_pending(&mut self, out: &mut Vec<u8>) -> Result<(), Halt> {
    match self.policy {
      SpacePolicy::Needed => self.put(b' ', out),
      SpacePolicy::NeedLinefeed => self.put(b'\n', out),
      SpacePolicy::Strip | SpacePolicy::AsIs => Ok(()),
    }
  }

  // ---- end-of-text tail ----

  /// Handles the `0x1A` marker: markup/archive files are truncated with a
  /// warning, otherwise the marker and every remaining byte are copied
  /// verbatim.
  fn end_of_text(
    &mut self,
    cur: &mut Cursor,
    out: &mut Vec<u8>,
    sink: &mut dyn MessageSink,
  ) -> Result<(), Halt> {
    let save = match cur.next_raw() {
      Some(b) => b,
      // A lone trailing marker is dropped.
      None => return Ok(()),
    };
    if self.opts.markup || self.archive {
      self.changed = true;
      self.diag(sink, Diagnostic::new(DiagKind::ControlZStripped));
      return Ok(());
    }
    if !self.line.is_empty() {
      self.put_newline(out)?;
    }
    out.push(CTRL_Z);
    out.push(save);
    cur.copy_rest(out);
    self.inbuf.clear();
    self.line.clear();
    Ok(())
  }

  /// Appends the fixed 23-byte empty-container trailer: the end-of-text
  /// marker followed by an end record whose directory offset points just
  /// past the marker.
  fn write_trailer(&mut self, out: &mut Vec<u8>) {
    self.changed = true;
    let pos = (out.len() as u32).wrapping_add(1);
    let mut trailer = [0u8; 23];
    trailer[..5].copy_from_slice(b"\x1aPK\x05\x06");
    trailer[17..21].copy_from_slice(&pos.to_le_bytes());
    out.extend_from_slice(&trailer);
  }

  // ---- terminal checks ----

  fn terminal_checks(&mut self, sink: &mut dyn MessageSink) {
    let line = self.linenum;
    let col = self.line.len();
    match self.region {
      Region::BlockStar => {
        self.diag(
          sink,
          Diagnostic::at(DiagKind::UnterminatedBlockComment { closer: "*/" }, line, col),
        );
      }
      Region::BlockPlus => {
        self.diag(
          sink,
          Diagnostic::at(DiagKind::UnterminatedBlockComment { closer: "+/" }, line, col),
        );
      }
      r if r.is_string_or_regex() => {
        let delimiter = r.close_byte().unwrap();
        self.diag(
          sink,
          Diagnostic::at(DiagKind::UnterminatedString { delimiter }, line, col),
        );
      }
      _ if self.opts.markup && self.region != Region::Markup => {
        let kind = match self.instruction {
          Some(punct) => DiagKind::UnterminatedInstruction { punct },
          None => DiagKind::UnterminatedScript,
        };
        self.diag(sink, Diagnostic::at(kind, line, col));
      }
      _ => {
        while self.stack.top_tag_in(&PSEUDO_TAGS) {
          self.stack.pop();
        }
        if !self.stack.is_empty() {
          let mut tags = Vec::new();
          for i in (0..self.stack.depth()).rev() {
            let tag = self.stack.level(i).tag;
            if PSEUDO_TAGS.has(tag) {
              continue;
            }
            tags.push(if tag == b'(' { b')' } else { tag });
          }
          self.diag(sink, Diagnostic::at(DiagKind::MissingClosers { tags }, line, col));
        }
      }
    }
  }

  // ---- code-region dispatch ----

  fn dispatch_code(
    &mut self,
    c: u8,
    cur: &mut Cursor,
    out: &mut Vec<u8>,
    sink: &mut dyn MessageSink,
  ) -> Step {
    match c {
      b'\'' | b'"' | b'`' => self.on_quote(c, out),
      b':' => self.on_colon(cur, out),
      b';' | b',' => self.on_separator(c, out),
      b'=' => self.on_equals(cur, out),
      b'?' => self.on_question(out),
      b'(' => self.on_open_paren(out),
      b'{' => self.on_open_brace(out),
      b'[' => self.on_open_bracket(out),
      b')' | b'}' | b']' => self.on_closer(c, out, sink),
      b' ' | b'\t' | b'\n' => self.on_whitespace(c, out),
      b'/' => self.on_slash(cur, out),
      b'#' => self.on_hash(out),
      b'>' => self.on_greater(out),
      _ => self.on_other(c, out),
    }
  }

  fn on_quote(&mut self, c: u8, out: &mut Vec<u8>) -> Step {
    self.flush_pending(out)?;
    self.put(c, out)?;
    self.region = Region::from_quote(c);
    self.policy = SpacePolicy::AsIs;
    Ok(Flow::Next)
  }

  fn on_colon(&mut self, cur: &mut Cursor, out: &mut Vec<u8>) -> Step {
    if self.stack.top_tag() == Some(b'E') {
      // Host-variable colon inside an EXEC-style construct.
      self.flush_pending(out)?;
      self.put(b':', out)?;
      self.policy = SpacePolicy::AsIs;
      return Ok(Flow::Next);
    }
    self.extra_indent = false;
    let next = cur.next();
    if next == Some(b':') {
      // Scope operator; bypasses label and ternary handling entirely.
      self.push_input(b':')?;
      self.put(b':', out)?;
      self.put(b':', out)?;
      self.policy = SpacePolicy::AsIs;
      return Ok(Flow::Next);
    }
    while self.stack.top_tag() == Some(b';') {
      self.pop_level();
    }
    if self.stack.top_tag() == Some(b':') {
      // Resolves the nearest unresolved ternary.
      self.stack.set_top_tag(b';');
      self.policy = if self.opts.strip {
        SpacePolicy::Strip
      } else if self.stack.depth() <= self.cur_indent {
        SpacePolicy::NeedLinefeed
      } else {
        SpacePolicy::Needed
      };
    } else {
      if self.stack.depth() == self.cur_indent && !self.opts.strip {
        self.classify_label()?;
      }
      self.policy = if self.opts.strip {
        SpacePolicy::Strip
      } else if self.prev_input_in(&OPERATOR_CONTEXT) {
        SpacePolicy::AsIs
      } else {
        SpacePolicy::Needed
      };
    }
    self.put(b':', out)?;
    Ok(match next {
      Some(b) => Flow::Redispatch(b),
      None => Flow::Next,
    })
  }

  /// Case/default/label detection for a colon that resolved no ternary.
  fn classify_label(&mut self) -> Result<(), Halt> {
    let mut is_label = false;
    {
      let out = self.line.as_bytes();
      if let Some(pos) = memmem::rfind(out, b"case") {
        is_label = pos == 0 || TOKEN_BOUNDARY.has(out[pos - 1]);
      }
      if is_label {
        self.extra_indent = true;
      } else if self.lookback_keyword(b"default") {
        is_label = true;
        self.extra_indent = true;
      } else {
        let last = out.len() as isize - 1;
        let mut pos = last;
        while pos >= 0 && !TOKEN_BOUNDARY.has(out[pos as usize]) {
          pos -= 1;
        }
        if pos != last {
          while pos >= 0 && HSPACE.has(out[pos as usize]) {
            pos -= 1;
          }
          is_label = pos < 0;
        }
      }
    }
    if is_label {
      if self.extra_indent && self.stack.top_tag() != Some(b' ') {
        let level = Level {
          tag: b' ',
          offset: self.line.len(),
          policy: self.policy,
        };
        self.push_level(level)?;
      } else {
        // The extra indent unit was already written; take it back.
        let unit = self.opts.tab.unit_len();
        if unit > 0 && self.line.len() >= unit {
          self.line.drain_front(unit);
        }
      }
    }
    Ok(())
  }

  fn on_separator(&mut self, c: u8, out: &mut Vec<u8>) -> Step {
    let mut new_depth = self.stack.depth();
    if c == b';' && self.stack.top_tag() == Some(b'E') {
      new_depth -= 1;
    } else {
      while new_depth > 0 && TERNARY_TAGS.has(self.stack.level(new_depth - 1).tag) {
        new_depth -= 1;
      }
    }
    self.extra_indent = false;
    self.policy = if self.opts.strip {
      SpacePolicy::Strip
    } else if self.prev_input_in(&OPERATOR_CONTEXT) {
      SpacePolicy::AsIs
    } else {
      SpacePolicy::Needed
    };
    self.put(c, out)?;
    self.stack.truncate(new_depth);
    Ok(Flow::Next)
  }

  fn on_equals(&mut self, cur: &mut Cursor, out: &mut Vec<u8>) -> Step {
    if self.opts.strip {
      self.policy = SpacePolicy::Strip;
    } else if self.prev_input_in(&OPERATOR_CONTEXT) {
      self.policy = SpacePolicy::AsIs;
    } else {
      self.flush_pending(out)?;
      let (space_insert, operator_overload) = {
        let bytes = self.line.as_bytes();
        let mut i = bytes.len() as isize - 1;
        while i >= 0 && OPERATOR_RUN.has(bytes[i as usize]) {
          i -= 1;
        }
        let mut space_insert = (i + 1) as usize;
        while i >= 0 && HSPACE.has(bytes[i as usize]) {
          i -= 1;
          space_insert = 0;
        }
        let overload = i > 6 && bytes[i as usize - 7..=i as usize] == *b"operator";
        (space_insert, overload)
      };
      if !operator_overload {
        self.put(b'=', out)?;
        let next = cur.next();
        if matches!(next, Some(b'=') | Some(b'>')) {
          // `==` and `=>` stay tight.
          self.policy = SpacePolicy::AsIs;
        } else {
          if space_insert != 0 && !self.line.insert(space_insert, b' ') {
            return Err(Halt::LineTooLong);
          }
          self.policy = SpacePolicy::Needed;
        }
        return Ok(match next {
          Some(b) => Flow::Redispatch(b),
          None => Flow::Next,
        });
      }
      // An overloaded `operator=` keeps the caller's spacing.
      self.policy = SpacePolicy::AsIs;
    }
    self.put(b'=', out)?;
    Ok(Flow::Next)
  }

  fn on_question(&mut self, out: &mut Vec<u8>) -> Step {
    let offset = self.line.len();
    self.policy = if self.opts.strip {
      SpacePolicy::Strip
    } else if self.prev_input_in(&OPERATOR_CONTEXT) {
      SpacePolicy::AsIs
    } else {
      SpacePolicy::Needed
    };
    self.put(b'?', out)?;
    let level = Level {
      tag: b':',
      offset,
      policy: self.policy,
    };
    self.push_level(level)?;
    Ok(Flow::Next)
  }

  fn on_open_paren(&mut self, out: &mut Vec<u8>) -> Step {
    let mut tag = b')';
    if self.lookback_keyword(b"elseif") {
      tag = b'(';
    } else if self.lookback_keyword(b"if")
      || self.lookback_keyword(b"for")
      || self.lookback_keyword(b"while")
    {
      // The pending single-statement body is superseded by the construct's
      // own parenthesis level; the active policy still owes its whitespace.
      if self.stack.top_tag() == Some(b';') {
        self.stack.pop();
      }
      tag = b'(';
    }
    if !self.opts.strip {
      self.flush_pending(out)?;
    }
    let offset = self.line.len();
    self.policy = SpacePolicy::Strip;
    self.put(b'(', out)?;
    let level = Level {
      tag,
      offset,
      policy: self.policy,
    };
    self.push_level(level)?;
    Ok(Flow::Next)
  }

  fn on_open_brace(&mut self, out: &mut Vec<u8>) -> Step {
    if self.extra_indent {
      if self.stack.top_tag_in(&BODY_PENDING_TAGS) {
        self.stack.pop();
      }
      self.extra_indent = false;
    }
    if !self.opts.strip {
      if self.policy == SpacePolicy::NeedLinefeed {
        self.put(b'\n', out)?;
      } else if self.policy == SpacePolicy::Needed
        || matches!(self.line.last(), Some(b) if !BRACE_TIGHT.has(b))
      {
        self.put(b' ', out)?;
      }
    }
    let offset = self.line.len();
    self.policy = SpacePolicy::Strip;
    self.put(b'{', out)?;
    let level = Level {
      tag: b'}',
      offset,
      policy: self.policy,
    };
    self.push_level(level)?;
    Ok(Flow::Next)
  }

  fn on_open_bracket(&mut self, out: &mut Vec<u8>) -> Step {
    let near_line_start = self.inbuf.len() < 8;
    let after_delete = !near_line_start && self.inbuf[self.inbuf.len() - 8..].starts_with(b"delete");
    if !self.opts.strip && (near_line_start || after_delete) {
      self.flush_pending(out)?;
    }
    let offset = self.line.len();
    self.policy = SpacePolicy::Strip;
    self.put(b'[', out)?;
    let level = Level {
      tag: b']',
      offset,
      policy: self.policy,
    };
    self.push_level(level)?;
    Ok(Flow::Next)
  }

  fn on_closer(&mut self, c: u8, out: &mut Vec<u8>, sink: &mut dyn MessageSink) -> Step {
    while self.stack.top_tag_in(&PSEUDO_TAGS) {
      self.pop_level();
    }
    let depth = self.stack.depth();
    let force_break =
      !self.opts.strip && depth < self.cur_indent && !self.line.is_empty();
    if depth > 0 && c == b')' && self.stack.top_tag() == Some(b'(') {
      // A control-construct parenthesis: the level stays behind as a
      // pending single-statement body.
      if force_break {
        self.put(b'\n', out)?;
      }
      self.stack.set_top_tag(b';');
      self.extra_indent = true;
      self.set_closer_policy();
      self.put_at_depth(c, depth - 1, out)?;
    } else if depth > 0 && self.stack.top_tag() == Some(c) {
      if force_break {
        self.put(b'\n', out)?;
      }
      self.pop_level();
      self.set_closer_policy();
      self.put(c, out)?;
    } else {
      if !self.opts.quiet {
        let kind = DiagKind::MismatchedCloser {
          closer: c,
          context: self.line_context(),
        };
        self.diag(sink, Diagnostic::at(kind, self.linenum, self.line.len()));
      }
      self.set_closer_policy();
      self.put(c, out)?;
    }
    Ok(Flow::Next)
  }

  fn set_closer_policy(&mut self) {
    self.policy = if self.opts.strip {
      SpacePolicy::Strip
    } else {
      SpacePolicy::AsIs
    };
  }

  fn on_whitespace(&mut self, c: u8, out: &mut Vec<u8>) -> Step {
    if self.lookback_keyword(b"EXEC") {
      let level = Level {
        tag: b'E',
        offset: self.line.len(),
        policy: self.policy,
      };
      self.push_level(level)?;
    } else if self.lookback_keyword(b"else") || self.lookback_keyword(b"do") {
      if !self.extra_indent {
        let level = Level {
          tag: b';',
          offset: self.line.len(),
          policy: self.policy,
        };
        self.push_level(level)?;
      }
      self.extra_indent = true;
    } else if self.lookback_keyword(b"done") && self.stack.top_tag() == Some(b';') {
      self.stack.pop();
      self.extra_indent = false;
      let unit = self.opts.tab.unit_len();
      if unit > 0 && !self.opts.strip && self.line.len() >= unit {
        self.line.drain_front(unit);
      }
    }
    if c == b'\n' {
      self.policy = SpacePolicy::Strip;
      self.put(b'\n', out)?;
    } else if !matches!(self.policy, SpacePolicy::Strip | SpacePolicy::NeedLinefeed) {
      self.policy = SpacePolicy::Needed;
    }
    Ok(Flow::Next)
  }

  fn on_slash(&mut self, cur: &mut Cursor, out: &mut Vec<u8>) -> Step {
    let prev = self.line.last().unwrap_or(0);
    self.flush_pending(out)?;
    let next = cur.next();
    match next {
      Some(b'/') => {
        self.region = Region::LineComment;
        self.comment_quote = None;
      }
      Some(marker @ (b'*' | b'+')) => {
        self.push_input(marker)?;
        self.comment_quote = None;
        if self.opts.strip {
          self.policy = if self.line.is_empty() {
            SpacePolicy::Needed
          } else {
            SpacePolicy::Strip
          };
          self.numstrip = 0;
        } else {
          self.put(b'/', out)?;
          let width = match self.opts.tab {
            TabStop::Spaces(n) => n as isize * self.stack.depth() as isize,
            TabStop::Tabs(_) => self.stack.depth() as isize,
          };
          self.numstrip = width + self.inbuf.len() as isize - self.line.len() as isize - 1;
          self.put(marker, out)?;
        }
        self.region = if marker == b'*' {
          Region::BlockStar
        } else {
          Region::BlockPlus
        };
        return Ok(Flow::Next);
      }
      _ => {
        if REGEX_PRECEDERS.has(prev) {
          self.region = Region::Regex;
          self.comment_quote = None;
        }
      }
    }
    self.policy = SpacePolicy::AsIs;
    if !(self.region == Region::LineComment && self.opts.strip) {
      self.put(b'/', out)?;
    }
    Ok(match next {
      Some(b) => Flow::Redispatch(b),
      None => Flow::Next,
    })
  }

  fn on_hash(&mut self, out: &mut Vec<u8>) -> Step {
    if matches!(self.policy, SpacePolicy::Needed | SpacePolicy::NeedLinefeed) {
      self.put(b' ', out)?;
    }
    if self.line.is_empty() {
      // Shell comments and preprocessor lines pass through verbatim.
      self.region = Region::LineComment;
      self.comment_quote = None;
    }
    self.policy = SpacePolicy::AsIs;
    self.put(b'#', out)?;
    Ok(Flow::Next)
  }

  /// `>` in code: in markup mode it may close a processing instruction, a
  /// self-closing tag or a `</script>`; handling then continues as for any
  /// other byte.
  fn on_greater(&mut self, out: &mut Vec<u8>) -> Step {
    if self.opts.markup {
      if let Some(punct) = self.instruction {
        if self.inbuf.len() >= 2 && self.inbuf[self.inbuf.len() - 2] == punct {
          self.region = Region::Markup;
          if self.stack.top_tag() == Some(b':') {
            self.pop_level();
          }
          while self.line.len() > 1 && HSPACE.has(self.line.byte(self.line.len() - 2)) {
            let i = self.line.len() - 2;
            self.line.remove(i);
          }
          if !self.line.is_empty() {
            let i = self.line.len() - 1;
            self.line.set_byte(i, punct);
          }
          self.policy = SpacePolicy::AsIs;
        }
      } else if self.inbuf.len() >= 2
        && self.inbuf[self.inbuf.len() - 2] == b'/'
        && (self.inbuf.len() < 3 || self.inbuf[self.inbuf.len() - 3] != b'*')
      {
        self.region = Region::Markup;
        while self.line.len() > 1 && HSPACE.has(self.line.byte(self.line.len() - 2)) {
          let i = self.line.len() - 2;
          self.line.remove(i);
        }
        if !self.line.is_empty() {
          let i = self.line.len() - 1;
          self.line.set_byte(i, b'/');
        }
        self.policy = SpacePolicy::AsIs;
      } else if self.line.len() >= 8
        && self.policy != SpacePolicy::Needed
        && self.line.ends_with(b"</script")
      {
        self.region = Region::Markup;
        while self.line.len() > 8 && HSPACE.has(self.line.byte(self.line.len() - 9)) {
          let i = self.line.len() - 9;
          self.line.remove(i);
        }
        self.policy = SpacePolicy::AsIs;
      }
    }
    self.on_other(b'>', out)
  }

  fn on_other(&mut self, c: u8, out: &mut Vec<u8>) -> Step {
    self.extra_indent = false;
    self.flush_pending(out)?;
    self.policy = SpacePolicy::AsIs;
    self.put(c, out)?;
    Ok(Flow::Next)
  }

  // ---- quoted-region dispatch ----

  fn dispatch_quoted(
    &mut self,
    c: u8,
    cur: &mut Cursor,
    out: &mut Vec<u8>,
    sink: &mut dyn MessageSink,
  ) -> Step {
    if self.region == Region::MarkupAngle && !matches!(c, b'%' | b'?' | b'#') {
      self.region = Region::Markup;
    }
    match c {
      b' ' => {
        if self.region == Region::Markup && self.script_tag_pending() {
          return self.scan_script_tag(c, cur, out);
        }
        if self.policy == SpacePolicy::Strip {
          if self.inbuf.len() as isize > self.numstrip {
            self.policy = SpacePolicy::AsIs;
            self.put(b' ', out)?;
          }
        } else {
          self.put(b' ', out)?;
        }
      }
      0x07 | 0x08 | 0x0c | 0x0b => self.render_control(c, out)?,
      b'\t' => {
        if self.region == Region::Markup {
          if self.script_tag_pending() {
            return self.scan_script_tag(c, cur, out);
          }
        } else if self.region.is_block_comment()
          && self.policy == SpacePolicy::Strip
          && self.inbuf.len() as isize > self.numstrip
        {
          self.policy = SpacePolicy::AsIs;
        }
        if self.policy != SpacePolicy::Strip {
          self.render_tab(out)?;
        }
      }
      b'\n' => {
        if self.region == Region::Markup {
          if self.script_tag_pending() {
            return self.scan_script_tag(c, cur, out);
          }
        } else if self.region.is_comment() {
          self.comment_line_end(sink)?;
        }
        self.put(b'\n', out)?;
      }
      b'>' => self.on_greater_quoted(out, sink)?,
      b'"' | b'\'' | b'`' => {
        if !self.backslash && self.region.is_comment() {
          match self.comment_quote {
            None => self.comment_quote = Some(c),
            Some(q) if q == c => self.comment_quote = None,
            Some(_) => {}
          }
        }
        if self.policy == SpacePolicy::Strip {
          self.policy = SpacePolicy::AsIs;
        }
        self.put(c, out)?;
      }
      _ => {
        if self.policy == SpacePolicy::Strip {
          self.policy = SpacePolicy::AsIs;
        }
        self.put(c, out)?;
      }
    }
    self.quoted_tail(c, cur, out)
  }

  /// Control characters are escaped outside comments and markup, passed
  /// through inside them.
  fn render_control(&mut self, c: u8, out: &mut Vec<u8>) -> Result<(), Halt> {
    if self.region.is_comment_or_markup() {
      self.put(c, out)?;
    } else {
      let letter = match c {
        0x07 => b'a',
        0x08 => b'b',
        0x0c => b'f',
        _ => b'v',
      };
      self.put(b'\\', out)?;
      self.put(letter, out)?;
    }
    Ok(())
  }

  /// A literal tab inside a region: raw in markup and backtick contexts,
  /// escaped in strings and regexes, expanded to aligned spaces inside
  /// comments being re-indented.
  fn render_tab(&mut self, out: &mut Vec<u8>) -> Result<(), Halt> {
    if self.comment_quote == Some(b'`')
      || matches!(self.region, Region::Markup | Region::StringBacktick)
    {
      self.put(b'\t', out)?;
    } else if self.comment_quote.is_some() || !self.region.is_comment() {
      self.put(b'\\', out)?;
      self.put(b't', out)?;
    } else if !self.opts.tab.indents() {
      self.put(b'\t', out)?;
    } else {
      let td = self.opts.tab.width() as isize;
      let mut numtabs = self.numstrip.max(0);
      self.changed = true;
      let n = self.inbuf.len();
      self.inbuf[n - 1] = b' ';
      self.put(b' ', out)?;
      while (numtabs as usize) < self.inbuf.len() && self.inbuf[numtabs as usize] == b'\t' {
        numtabs += 1;
      }
      while (self.inbuf.len() as isize - numtabs) % td != 0 {
        self.put(b' ', out)?;
        self.push_input(b' ')?;
      }
    }
    Ok(())
  }

  /// End of a comment line: trims trailing spaces and applies the
  /// backslash-continuation heuristic; under markup strip mode, re-emits a
  /// comment closer that lived in the stripped text.
  fn comment_line_end(&mut self, sink: &mut dyn MessageSink) -> Result<(), Halt> {
    if !self.backslash {
      self.policy = SpacePolicy::Strip;
      if matches!(self.line.last(), Some(b) if HSPACE.has(b)) {
        while matches!(self.line.last(), Some(b) if HSPACE.has(b)) {
          self.line.pop();
        }
        let end = self.line.len();
        let mut bs = end;
        while bs > 0 && self.line.byte(bs - 1) == b'\\' {
          bs -= 1;
        }
        if (end - bs) % 2 == 1 {
          self.backslash = true;
          self.policy = SpacePolicy::AsIs;
          if !self.opts.quiet {
            let kind = DiagKind::CommentContinuation {
              context: self.line_context(),
            };
            self.diag(sink, Diagnostic::at(kind, self.linenum, self.line.len()));
          }
        }
      }
    }
    if self.opts.markup && self.opts.strip && self.region == Region::LineComment {
      if let Some(p) = memmem::find(&self.inbuf, b"//") {
        if memmem::find(&self.inbuf[p..], b"-->").is_some() {
          for b in *b"//-->" {
            self.push_line(b)?;
          }
        }
      }
    }
    Ok(())
  }

  /// `>` inside a region: `<script ...>` completion, or complaints about
  /// instruction/script closers buried in strings and comments.
  fn on_greater_quoted(&mut self, out: &mut Vec<u8>, sink: &mut dyn MessageSink) -> Result<(), Halt> {
    if self.region == Region::Markup {
      let n = self.inbuf.len();
      if n >= 8 && self.inbuf[n - 8..n - 1] == *b"<script" {
        self.region = Region::Code;
        self.instruction = None;
      }
    } else if self.opts.markup {
      if let Some(punct) = self.instruction {
        if self.line.last() == Some(punct) {
          if self.region == Region::LineComment {
            self.region = Region::MarkupAngle;
            self.instruction = None;
          } else {
            let kind = DiagKind::InstructionInQuote {
              punct,
              context: self.line_context(),
            };
            self.diag(sink, Diagnostic::at(kind, self.linenum, self.line.len()));
          }
        }
      } else {
        let n = self.inbuf.len();
        if n >= 9 && self.inbuf[n - 9..n - 1] == *b"</script" {
          if self.region == Region::LineComment {
            self.region = Region::MarkupAngle;
            self.instruction = None;
            if self.opts.strip {
              // The comment text never reached the output; restore the
              // closer and the tag it carried.
              if let Some(p) = memmem::find(&self.inbuf, b"//") {
                if memmem::find(&self.inbuf[p..], b"-->").is_some() {
                  if self.line.last() == Some(b' ') {
                    self.line.pop();
                  }
                  for b in *b"//-->" {
                    self.push_line(b)?;
                  }
                }
              }
              for b in *b"</script" {
                self.push_line(b)?;
              }
            }
          } else {
            let kind = DiagKind::ScriptEndInQuote {
              context: self.line_context(),
            };
            let col = self.line.len().saturating_sub(7);
            self.diag(sink, Diagnostic::at(kind, self.linenum, col));
          }
        }
      }
    } else if self.policy == SpacePolicy::Strip {
      self.policy = SpacePolicy::AsIs;
    }
    self.put(b'>', out)
  }

  fn script_tag_pending(&self) -> bool {
    let n = self.inbuf.len();
    n >= 8 && self.inbuf[n - 8..n - 1] == *b"<script"
  }

  /// Copies a `<script ...>` tag tail verbatim through its `>`; the engine
  /// then resumes in the code region. An unterminated tail leaves the
  /// markup region in place and an end-of-text marker is re-dispatched.
  fn scan_script_tag(&mut self, first: u8, cur: &mut Cursor, out: &mut Vec<u8>) -> Step {
    let mut c = first;
    loop {
      self.put(c, out)?;
      let next = match cur.next() {
        Some(b) => b,
        None => return Ok(Flow::Next),
      };
      if next == CTRL_Z {
        return Ok(Flow::Redispatch(next));
      }
      self.push_input(next)?;
      if next == b'>' {
        self.put(b'>', out)?;
        self.region = Region::Code;
        self.instruction = None;
        self.policy = SpacePolicy::AsIs;
        return Ok(Flow::Next);
      }
      c = next;
    }
  }

  /// Shared tail of the quoted dispatch: escape bookkeeping, the two-step
  /// block-comment closer, and region exits.
  fn quoted_tail(&mut self, c: u8, cur: &mut Cursor, out: &mut Vec<u8>) -> Step {
    if self.backslash {
      self.backslash = false;
    } else if self.region.is_block_comment() {
      if Some(c) == self.region.block_marker() {
        self.near_end = true;
      } else if self.near_end {
        if c == b'/' {
          self.region = Region::Code;
          self.numstrip = 0;
          self.policy = if self.opts.strip {
            let tight = match self.line.last() {
              None => true,
              Some(b) => STRIP_TIGHT.has(b),
            };
            if tight {
              SpacePolicy::Strip
            } else {
              SpacePolicy::Needed
            }
          } else {
            SpacePolicy::AsIs
          };
        }
        self.near_end = false;
      }
    } else if c == b'\\' {
      if self.region.escapes_backslash() {
        self.backslash = true;
      }
    } else if self.region == Region::MarkupAngle && matches!(c, b'?' | b'#') {
      // `<?`/`<#`: a processing instruction opens; its body is code.
      self.region = Region::Code;
      self.numstrip = 0;
      self.instruction = Some(c);
      self.backslash = false;
      self.policy = SpacePolicy::AsIs;
    } else if self.region.close_byte() == Some(c) {
      if c == b'<' {
        self.region = Region::MarkupAngle;
      } else {
        self.region = Region::Code;
        self.numstrip = 0;
        self.backslash = false;
        if c == b'\n' {
          self.policy = SpacePolicy::Strip;
        } else {
          self.policy = SpacePolicy::AsIs;
          if c == b'%' {
            return self.open_percent_instruction(cur, out);
          }
        }
      }
    }
    Ok(Flow::Next)
  }

  /// `<%` was completed: `<%@` is a directive left to the markup region,
  /// `<%=` emits the `=` and enters code, anything else enters code
  /// directly.
  fn open_percent_instruction(&mut self, cur: &mut Cursor, out: &mut Vec<u8>) -> Step {
    let mut next = cur.next();
    if next == Some(b'@') {
      self.region = Region::Markup;
      return Ok(Flow::Redispatch(b'@'));
    }
    if next == Some(b'=') {
      self.push_input(b'=')?;
      self.put(b'=', out)?;
      next = cur.next();
    }
    self.instruction = Some(b'%');
    Ok(match next {
      Some(b) => Flow::Redispatch(b),
      None => Flow::Next,
    })
  }
}
