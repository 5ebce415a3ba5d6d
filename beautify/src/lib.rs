use cfg::FileOptions;
use engine::Beautifier;
use error::MessageSink;
use error::Status;

pub mod cfg;
pub mod char;
pub mod engine;
pub mod error;
pub mod line;
pub mod region;
pub mod space;
pub mod stack;

pub use cfg::LineEnding;
pub use cfg::Options;
pub use cfg::TabStop;
pub use error::SessionResult;
pub use error::Severity;

/// Beautifies one file.
///
/// The caller owns the byte source and sink; the core never opens files.
/// Diagnostics are rendered to strings and handed to `sink`. The same
/// `state` is reused (and reset) for every file of a batch; two files must
/// never be processed against it concurrently.
///
/// # Examples
///
/// ```
/// use beautify::cfg::FileOptions;
/// use beautify::engine::Beautifier;
///
/// let mut state = Beautifier::new();
/// let mut out = Vec::new();
/// let mut messages = |_m: &str| {};
/// let status = beautify::beautify(
///   &mut state,
///   &FileOptions::default(),
///   b"if (x) {y = 1;}\n",
///   &mut out,
///   &mut messages,
/// );
/// assert!(!status.fatal);
/// assert_eq!(out, b"if (x) {y = 1;}\n");
/// ```
pub fn beautify(
  state: &mut Beautifier,
  opts: &FileOptions,
  source: &[u8],
  output: &mut Vec<u8>,
  sink: &mut dyn MessageSink,
) -> Status {
  state.beautify(opts, source, output, sink)
}
