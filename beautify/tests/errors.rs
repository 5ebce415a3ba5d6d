use beautify::cfg::FileOptions;
use beautify::cfg::Options;
use beautify::engine::Beautifier;
use beautify::error::Status;

fn run_with(source: &[u8], opts: &Options) -> (Vec<u8>, Status, Vec<String>) {
  let mut state = Beautifier::new();
  let mut out = Vec::new();
  let mut messages = Vec::new();
  let mut sink = |m: &str| messages.push(m.to_string());
  let status = beautify::beautify(
    &mut state,
    &FileOptions::resolve(opts, "in.js"),
    source,
    &mut out,
    &mut sink,
  );
  (out, status, messages)
}

fn run(source: &[u8]) -> (Vec<u8>, Status, Vec<String>) {
  run_with(source, &Options::default())
}

#[test]
fn unterminated_block_comment_is_fatal_and_discards_changes() {
  let (_, status, messages) = run(b"/* never closed\n");
  assert!(status.fatal);
  assert!(!status.changed);
  assert!(messages.iter().any(|m| m.contains("BY0001")));
  assert!(messages.iter().any(|m| m.contains("*/ missing")));
}

#[test]
fn force_mode_keeps_the_changed_flag_on_fatal_errors() {
  let mut opts = Options::default();
  opts.force = true;
  let (_, status, _) = run_with(b"x=1; /* a\n", &opts);
  assert!(status.fatal);
  assert!(status.changed);
}

#[test]
fn unterminated_plus_style_comment_is_fatal() {
  let (_, status, messages) = run(b"/+ dlang\n");
  assert!(status.fatal);
  assert!(messages.iter().any(|m| m.contains("+/ missing")));
}

#[test]
fn unterminated_string_cites_its_delimiter() {
  let (_, status, messages) = run(b"s = \"abc\n");
  assert!(status.fatal);
  assert!(messages.iter().any(|m| m.contains("BY0002")));
  assert!(messages.iter().any(|m| m.contains("\" missing")));
}

#[test]
fn unterminated_backtick_string_is_fatal() {
  let (_, status, messages) = run(b"s = `abc\n");
  assert!(status.fatal);
  assert!(messages.iter().any(|m| m.contains("` missing")));
}

#[test]
fn mismatched_closer_warns_and_continues() {
  let (out, status, messages) = run(b"x);\ny = 1;\n");
  assert!(!status.fatal);
  assert!(status.warned);
  assert!(messages.iter().any(|m| m.contains("BY0006")));
  assert!(String::from_utf8(out).unwrap().contains("y = 1;"));
}

#[test]
fn quiet_mode_suppresses_the_mismatch_warning() {
  let mut opts = Options::default();
  opts.quiet = true;
  let (_, status, messages) = run_with(b"x);\n", &opts);
  assert!(!status.warned);
  assert!(messages.is_empty());
}

#[test]
fn missing_closers_are_aggregated_top_down() {
  let (_, status, messages) = run(b"({[\n");
  assert!(status.fatal);
  assert!(messages.iter().any(|m| m.contains("], }, ) missing at end of file")));
}

#[test]
fn unmatched_control_parenthesis_reports_its_closer() {
  let (_, status, messages) = run(b"if (x\n");
  assert!(status.fatal);
  assert!(messages.iter().any(|m| m.contains(") missing at end of file")));
}

#[test]
fn overlong_line_is_an_explicit_error() {
  let mut opts = Options::default();
  opts.max_line_len = 64;
  let source = vec![b'x'; 100];
  let (_, status, messages) = run_with(&source, &opts);
  assert!(status.fatal);
  assert!(messages.iter().any(|m| m.contains("BY0011")));
}

#[test]
fn overdeep_nesting_is_an_explicit_error() {
  let mut opts = Options::default();
  opts.max_depth = 4;
  let (_, status, messages) = run_with(b"((((((\n", &opts);
  assert!(status.fatal);
  assert!(messages.iter().any(|m| m.contains("BY0012")));
}

#[test]
fn first_diagnostic_emits_the_banner_once() {
  let (_, _, messages) = run(b"x);\ny);\n");
  assert!(messages[0].starts_with("beautify "));
  let banners = messages.iter().filter(|m| m.starts_with("beautify ")).count();
  assert_eq!(banners, 1);
}
