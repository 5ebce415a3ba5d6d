use beautify::cfg::FileOptions;
use beautify::cfg::Options;
use beautify::cfg::TabStop;
use beautify::engine::Beautifier;
use beautify::error::Status;

fn run_with(source: &str, opts: &Options) -> (String, Status) {
  let mut state = Beautifier::new();
  let mut out = Vec::new();
  let mut messages = Vec::new();
  let mut sink = |m: &str| messages.push(m.to_string());
  let status = beautify::beautify(
    &mut state,
    &FileOptions::resolve(opts, "<input>"),
    source.as_bytes(),
    &mut out,
    &mut sink,
  );
  (String::from_utf8(out).expect("utf-8 output"), status)
}

fn run(source: &str) -> (String, Status) {
  run_with(source, &Options::default())
}

#[test]
fn block_contents_are_indented_one_level() {
  let (out, status) = run("f() {\nx = 1;\n}\n");
  assert_eq!(out, "f() {\n\tx = 1;\n}\n");
  assert!(status.changed);
}

#[test]
fn single_statement_body_after_if_gets_one_extra_indent() {
  let (out, status) = run("if (x)\ny = 1;\n");
  assert_eq!(out, "if (x)\n\ty = 1;\n");
  assert!(status.changed);
}

#[test]
fn else_keyword_indents_the_following_statement() {
  let (out, _) = run("if (x)\na;\nelse\nb;\n");
  assert_eq!(out, "if (x)\n\ta;\nelse\n\tb;\n");
}

#[test]
fn done_keyword_takes_the_indent_back() {
  let (out, _) = run("do\na\ndone\n");
  assert_eq!(out, "do\n\ta\ndone\n");
}

#[test]
fn case_label_indents_its_statements() {
  let (out, _) = run("case 1:\nx;\n");
  assert_eq!(out, "case 1:\n\tx;\n");
}

#[test]
fn space_indenting_uses_the_configured_width() {
  let mut opts = Options::default();
  opts.tab = TabStop::Spaces(2);
  let (out, _) = run_with("f() {\nx = 1;\n}\n", &opts);
  assert_eq!(out, "f() {\n  x = 1;\n}\n");
}

#[test]
fn zero_width_tab_stop_disables_indenting() {
  let mut opts = Options::default();
  opts.tab = TabStop::Spaces(0);
  let (out, _) = run_with("f() {\nx = 1;\n}\n", &opts);
  assert_eq!(out, "f() {\nx = 1;\n}\n");
}

#[test]
fn region_directives_are_reindented() {
  let (out, _) = run("f() {\n#region a\nx;\n#endregion\n}\n");
  assert_eq!(out, "f() {\n\t#region a\n\tx;\n\t#endregion\n}\n");
}
