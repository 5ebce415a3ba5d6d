use beautify::cfg::FileOptions;
use beautify::engine::Beautifier;
use beautify::error::Status;

fn run(source: &str) -> (String, Status) {
  let mut state = Beautifier::new();
  let mut out = Vec::new();
  let mut messages = Vec::new();
  let mut sink = |m: &str| messages.push(m.to_string());
  let status = beautify::beautify(
    &mut state,
    &FileOptions::default(),
    source.as_bytes(),
    &mut out,
    &mut sink,
  );
  (String::from_utf8(out).expect("utf-8 output"), status)
}

/// Strips whitespace to compare the token stream only.
fn tokens(text: &str) -> String {
  text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[test]
fn one_net_open_per_line_is_kept() {
  let (out, status) = run("f({\na;\n});\n");
  assert_eq!(out, "f(\n\t{\n\t\ta;\n\t}\n);\n");
  assert!(status.changed);
}

#[test]
fn balanced_lines_are_never_split() {
  let (out, status) = run("f(g(h(1)));\n");
  assert_eq!(out, "f(g(h(1)));\n");
  assert!(!status.changed);
}

#[test]
fn splitting_preserves_token_order() {
  let source = "f({\na;\n});\n";
  let (out, _) = run(source);
  assert_eq!(tokens(&out), tokens(source));
}

#[test]
fn no_physical_line_introduces_more_than_one_level() {
  let (out, _) = run("a([{\nx;\n}]);\n");
  for line in out.lines() {
    let opens = line.matches(|c| "([{".contains(c)).count();
    let closes = line.matches(|c| ")]}".contains(c)).count();
    assert!(
      opens.saturating_sub(closes) <= 1,
      "line {:?} introduces too many levels",
      line
    );
  }
}

#[test]
fn extra_closers_get_their_own_lines() {
  let (out, _) = run("a([{\nx;\n}]);\n");
  assert_eq!(out, "a(\n\t[\n\t\t{\n\t\t\tx;\n\t\t}\n\t]\n);\n");
}
