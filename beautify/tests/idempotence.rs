use beautify::cfg::FileOptions;
use beautify::engine::Beautifier;
use similar::TextDiff;

fn pass(state: &mut Beautifier, source: &[u8]) -> (Vec<u8>, bool) {
  let mut out = Vec::new();
  let mut messages = Vec::new();
  let mut sink = |m: &str| messages.push(m.to_string());
  let status = beautify::beautify(state, &FileOptions::default(), source, &mut out, &mut sink);
  assert!(!status.fatal, "fatal on {:?}: {:?}", source, messages);
  (out, status.changed)
}

/// Re-running the engine on its own output must be a fixed point.
fn assert_idempotent(source: &str) {
  let mut state = Beautifier::new();
  let (first, _) = pass(&mut state, source.as_bytes());
  let (second, changed) = pass(&mut state, &first);
  if first != second || changed {
    let diff = TextDiff::from_lines(
      std::str::from_utf8(&first).unwrap(),
      std::str::from_utf8(&second).unwrap(),
    );
    panic!(
      "not idempotent for {:?} (changed={}):\n{}",
      source,
      changed,
      diff.unified_diff()
    );
  }
}

#[test]
fn spacing_normalization_is_a_fixed_point() {
  assert_idempotent("a=1;\n");
  assert_idempotent("a+=1;\n");
  assert_idempotent("x => y;\n");
  assert_idempotent("a?b:c;\n");
}

#[test]
fn indenting_is_a_fixed_point() {
  assert_idempotent("f() {\nx = 1;\n}\n");
  assert_idempotent("if (x)\ny = 1;\n");
  assert_idempotent("case 1:\nx;\n");
  assert_idempotent("do\na\ndone\n");
}

#[test]
fn splitting_is_a_fixed_point() {
  assert_idempotent("f({\na;\n});\n");
  assert_idempotent("a([{\nx;\n}]);\n");
}

#[test]
fn comments_and_strings_are_a_fixed_point() {
  assert_idempotent("/* keep */\nx;\n");
  assert_idempotent("// note\nx;\n");
  assert_idempotent("s = \"a  b\";\n");
  assert_idempotent("#define X 1\nx;\n");
}
