use assert_cmd::Command;
use std::fs;
use std::time::Duration;

fn beautify_cmd() -> Command {
  Command::cargo_bin("beautify-cli").expect("binary built")
}

#[test]
fn no_arguments_prints_usage() {
  let assert = beautify_cmd()
    .timeout(Duration::from_secs(10))
    .assert()
    .code(0);

  let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
  assert!(stderr.contains("usage:"), "stderr: {}", stderr);
}

#[test]
fn unopenable_argument_acts_as_an_option_string() {
  // An argument that is not a file enables strip mode for what follows.
  let dir = tempfile::tempdir().expect("tempdir");
  let file = dir.path().join("t.js");
  fs::write(&file, "x = 1; /* gone */\n").expect("write input");

  let assert = beautify_cmd()
    .timeout(Duration::from_secs(10))
    .current_dir(dir.path())
    .arg("s")
    .arg("t.js")
    .assert()
    .code(3);

  let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
  assert!(!stderr.contains("file not found"), "stderr: {}", stderr);
  // Strip mode leaves the input alone and writes the stripped copy.
  assert_eq!(fs::read_to_string(&file).unwrap(), "x = 1; /* gone */\n");
  let stripped = fs::read_to_string(dir.path().join("t.js$")).unwrap();
  assert!(!stripped.contains("gone"), "comment kept: {}", stripped);
}

#[test]
fn invalid_option_string_warns_and_is_ignored() {
  let assert = beautify_cmd()
    .timeout(Duration::from_secs(10))
    .arg("bogus-option")
    .assert()
    .code(2);

  let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
  assert!(
    stderr.contains("file not found or invalid option"),
    "stderr: {}",
    stderr
  );
}

#[test]
fn strip_is_refused_for_c_sources_under_auto_detection() {
  let dir = tempfile::tempdir().expect("tempdir");
  let file = dir.path().join("t.c");
  fs::write(&file, "x = 1; /* keep */\n").expect("write input");

  let assert = beautify_cmd()
    .timeout(Duration::from_secs(10))
    .current_dir(dir.path())
    .arg("s")
    .arg("t.c")
    .assert()
    .code(2);

  let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
  assert!(
    stderr.contains("strip mode should not be used"),
    "stderr: {}",
    stderr
  );
  // The file was still beautified without stripping.
  assert_eq!(fs::read_to_string(&file).unwrap(), "x = 1; /* keep */\n");
}

#[test]
fn response_file_arguments_are_applied_in_order() {
  let dir = tempfile::tempdir().expect("tempdir");
  fs::write(dir.path().join("opts"), "# comment line\nq\n").expect("write response file");
  let file = dir.path().join("t.js");
  fs::write(&file, "a=1;\n").expect("write input");

  let assert = beautify_cmd()
    .timeout(Duration::from_secs(10))
    .current_dir(dir.path())
    .arg("@opts")
    .arg("t.js")
    .assert()
    .code(3);

  // Quiet mode from the response file suppresses the progress note.
  let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
  assert!(!stderr.contains("modified"), "stderr: {}", stderr);
  assert_eq!(fs::read_to_string(&file).unwrap(), "a = 1;\n");
}

#[test]
fn tab_width_option_selects_space_indenting() {
  let dir = tempfile::tempdir().expect("tempdir");
  let file = dir.path().join("t.js");
  fs::write(&file, "f() {\nx;\n}\n").expect("write input");

  beautify_cmd()
    .timeout(Duration::from_secs(10))
    .current_dir(dir.path())
    .arg("2")
    .arg("t.js")
    .assert()
    .code(3);

  assert_eq!(fs::read_to_string(&file).unwrap(), "f() {\n  x;\n}\n");
}
