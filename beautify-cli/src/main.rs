use ahash::HashSet;
use beautify::cfg::FileOptions;
use beautify::cfg::Options;
use beautify::char::DIR_SEPARATOR;
use beautify::engine::Beautifier;
use beautify::error::MessageSink;
use beautify::error::SessionResult;
use beautify::error::Severity;
use clap::Parser;
use once_cell::sync::Lazy;
use std::fs;
use std::process;
use std::thread;
use std::time::Duration;

/// File extensions that disable strip mode under auto-detection: stripping
/// comments also strips preprocessor lines from these.
static NO_STRIP_EXT: Lazy<HashSet<&'static str>> = Lazy::new(|| {
  HashSet::from_iter([
    "c", "cpp", "cs", "cxx", "d", "h", "hpp", "java", "jsp", "nice", "pcc",
  ])
});

/// File extensions selecting generic mode under auto-detection.
static GENERIC_EXT: Lazy<HashSet<&'static str>> = Lazy::new(|| {
  HashSet::from_iter([
    "as", "bsh", "c", "cpp", "cs", "cxx", "d", "groovy", "gy", "h", "hpp", "java", "js", "jud",
    "judo", "ksh", "nice", "os", "pcc", "pnut", "sh", "tcl",
  ])
});

/// File extensions selecting markup mode under auto-detection.
static MARKUP_EXT: Lazy<HashSet<&'static str>> = Lazy::new(|| {
  HashSet::from_iter([
    "asax", "asp", "aspx", "csproj", "htm", "html", "jsp", "php", "shtml", "vcproj", "xml",
  ])
});

/// File extensions never beautified without force mode.
static IGNORE_EXT: Lazy<HashSet<&'static str>> = Lazy::new(|| {
  HashSet::from_iter([
    "a", "bat", "bmp", "boo", "bz2", "class", "css", "def", "dll", "dsp", "dsw", "exe", "gif",
    "gz", "ico", "lzma", "msp", "ncb", "o", "obj", "opt", "png", "ilk", "jar", "jpg", "la", "lo",
    "lib", "MAK", "MF", "pl", "plg", "py", "rb", "sln", "tgz", "zip",
  ])
});

const USAGE: &str = "\
usage: beautify <options> [<output-dir>] <files>
\t0 no indenting
\t4 indenting 4 spaces/level
\t-4 indenting 1 tab=4 spaces/level (default)
\ta automatic detection of mode (default)
\tf force output
\tg generic mode (default) (resets a, x)
\tl linefeed mode
\tq quiet mode
\tr carriage return mode
\ts strip mode
\tt test mode
\tx xml/html/sgml markup mode (resets a, g)
\tz append empty archive trailer (not usable with x)
\t@<file> read arguments from file
\t<output-dir> should end with '/' or '\\' (default './')";

#[derive(Parser)]
#[command(name = "beautify", about = "Heuristic multi-language source-code beautifier")]
struct Cli {
  /// Files, option strings, `@` response files and output directories,
  /// applied strictly in order.
  #[arg(allow_hyphen_values = true)]
  args: Vec<String>,
}

struct App {
  engine: Beautifier,
  opts: Options,
  out_dir: Option<String>,
  /// Files whose removal failed; retried once at batch end.
  pending: Vec<String>,
  changed: bool,
}

fn main() {
  let cli = Cli::parse();
  let mut sink = |message: &str| eprintln!("{}", message);
  let mut app = App::new();
  if cli.args.is_empty() {
    app.engine.note(&mut sink, USAGE);
    process::exit(0);
  }
  for arg in &cli.args {
    app.process_arg(arg, &mut sink);
  }
  app.drain_pending(&mut sink);
  let result = app.engine.finish(app.changed, app.opts.quiet, &mut sink);
  process::exit(exit_code(result));
}

fn exit_code(result: SessionResult) -> i32 {
  match result {
    SessionResult::Success => 0,
    SessionResult::Failed => 1,
    SessionResult::WarningsOnly => 2,
    SessionResult::SuccessWithChanges => 3,
  }
}

impl App {
  fn new() -> App {
    App {
      engine: Beautifier::new(),
      opts: Options::default(),
      out_dir: None,
      pending: Vec::new(),
      changed: false,
    }
  }

  fn process_arg(&mut self, arg: &str, sink: &mut dyn MessageSink) {
    if let Some(path) = arg.strip_prefix('@') {
      match fs::read_to_string(path) {
        Ok(text) => {
          for line in text.lines() {
            let line = line.trim_end();
            if !line.is_empty() && !line.starts_with('#') {
              self.process_arg(line, sink);
            }
          }
        }
        Err(_) => {
          let msg = format!("{}: warning: file not found (ignored)", path);
          self.engine.report(sink, Severity::Warning, &msg);
        }
      }
      return;
    }
    let bytes = arg.as_bytes();
    if bytes.len() >= 2 && DIR_SEPARATOR.has(bytes[bytes.len() - 1]) {
      // A trailing separator names the output directory; a bare "./"
      // clears the override.
      self.out_dir = if bytes.len() > 2 || bytes[0] != b'.' {
        Some(arg.to_string())
      } else {
        None
      };
      return;
    }
    self.beautify_file(arg, sink);
  }

  fn beautify_file(&mut self, name: &str, sink: &mut dyn MessageSink) {
    let source = match fs::read(name) {
      Ok(bytes) => bytes,
      Err(_) => {
        // Documented alias: an unopenable argument is a run of options.
        if !self.opts.apply_option_string(name) {
          let msg = format!("{}: warning: file not found or invalid option (ignored)", name);
          self.engine.report(sink, Severity::Warning, &msg);
        }
        return;
      }
    };
    let ext = name.rsplit_once('.').map(|(_, e)| e);
    let dest_local = artifact_name(name, '$', self.opts.force);
    let orig = artifact_name(name, '~', self.opts.force);
    if dest_local == name
      || orig == name
      || (!self.opts.force && matches!(ext, Some(e) if IGNORE_EXT.contains(e)))
    {
      let msg = format!("{}: error: unsupported file extension: not modified", name);
      self.engine.report(sink, Severity::Error, &msg);
      return;
    }

    let mut fopts = FileOptions::resolve(&self.opts, name);
    if let Some(e) = ext {
      if self.opts.auto {
        if MARKUP_EXT.contains(e) {
          fopts.markup = true;
        } else if GENERIC_EXT.contains(e) {
          fopts.markup = false;
        }
        if fopts.strip && !self.opts.force && NO_STRIP_EXT.contains(e) {
          let msg = format!(
            "{}: warning: strip mode should not be used for this file type",
            name
          );
          self.engine.report(sink, Severity::Warning, &msg);
          self
            .engine
            .note(sink, "(ignored; use \"f\" if you are really sure that you want this)");
          fopts.strip = false;
        }
      }
    }

    let mut output = Vec::new();
    let status = beautify::beautify(&mut self.engine, &fopts, &source, &mut output, sink);
    self.changed |= status.changed;

    let dest = match &self.out_dir {
      Some(dir) => out_dest(dir, name),
      None => dest_local,
    };
    if fopts.write {
      if let Err(err) = fs::write(&dest, &output) {
        let msg = format!("{}: error: cannot open for writing: {}", dest, err);
        self.engine.report(sink, Severity::Error, &msg);
        return;
      }
    }
    if status.fatal && !fopts.force {
      if fopts.write {
        let msg = format!(
          "please correct this and try again (beautified code stored in {})",
          dest
        );
        self.engine.note(sink, &msg);
      }
      return;
    }

    let suffix = if fopts.markup {
      " (markup mode)"
    } else if fopts.archive {
      " (archive trailer)"
    } else {
      ""
    };
    if self.out_dir.is_some() || fopts.strip {
      // The beautified copy is the deliverable; the input stays untouched.
      self.changed = true;
      if fopts.write && !fopts.quiet {
        self.engine.note(sink, &format!("{} written{}", dest, suffix));
      }
    } else if !fopts.write {
      if status.changed && !fopts.quiet {
        self.engine.note(sink, &format!("{} not written (test mode)", dest));
      }
    } else if status.changed {
      self.replace(name, &dest, &orig, suffix, fopts.quiet, sink);
    } else {
      self.remove_file(&dest);
    }
  }

  /// The replacement dance: back the original up as `<name>~`, move the
  /// beautified `<name>$` copy into place, drop the temporary.
  fn replace(
    &mut self,
    name: &str,
    dest: &str,
    orig: &str,
    suffix: &str,
    quiet: bool,
    sink: &mut dyn MessageSink,
  ) {
    if fs::copy(name, orig).is_err() {
      let msg = format!("{}: error: cannot open", name);
      self.engine.report(sink, Severity::Error, &msg);
      return;
    }
    match fs::copy(dest, name) {
      Ok(_) => {
        self.remove_file(dest);
        if !quiet {
          self.engine.note(sink, &format!("{} modified{}", name, suffix));
        }
      }
      Err(_) => {
        let msg = format!("{}: error: should be writable", name);
        self.engine.report(sink, Severity::Error, &msg);
        self.remove_file(orig);
      }
    }
  }

  fn remove_file(&mut self, path: &str) {
    if fs::remove_file(path).is_err() {
      self.pending.push(path.to_string());
    }
  }

  /// One bounded retry per queued deletion, then a non-fatal warning.
  fn drain_pending(&mut self, sink: &mut dyn MessageSink) {
    for path in std::mem::take(&mut self.pending) {
      if fs::remove_file(&path).is_err() {
        thread::sleep(Duration::from_millis(200));
        if fs::remove_file(&path).is_err() {
          let msg = format!("{}: warning: cannot be removed", path);
          self.engine.report(sink, Severity::Warning, &msg);
        }
      }
    }
  }
}

/// Temporary (`$`) and backup (`~`) names. A three-character extension has
/// its final character replaced so wildcard batches do not pick the
/// artifacts up; otherwise the marker is appended.
fn artifact_name(name: &str, marker: char, force: bool) -> String {
  let mut base = name.to_string();
  match name.rfind('.') {
    Some(dot) => {
      let ext = &name[dot + 1..];
      if ext.len() == 3 && !(ext.ends_with(marker) && force) {
        base.truncate(name.len() - 1);
      }
    }
    None => base.push('.'),
  }
  base.push(marker);
  base
}

/// Destination path under an output-directory override. The directory
/// argument keeps its trailing separator, so plain concatenation composes
/// the path.
fn out_dest(dir: &str, name: &str) -> String {
  let sep = |c: char| c == '/' || c == '\\';
  let abs_name = name.starts_with(sep);
  let abs_dir = dir.starts_with(sep);
  if abs_name && abs_dir {
    format!("{}{}", dir, &name[1..])
  } else if abs_name {
    match name.rfind(sep) {
      Some(i) => format!("{}{}{}", &name[..i + 1], dir, &name[i + 1..]),
      None => format!("{}{}", dir, name),
    }
  } else {
    format!("{}{}", dir, name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn artifact_names_shorten_three_character_extensions() {
    assert_eq!(artifact_name("f.cpp", '$', false), "f.cp$");
    assert_eq!(artifact_name("f.cpp", '~', false), "f.cp~");
    assert_eq!(artifact_name("f.c", '$', false), "f.c$");
    assert_eq!(artifact_name("f", '$', false), "f.$");
  }

  #[test]
  fn artifact_names_refuse_existing_markers_without_force() {
    // Without force the marker collapses onto itself, which the caller
    // detects as "unsupported extension".
    assert_eq!(artifact_name("f.cp$", '$', false), "f.cp$");
    assert_eq!(artifact_name("f.cp$", '$', true), "f.cp$$");
  }

  #[test]
  fn out_dest_inserts_relative_dir_before_absolute_basename() {
    assert_eq!(out_dest("out/", "src/file.js"), "out/src/file.js");
    assert_eq!(out_dest("out/", "/src/file.js"), "/src/out/file.js");
    assert_eq!(out_dest("/out/", "/src/file.js"), "/out/src/file.js");
  }
}
