use once_cell::sync::Lazy;

/// A set of byte values, the byte-oriented sibling of a character filter.
#[derive(Clone)]
pub struct ByteFilter {
  member: [bool; 256],
}

impl ByteFilter {
  pub fn new() -> ByteFilter {
    ByteFilter {
      member: [false; 256],
    }
  }

  pub fn add_byte(&mut self, b: u8) {
    self.member[b as usize] = true;
  }

  pub fn add_bytes(&mut self, bytes: &[u8]) {
    for &b in bytes {
      self.add_byte(b);
    }
  }

  pub fn has(&self, b: u8) -> bool {
    self.member[b as usize]
  }
}

impl Default for ByteFilter {
  fn default() -> Self {
    ByteFilter::new()
  }
}

fn filter(bytes: &'static [u8]) -> ByteFilter {
  let mut f = ByteFilter::new();
  f.add_bytes(bytes);
  f
}

/// Horizontal whitespace inside a line.
pub static HSPACE: Lazy<ByteFilter> = Lazy::new(|| filter(b"\t "));

/// Bytes that may directly precede a keyword token in the output buffer.
pub static TOKEN_BOUNDARY: Lazy<ByteFilter> = Lazy::new(|| filter(b"\t (),:;[]{}"));

/// Stack tags never chosen as split points when a line is broken up.
pub static SPLIT_SKIP_TAGS: Lazy<ByteFilter> = Lazy::new(|| filter(b" ,:;"));

/// Stack tags of pseudo-levels, skipped when popping real closers.
pub static PSEUDO_TAGS: Lazy<ByteFilter> = Lazy::new(|| filter(b" :;"));

/// Stack tags of resolved/unresolved ternary levels, popped by `;` and `,`.
pub static TERNARY_TAGS: Lazy<ByteFilter> = Lazy::new(|| filter(b":;"));

/// Stack tags holding a pending single-statement body, popped by `{`.
pub static BODY_PENDING_TAGS: Lazy<ByteFilter> = Lazy::new(|| filter(b" ;"));

/// Output bytes after which a `/` starts a regex literal rather than division.
pub static REGEX_PRECEDERS: Lazy<ByteFilter> = Lazy::new(|| filter(b"(,:;=?[{"));

/// Output bytes after which a stripped comment needs no separating space.
pub static STRIP_TIGHT: Lazy<ByteFilter> = Lazy::new(|| filter(b"(,:;=[{"));

/// Input bytes before `:` `;` `=` `?` that suppress an inserted space.
pub static OPERATOR_CONTEXT: Lazy<ByteFilter> = Lazy::new(|| filter(b"!(,:;<=>?[{~"));

/// Bytes forming the operator run of a compound assignment.
pub static OPERATOR_RUN: Lazy<ByteFilter> = Lazy::new(|| filter(b"%&*+-/^|~"));

/// Output bytes after which `{` needs no separating space.
pub static BRACE_TIGHT: Lazy<ByteFilter> = Lazy::new(|| filter(b"!$(@[{~"));

/// Directory separators recognized in path arguments.
pub static DIR_SEPARATOR: Lazy<ByteFilter> = Lazy::new(|| filter(b"/:\\"));

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn filter_membership() {
    let mut f = ByteFilter::new();
    f.add_bytes(b"ab");
    assert!(f.has(b'a'));
    assert!(f.has(b'b'));
    assert!(!f.has(b'c'));
  }

  #[test]
  fn pseudo_tags_are_a_subset_of_split_skip_tags() {
    for b in 0..=255u8 {
      if PSEUDO_TAGS.has(b) {
        assert!(SPLIT_SKIP_TAGS.has(b));
      }
    }
  }
}
