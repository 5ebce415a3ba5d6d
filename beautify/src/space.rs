/// The single active rule governing how pending whitespace is rendered
/// before the next token. Exactly one policy is in force at any time; the
/// independent engine booleans (changed, backslash-pending, ...) live on the
/// engine itself.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SpacePolicy {
  /// Drop all pending whitespace.
  Strip,
  /// Guarantee exactly one space before the next token.
  Needed,
  /// Pass whitespace through unmodified.
  AsIs,
  /// Force a line break before the next token.
  NeedLinefeed,
}
