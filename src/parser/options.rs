use crate::codec::PaxAttributes;

pub struct ParserLimits {
  /// The maximum body size of a meta entry (pax data, GNU long names)
  /// the parser is willing to buffer in memory. Larger meta entries are
  /// reported and skipped.
  pub max_meta_entry_size: u64,
}

pub struct ParserOptions {
  /// Global extended attributes in effect before the first `g` record,
  /// as if a global extended header had already been parsed.
  pub initial_global_attributes: PaxAttributes,
  pub limits: ParserLimits,
}

impl Default for ParserOptions {
  fn default() -> Self {
    Self {
      initial_global_attributes: PaxAttributes::global(),
      limits: ParserLimits {
        max_meta_entry_size: 1024 * 1024,
      },
    }
  }
}
