//! The secret map (spec §3) and the key-validity rules from spec §4.6.

use std::collections::BTreeMap;

/// Unordered mapping from label to secret value. A `BTreeMap` gives
/// unique keys and, as a side effect, the lexicographic iteration order
/// spec §4.2 wants at persist time; callers never need a separate sort.
pub type SecretMap = BTreeMap<String, String>;

const MAX_KEY_LEN: usize = 256;

/// `InvalidKey` rules: non-empty, <= 256 bytes, no embedded NUL, no
/// leading/trailing whitespace. Anything else is permitted.
pub fn is_valid_key(key: &str) -> bool {
  if key.is_empty() || key.len() > MAX_KEY_LEN {
    return false;
  }
  if key.contains('\0') {
    return false;
  }
  if key.trim() != key {
    return false;
  }
  true
}
