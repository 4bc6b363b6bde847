//! # Temp ID Generation and Recognition
//!
//! Entities created while offline receive a locally-assigned temp ID of the
//! form `temp_<13-digit ms timestamp>_<6 lowercase base36 chars>`. The server
//! later assigns the permanent identifier; the ID Mapper rewrites every
//! stored reference once the mapping is learned.
//!
//! Recognition is prefix-based: any string value starting with `temp_` is
//! treated as a temp ID wherever it appears (primary keys and FK fields).

use serde_json::Value;
use uuid::Uuid;

use crate::types::now_ms;

/// Literal prefix shared by every temp ID.
pub const TEMP_ID_PREFIX: &str = "temp_";

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 6;

/// Generates a fresh temp ID.
///
/// The timestamp segment is the current epoch millisecond count, zero-padded
/// to 13 digits; the suffix is 6 base36 characters of per-call entropy.
pub fn generate_temp_id() -> String {
    format!("{}{:013}_{}", TEMP_ID_PREFIX, now_ms(), random_suffix())
}

/// Returns true if the string is a temp ID.
pub fn is_temp_id(value: &str) -> bool {
    value.starts_with(TEMP_ID_PREFIX)
}

/// Returns true if the JSON value is a string temp ID.
pub fn is_temp_value(value: &Value) -> bool {
    matches!(value, Value::String(s) if is_temp_id(s))
}

/// Six base36 characters derived from a v4 UUID.
fn random_suffix() -> String {
    let mut n = Uuid::new_v4().as_u128();
    let mut out = String::with_capacity(SUFFIX_LEN);
    for _ in 0..SUFFIX_LEN {
        out.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
    }
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_ids_match_the_wire_format() {
        let id = generate_temp_id();
        assert!(id.starts_with(TEMP_ID_PREFIX));

        let rest = &id[TEMP_ID_PREFIX.len()..];
        let (millis, suffix) = rest.split_once('_').expect("timestamp_suffix split");

        assert_eq!(millis.len(), 13);
        assert!(millis.bytes().all(|b| b.is_ascii_digit()));

        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = generate_temp_id();
        let b = generate_temp_id();
        assert_ne!(a, b);
    }

    #[test]
    fn recognition_is_prefix_based() {
        assert!(is_temp_id("temp_1700000000000_a1b2c3"));
        assert!(!is_temp_id("501"));
        assert!(!is_temp_id("tmp_1700000000000_a1b2c3"));

        assert!(is_temp_value(&json!("temp_1700000000000_a1b2c3")));
        assert!(!is_temp_value(&json!(501)));
        assert!(!is_temp_value(&json!({"id": "temp_x"})));
    }
}
