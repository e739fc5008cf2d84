use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

/// OTLP trace/span/parent IDs arrive in one of three JSON-transport shapes:
/// a hex string, a raw byte array, or `{"data":[...]}` (seen from some
/// JSON-bridging OTLP exporters). All three normalise to the same
/// lowercase-hex canonical form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Hex(String),
    Bytes(Vec<u8>),
    DataObject { data: Vec<u8> },
}

impl RawId {
    fn as_bytes_view(&self) -> Result<Vec<u8>, CoreError> {
        match self {
            RawId::Hex(s) => {
                hex_decode(s).ok_or_else(|| CoreError::InvalidIdentifier(format!("invalid hex id {s:?}")))
            }
            RawId::Bytes(b) => Ok(b.clone()),
            RawId::DataObject { data } => Ok(data.clone()),
        }
    }

    /// Whether this id, in whichever shape it arrived, is "all zero" —
    /// used by the root-span predicate for the parent id.
    pub fn is_all_zero(&self) -> bool {
        match self {
            RawId::Hex(s) => !s.is_empty() && s.bytes().all(|b| b == b'0'),
            RawId::Bytes(b) | RawId::DataObject { data: b } => !b.is_empty() && b.iter().all(|&b| b == 0),
        }
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decode and lowercase-hex-normalise an id, failing with
/// `InvalidIdentifier` if the byte length doesn't match `expected_bytes`.
pub fn normalize_id(raw: &RawId, expected_bytes: usize) -> CoreResult<String> {
    let bytes = raw.as_bytes_view()?;
    if bytes.len() != expected_bytes {
        return Err(CoreError::InvalidIdentifier(format!(
            "expected {expected_bytes} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(to_hex(&bytes))
}

/// Root-span predicate over a not-yet-normalised parent id: absent, empty
/// hex string, all-zero hex string, or an all-zero byte sequence (in
/// either raw-array or `{"data":[...]}` shape) are all "no parent".
pub fn raw_parent_is_root(parent: Option<&RawId>) -> bool {
    match parent {
        None => true,
        Some(id) => match id {
            RawId::Hex(s) if s.is_empty() => true,
            _ => id.is_all_zero(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_hex_string_lowercases() {
        let raw = RawId::Hex("AABBCCDDEEFF0011".to_string());
        let normalized = normalize_id(&raw, 8).unwrap();
        assert_eq!(normalized, "aabbccddeeff0011");
    }

    #[test]
    fn normalize_byte_array() {
        let raw = RawId::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        let normalized = normalize_id(&raw, 4).unwrap();
        assert_eq!(normalized, "deadbeef");
    }

    #[test]
    fn normalize_data_object() {
        let raw = RawId::DataObject { data: vec![1, 2, 3, 4] };
        let normalized = normalize_id(&raw, 4).unwrap();
        assert_eq!(normalized, "01020304");
    }

    #[test]
    fn normalize_rejects_wrong_byte_length() {
        let raw = RawId::Bytes(vec![1, 2]);
        assert!(normalize_id(&raw, 8).is_err());
    }

    #[test]
    fn root_predicate_true_for_none() {
        assert!(raw_parent_is_root(None));
    }

    #[test]
    fn root_predicate_true_for_all_zero_hex() {
        let raw = RawId::Hex("0000000000000000".to_string());
        assert!(raw_parent_is_root(Some(&raw)));
    }

    #[test]
    fn root_predicate_true_for_all_zero_bytes() {
        let raw = RawId::Bytes(vec![0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(raw_parent_is_root(Some(&raw)));
    }

    #[test]
    fn root_predicate_true_for_all_zero_data_object() {
        let raw = RawId::DataObject { data: vec![0; 8] };
        assert!(raw_parent_is_root(Some(&raw)));
    }

    #[test]
    fn root_predicate_false_for_nonzero_id() {
        let raw = RawId::Hex("0000000000000001".to_string());
        assert!(!raw_parent_is_root(Some(&raw)));
    }
}
