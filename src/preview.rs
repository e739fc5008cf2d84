/// Maximum size, in bytes, of an input/output value stored in the
/// canonical event before truncation kicks in.
pub const MAX_VALUE_SIZE_BYTES: usize = 1024 * 1024;

pub const TRUNCATION_SUFFIX: &str = "…[truncated]";

/// Truncate `value` to `max_bytes` on a char boundary and append the
/// truncation suffix, reporting whether truncation occurred.
pub fn truncate_value(value: &str, max_bytes: usize) -> (String, bool) {
    if value.len() <= max_bytes {
        return (value.to_string(), false);
    }
    let mut cut = max_bytes;
    while cut > 0 && !value.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = value[..cut].to_string();
    truncated.push_str(TRUNCATION_SUFFIX);
    (truncated, true)
}

/// If a declared mime type is `application/json` but the value doesn't
/// parse as JSON, downgrade to `text/plain`. If no mime type is declared,
/// auto-detect (valid JSON -> `application/json`, else `text/plain`). A
/// value declared `text/plain` is preserved verbatim even if it happens to
/// parse as JSON — the field describes how to interpret, not what it must be.
pub fn detect_mime_type(value: &str, declared: Option<&str>) -> String {
    match declared {
        Some("application/json") if serde_json::from_str::<serde_json::Value>(value).is_err() => {
            "text/plain".to_string()
        }
        Some(mime) => mime.to_string(),
        None => {
            if serde_json::from_str::<serde_json::Value>(value).is_ok() {
                "application/json".to_string()
            } else {
                "text/plain".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_value_is_not_truncated() {
        let (out, truncated) = truncate_value("hello", 1024);
        assert_eq!(out, "hello");
        assert!(!truncated);
    }

    #[test]
    fn oversized_value_gets_truncation_suffix() {
        let value = "a".repeat(20);
        let (out, truncated) = truncate_value(&value, 10);
        assert!(truncated);
        assert!(out.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(&out[..10], "a".repeat(10).as_str());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let value = "a".repeat(9) + "é"; // multi-byte char at the boundary
        let (out, truncated) = truncate_value(&value, 10);
        assert!(truncated);
        assert!(out.is_char_boundary(out.len() - TRUNCATION_SUFFIX.len()));
    }

    #[test]
    fn declared_json_downgrades_when_invalid() {
        assert_eq!(
            detect_mime_type("not json", Some("application/json")),
            "text/plain"
        );
    }

    #[test]
    fn declared_text_plain_preserved_even_if_json_parses() {
        assert_eq!(detect_mime_type("{\"a\":1}", Some("text/plain")), "text/plain");
    }

    #[test]
    fn undeclared_valid_json_autodetects() {
        assert_eq!(detect_mime_type("{\"a\":1}", None), "application/json");
    }

    #[test]
    fn undeclared_plain_text_autodetects() {
        assert_eq!(detect_mime_type("hello world", None), "text/plain");
    }
}
