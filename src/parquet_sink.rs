use crate::error::{CoreError, CoreResult};

const MIN_LEVEL: i32 = 1;
const MAX_LEVEL: i32 = 22;

fn speed_tier(level: i32) -> &'static str {
    match level {
        1 => "fastest",
        2..=3 => "default",
        4..=9 => "better",
        _ => "best",
    }
}

fn clamp_level(level: i32) -> i32 {
    level.clamp(MIN_LEVEL, MAX_LEVEL)
}

/// Serialises `records` as newline-delimited JSON and zstd-compresses the
/// result. `level` is clamped into `[1, 22]` before use; the archival
/// Parquet encoding itself (column layout, row groups) is the real sink's
/// concern and out of scope here — this crate only owns the compression
/// step the sink contract names.
pub fn write_records<T: serde::Serialize>(records: &[T], level: i32) -> CoreResult<Vec<u8>> {
    let level = clamp_level(level);
    tracing::debug!(level, tier = speed_tier(level), n = records.len(), "compressing records");

    let mut uncompressed = Vec::new();
    for record in records {
        serde_json::to_writer(&mut uncompressed, record)
            .map_err(|e| CoreError::Internal(format!("record serialization failed: {e}")))?;
        uncompressed.push(b'\n');
    }

    zstd::stream::encode_all(uncompressed.as_slice(), level)
        .map_err(|e| CoreError::Internal(format!("zstd compression failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Record {
        id: u32,
        name: String,
    }

    #[test]
    fn clamp_level_respects_bounds() {
        assert_eq!(clamp_level(0), 1);
        assert_eq!(clamp_level(1), 1);
        assert_eq!(clamp_level(22), 22);
        assert_eq!(clamp_level(100), 22);
        assert_eq!(clamp_level(-5), 1);
    }

    #[test]
    fn speed_tier_table_matches_documented_ranges() {
        assert_eq!(speed_tier(1), "fastest");
        assert_eq!(speed_tier(2), "default");
        assert_eq!(speed_tier(3), "default");
        assert_eq!(speed_tier(4), "better");
        assert_eq!(speed_tier(9), "better");
        assert_eq!(speed_tier(10), "best");
        assert_eq!(speed_tier(22), "best");
    }

    #[test]
    fn write_records_roundtrips_through_zstd() {
        let records = vec![
            Record { id: 1, name: "a".into() },
            Record { id: 2, name: "b".into() },
        ];
        let compressed = write_records(&records, 3).unwrap();
        let decompressed = zstd::stream::decode_all(compressed.as_slice()).unwrap();
        let text = String::from_utf8(decompressed).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"name\":\"a\""));
    }

    #[test]
    fn out_of_range_level_is_clamped_not_rejected() {
        let records = vec![Record { id: 1, name: "a".into() }];
        assert!(write_records(&records, 999).is_ok());
        assert!(write_records(&records, -10).is_ok());
    }

    #[test]
    fn empty_records_produce_valid_empty_archive() {
        let records: Vec<Record> = Vec::new();
        let compressed = write_records(&records, 1).unwrap();
        let decompressed = zstd::stream::decode_all(compressed.as_slice()).unwrap();
        assert!(decompressed.is_empty());
    }
}
