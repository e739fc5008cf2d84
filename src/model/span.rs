use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// `trace_id` is a 32-char lowercase hex string (128 bits).
pub const TRACE_ID_LEN: usize = 32;
/// `span_id`/`parent_span_id` is a 16-char lowercase hex string (64 bits).
pub const SPAN_ID_LEN: usize = 16;

pub const ALL_ZERO_SPAN_ID: &str = "0000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl Default for SpanKind {
    fn default() -> Self {
        SpanKind::Unspecified
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Unset,
    Ok,
    Error,
}

impl Default for StatusCode {
    fn default() -> Self {
        StatusCode::Unset
    }
}

/// A single span event (`events[]` on [`Span`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub attributes: BTreeMap<String, String>,
}

/// A cross-span link (`links[]` on [`Span`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
    pub attributes: BTreeMap<String, String>,
}

/// The canonical event: one row per OTLP span, all vendor dialects normalised.
///
/// Stored in the columnar store's `otel_traces` table. Never mutated after
/// ingestion except via merge-on-read (the store's insert-wins policy) or a
/// soft-delete tombstone (`deleted_at`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub project_id: String,

    pub span_name: String,
    pub span_kind: SpanKind,
    pub status_code: StatusCode,
    pub status_message: Option<String>,

    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ns: Option<i64>,

    pub span_attributes: BTreeMap<String, String>,
    pub resource_attributes: BTreeMap<String, String>,
    pub scope_attributes: BTreeMap<String, String>,

    pub input: Option<String>,
    pub input_mime_type: Option<String>,
    pub input_truncated: bool,
    pub output: Option<String>,
    pub output_mime_type: Option<String>,
    pub output_truncated: bool,

    pub usage_details: BTreeMap<String, u64>,
    pub cost_details: BTreeMap<String, Decimal>,
    pub pricing_snapshot: BTreeMap<String, Decimal>,
    pub total_cost: Decimal,

    pub events: Vec<SpanEvent>,
    pub links: Vec<SpanLink>,

    pub deleted_at: Option<DateTime<Utc>>,
    /// Trace-wide: `UpdateTraceTags`/`UpdateTraceBookmark` set the same
    /// value on every span sharing `trace_id`, mirroring the `ALTER TABLE
    /// ... WHERE trace_id = ?` update both stores issue.
    pub tags: Vec<String>,
    pub bookmarked: bool,
}

impl Span {
    /// A span is root iff it has no effective parent, per the three-shape
    /// normalisation `is_root` collapses over (absent / all-zero hex /
    /// all-zero bytes / `{"data":[0...]}`) — by the time a [`Span`] exists,
    /// the converter has already reduced all of those to `None`.
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn validate_ids(&self) -> CoreResult<()> {
        validate_trace_id(&self.trace_id)?;
        validate_span_id(&self.span_id)?;
        if let Some(parent) = &self.parent_span_id {
            validate_span_id(parent)?;
        }
        Ok(())
    }

    /// `duration_ns = end_time - start_time` when both are present.
    pub fn compute_duration(&mut self) {
        self.duration_ns = self
            .end_time
            .map(|end| (end - self.start_time).num_nanoseconds().unwrap_or(0));
    }
}

pub fn validate_trace_id(s: &str) -> CoreResult<()> {
    if s.len() != TRACE_ID_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CoreError::Validation(format!(
            "trace_id must be {TRACE_ID_LEN} lowercase hex chars, got {s:?}"
        )));
    }
    Ok(())
}

pub fn validate_span_id(s: &str) -> CoreResult<()> {
    if s.len() != SPAN_ID_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CoreError::Validation(format!(
            "span_id must be {SPAN_ID_LEN} lowercase hex chars, got {s:?}"
        )));
    }
    Ok(())
}

/// Collapses the root-span predicate over a raw, not-yet-normalised parent
/// id: `None`, the empty string, the all-zero hex string, or an all-zero
/// byte sequence are all "no parent".
pub fn parent_is_root(parent_hex: Option<&str>) -> bool {
    match parent_hex {
        None => true,
        Some(s) if s.is_empty() => true,
        Some(s) if s == ALL_ZERO_SPAN_ID => true,
        Some(s) => s.bytes().all(|b| b == b'0'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_span() -> Span {
        Span {
            trace_id: "a".repeat(TRACE_ID_LEN),
            span_id: "b".repeat(SPAN_ID_LEN),
            parent_span_id: None,
            project_id: "proj1".into(),
            span_name: "chat.completion".into(),
            span_kind: SpanKind::Internal,
            status_code: StatusCode::Ok,
            status_message: None,
            start_time: Utc::now(),
            end_time: None,
            duration_ns: None,
            span_attributes: BTreeMap::new(),
            resource_attributes: BTreeMap::new(),
            scope_attributes: BTreeMap::new(),
            input: None,
            input_mime_type: None,
            input_truncated: false,
            output: None,
            output_mime_type: None,
            output_truncated: false,
            usage_details: BTreeMap::new(),
            cost_details: BTreeMap::new(),
            pricing_snapshot: BTreeMap::new(),
            total_cost: Decimal::ZERO,
            events: Vec::new(),
            links: Vec::new(),
            deleted_at: None,
            tags: Vec::new(),
            bookmarked: false,
        }
    }

    #[test]
    fn root_span_has_no_parent() {
        assert!(sample_span().is_root());
    }

    #[test]
    fn non_root_span_has_parent() {
        let mut s = sample_span();
        s.parent_span_id = Some("c".repeat(SPAN_ID_LEN));
        assert!(!s.is_root());
    }

    #[test]
    fn validate_trace_id_rejects_wrong_length() {
        assert!(validate_trace_id("abc").is_err());
    }

    #[test]
    fn validate_trace_id_rejects_uppercase() {
        assert!(validate_trace_id(&"A".repeat(TRACE_ID_LEN)).is_err());
    }

    #[test]
    fn validate_span_id_accepts_valid_hex() {
        assert!(validate_span_id(&"0123456789abcdef").is_ok());
    }

    #[test]
    fn parent_is_root_recognizes_all_zero_variants() {
        assert!(parent_is_root(None));
        assert!(parent_is_root(Some("")));
        assert!(parent_is_root(Some(ALL_ZERO_SPAN_ID)));
        assert!(parent_is_root(Some("0000000000000000")));
        assert!(!parent_is_root(Some("0000000000000001")));
    }

    #[test]
    fn compute_duration_sets_nanoseconds() {
        let mut s = sample_span();
        s.end_time = Some(s.start_time + chrono::Duration::milliseconds(5));
        s.compute_duration();
        assert_eq!(s.duration_ns, Some(5_000_000));
    }

    #[test]
    fn compute_duration_none_without_end_time() {
        let mut s = sample_span();
        s.compute_duration();
        assert_eq!(s.duration_ns, None);
    }
}
