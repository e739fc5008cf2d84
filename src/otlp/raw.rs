use serde::Deserialize;

use crate::model::value::RawKeyValue;
use crate::otlp::ids::RawId;

/// The OTLP/JSON `ResourceSpans` payload the converter accepts. This is a
/// hand-written transport shape over `serde_json`, not the protobuf-derived
/// `opentelemetry-proto` types — the wire-level gRPC/HTTP ingest endpoint is
/// out of scope, only this payload shape is.
#[derive(Debug, Clone, Deserialize)]
pub struct RawResourceSpans {
    pub resource: Option<RawResource>,
    #[serde(rename = "scopeSpans", default)]
    pub scope_spans: Vec<RawScopeSpans>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawResource {
    #[serde(default)]
    pub attributes: Vec<RawKeyValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawScopeSpans {
    pub scope: Option<RawScope>,
    #[serde(default)]
    pub spans: Vec<RawSpan>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawScope {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub attributes: Vec<RawKeyValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSpan {
    #[serde(rename = "traceId")]
    pub trace_id: RawId,
    #[serde(rename = "spanId")]
    pub span_id: RawId,
    #[serde(rename = "parentSpanId", default)]
    pub parent_span_id: Option<RawId>,
    pub name: String,
    #[serde(default)]
    pub kind: Option<i32>,
    #[serde(rename = "startTimeUnixNano")]
    pub start_time_unix_nano: StringOrNumber,
    #[serde(rename = "endTimeUnixNano", default)]
    pub end_time_unix_nano: Option<StringOrNumber>,
    #[serde(default)]
    pub attributes: Vec<RawKeyValue>,
    #[serde(default)]
    pub events: Vec<RawSpanEvent>,
    #[serde(default)]
    pub links: Vec<RawSpanLink>,
    #[serde(default)]
    pub status: Option<RawStatus>,
}

/// OTLP JSON transports `fixed64` nanosecond timestamps as either a number
/// or a numeric string, same rationale as [`crate::model::value::IntOrString`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrNumber {
    Number(u64),
    String(String),
}

impl StringOrNumber {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            StringOrNumber::Number(n) => Some(*n),
            StringOrNumber::String(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSpanEvent {
    pub name: String,
    #[serde(rename = "timeUnixNano", default)]
    pub time_unix_nano: Option<StringOrNumber>,
    #[serde(default)]
    pub attributes: Vec<RawKeyValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSpanLink {
    #[serde(rename = "traceId")]
    pub trace_id: RawId,
    #[serde(rename = "spanId")]
    pub span_id: RawId,
    #[serde(default)]
    pub attributes: Vec<RawKeyValue>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: Option<String>,
}
