use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::model::span::{Span, SpanEvent, SpanKind, SpanLink, StatusCode};
use crate::model::usage::{self, UsageDetails};
use crate::model::value::{extract_attributes, extract_value, RawAnyValue};
use crate::otlp::attrs;
use crate::otlp::ids::{self, RawId};
use crate::otlp::raw::{RawResourceSpans, RawSpan, StringOrNumber};
use crate::pricing::{self, PricingProvider};

/// Configuration the converter consults (max attribute/value sizes,
/// whether to preserve the raw OTLP payload alongside the canonical event).
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub max_value_size_bytes: usize,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            max_value_size_bytes: crate::preview::MAX_VALUE_SIZE_BYTES,
        }
    }
}

/// Synthesised when a root span is observed: carries project
/// release/version metadata for trace-level enrichment. `brokle.version`
/// is deliberately NOT carried here — it's a per-span attribute extracted
/// directly by the store.
#[derive(Debug, Clone)]
pub struct TraceSynthesisEvent {
    pub trace_id: String,
    pub project_id: String,
    pub release: Option<String>,
}

#[derive(Debug, Default)]
pub struct ConvertedBatch {
    pub spans: Vec<Span>,
    pub trace_events: Vec<TraceSynthesisEvent>,
    /// Per-span failures (e.g. `InvalidIdentifier`); other spans in the
    /// same batch still proceed.
    pub errors: Vec<CoreError>,
}

/// Convert one OTLP `ResourceSpans` payload into canonical events.
pub async fn convert_resource_spans(
    raw: &RawResourceSpans,
    project_id: &str,
    pricing: &dyn PricingProvider,
    config: &ConverterConfig,
) -> ConvertedBatch {
    let resource_attrs = raw
        .resource
        .as_ref()
        .map(|r| extract_attributes(&r.attributes))
        .unwrap_or_default();

    let mut batch = ConvertedBatch::default();

    for scope_spans in &raw.scope_spans {
        let scope_attrs = scope_spans
            .scope
            .as_ref()
            .map(|s| extract_attributes(&s.attributes))
            .unwrap_or_default();
        let scope_name = scope_spans
            .scope
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or_default();

        for raw_span in &scope_spans.spans {
            match convert_span(
                raw_span,
                &resource_attrs,
                &scope_attrs,
                scope_name,
                project_id,
                pricing,
                config,
            )
            .await
            {
                Ok((span, trace_event)) => {
                    if let Some(event) = trace_event {
                        batch.trace_events.push(event);
                    }
                    batch.spans.push(span);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "dropping span during conversion");
                    batch.errors.push(err);
                }
            }
        }
    }

    batch
}

async fn convert_span(
    raw_span: &RawSpan,
    resource_attrs: &BTreeMap<String, String>,
    scope_attrs: &BTreeMap<String, String>,
    scope_name: &str,
    project_id: &str,
    pricing: &dyn PricingProvider,
    config: &ConverterConfig,
) -> Result<(Span, Option<TraceSynthesisEvent>), CoreError> {
    let trace_id = ids::normalize_id(&raw_span.trace_id, 16)?;
    let span_id = ids::normalize_id(&raw_span.span_id, 8)?;
    let is_root = ids::raw_parent_is_root(raw_span.parent_span_id.as_ref());
    let parent_span_id = if is_root {
        None
    } else {
        Some(ids::normalize_id(
            raw_span.parent_span_id.as_ref().expect("checked by raw_parent_is_root"),
            8,
        )?)
    };

    let mut span_attrs = extract_attributes(&raw_span.attributes);

    let merged = merge_attributes(resource_attrs, scope_attrs, &span_attrs);

    let events: Vec<SpanEvent> = raw_span
        .events
        .iter()
        .map(|e| SpanEvent {
            name: e.name.clone(),
            timestamp: e
                .time_unix_nano
                .as_ref()
                .and_then(|t| t.as_u64())
                .and_then(nanos_to_datetime),
            attributes: extract_attributes(&e.attributes),
        })
        .collect();

    let links: Vec<SpanLink> = raw_span
        .links
        .iter()
        .map(|l| -> Result<SpanLink, CoreError> {
            Ok(SpanLink {
                trace_id: ids::normalize_id(&l.trace_id, 16)?,
                span_id: ids::normalize_id(&l.span_id, 8)?,
                attributes: extract_attributes(&l.attributes),
            })
        })
        .filter_map(|r| r.ok())
        .collect();

    let extraction = extract_input_output(&merged, scope_name, &events);

    let (input, input_mime, input_truncated) = match extraction.input {
        Some(v) => {
            let mime = crate::preview::detect_mime_type(&v, extraction.input_mime.as_deref());
            let (truncated_value, truncated) =
                crate::preview::truncate_value(&v, config.max_value_size_bytes);
            (Some(truncated_value), Some(mime), truncated)
        }
        None => (None, None, false),
    };
    let (output, output_mime, output_truncated) = match extraction.output {
        Some(v) => {
            let mime = crate::preview::detect_mime_type(&v, extraction.output_mime.as_deref());
            let (truncated_value, truncated) =
                crate::preview::truncate_value(&v, config.max_value_size_bytes);
            (Some(truncated_value), Some(mime), truncated)
        }
        None => (None, None, false),
    };

    if let Some(chatml) = input.as_deref().and_then(chatml_metadata) {
        span_attrs.extend(chatml);
    }

    span_attrs.extend(extract_tool_metadata(&merged));

    for key in attrs::IO_KEYS_TO_EXCLUDE {
        span_attrs.remove(*key);
    }

    let mut usage_details = extract_usage(&merged);
    usage::recompute_total(&mut usage_details);

    let model_name = merged
        .get(attrs::GEN_AI_REQUEST_MODEL)
        .or_else(|| merged.get(attrs::GEN_AI_RESPONSE_MODEL))
        .cloned();

    let (cost_details, pricing_snapshot, total_cost) = match model_name {
        Some(model) if !usage_details.is_empty() => {
            match pricing.get_snapshot(Some(project_id), &model, Utc::now()).await {
                Ok(snapshot) => {
                    let (costs, total) = pricing::calculate_cost(&usage_details, &snapshot);
                    let snapshot_fields = pricing::snapshot_as_span_fields(&snapshot);
                    (costs, snapshot_fields, total)
                }
                Err(err) => {
                    tracing::warn!(model = %model, error = %err, "pricing lookup failed, continuing without cost fields");
                    (BTreeMap::new(), BTreeMap::new(), rust_decimal::Decimal::ZERO)
                }
            }
        }
        _ => (BTreeMap::new(), BTreeMap::new(), rust_decimal::Decimal::ZERO),
    };

    let start_time = raw_span
        .start_time_unix_nano
        .as_u64()
        .and_then(nanos_to_datetime)
        .unwrap_or_else(Utc::now);
    let end_time = raw_span
        .end_time_unix_nano
        .as_ref()
        .and_then(|t| t.as_u64())
        .and_then(nanos_to_datetime);

    let mut span = Span {
        trace_id: trace_id.clone(),
        span_id,
        parent_span_id,
        project_id: project_id.to_string(),
        span_name: raw_span.name.clone(),
        span_kind: map_span_kind(raw_span.kind.unwrap_or(0)),
        status_code: map_status_code(raw_span.status.as_ref().map(|s| s.code).unwrap_or(0)),
        status_message: raw_span.status.as_ref().and_then(|s| s.message.clone()),
        start_time,
        end_time,
        duration_ns: None,
        span_attributes: span_attrs,
        resource_attributes: resource_attrs.clone(),
        scope_attributes: scope_attrs.clone(),
        input,
        input_mime_type: input_mime,
        input_truncated,
        output,
        output_mime_type: output_mime,
        output_truncated,
        usage_details,
        cost_details,
        pricing_snapshot,
        total_cost,
        events,
        links,
        deleted_at: None,
        tags: Vec::new(),
        bookmarked: false,
    };
    span.compute_duration();

    let trace_event = if is_root {
        Some(TraceSynthesisEvent {
            trace_id,
            project_id: project_id.to_string(),
            release: resource_attrs.get(attrs::BROKLE_RELEASE).cloned(),
        })
    } else {
        None
    };

    Ok((span, trace_event))
}

fn nanos_to_datetime(nanos: u64) -> Option<DateTime<Utc>> {
    let secs = (nanos / 1_000_000_000) as i64;
    let sub_nanos = (nanos % 1_000_000_000) as u32;
    DateTime::from_timestamp(secs, sub_nanos)
}

fn map_span_kind(kind: i32) -> SpanKind {
    match kind {
        1 => SpanKind::Internal,
        2 => SpanKind::Server,
        3 => SpanKind::Client,
        4 => SpanKind::Producer,
        5 => SpanKind::Consumer,
        _ => SpanKind::Unspecified,
    }
}

fn map_status_code(code: i32) -> StatusCode {
    match code {
        1 => StatusCode::Ok,
        2 => StatusCode::Error,
        _ => StatusCode::Unset,
    }
}

/// `resource ∪ scope ∪ span`, later keys win on collision. Only used to
/// drive extraction; the three maps are still stored separately.
fn merge_attributes(
    resource: &BTreeMap<String, String>,
    scope: &BTreeMap<String, String>,
    span: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = resource.clone();
    merged.extend(scope.clone());
    merged.extend(span.clone());
    merged
}

struct ExtractionResult {
    input: Option<String>,
    input_mime: Option<String>,
    output: Option<String>,
    output_mime: Option<String>,
}

/// Four-priority input/output extraction cascade over the merged
/// attribute map: Vercel AI SDK (scope `"ai"` only), OTEL GenAI messages,
/// OpenInference, then OTEL GenAI span events as last resort.
fn extract_input_output(
    merged: &BTreeMap<String, String>,
    scope_name: &str,
    events: &[SpanEvent],
) -> ExtractionResult {
    if scope_name == attrs::VERCEL_SCOPE_NAME {
        if let Some(result) = extract_vercel(merged) {
            return result;
        }
    }

    if let Some(result) = extract_gen_ai_messages(merged) {
        return result;
    }

    if let Some(result) = extract_openinference(merged) {
        return result;
    }

    extract_gen_ai_events(events)
}

fn extract_vercel(merged: &BTreeMap<String, String>) -> Option<ExtractionResult> {
    let input = merged
        .get(attrs::VERCEL_PROMPT_MESSAGES)
        .cloned();
    let text = merged
        .get(attrs::VERCEL_RESPONSE_TEXT)
        .or_else(|| merged.get(attrs::VERCEL_RESULT_TEXT));
    let tool_calls = merged
        .get(attrs::VERCEL_RESPONSE_TOOL_CALLS)
        .or_else(|| merged.get(attrs::VERCEL_RESULT_TOOL_CALLS));

    if input.is_none() && text.is_none() && tool_calls.is_none() {
        return None;
    }

    let output = if text.is_some() || tool_calls.is_some() {
        let content = text.map(|s| serde_json::Value::String(s.clone()));
        let tool_calls_value = tool_calls.and_then(|s| serde_json::from_str(s).ok());
        let mut message = serde_json::json!({ "role": "assistant" });
        if let Some(content) = content {
            message["content"] = content;
        }
        if let Some(tc) = tool_calls_value {
            message["tool_calls"] = tc;
        }
        Some(message.to_string())
    } else {
        None
    };

    Some(ExtractionResult {
        input,
        input_mime: None,
        output,
        output_mime: None,
    })
}

fn extract_gen_ai_messages(merged: &BTreeMap<String, String>) -> Option<ExtractionResult> {
    let mut input = merged.get(attrs::GEN_AI_INPUT_MESSAGES).cloned();
    let output = merged.get(attrs::GEN_AI_OUTPUT_MESSAGES).cloned();

    if input.is_none() && output.is_none() {
        return None;
    }

    if let Some(system) = merged.get(attrs::GEN_AI_SYSTEM_INSTRUCTIONS) {
        input = Some(prepend_system_instructions(input.as_deref(), system));
    }

    Some(ExtractionResult {
        input,
        input_mime: None,
        output,
        output_mime: None,
    })
}

fn prepend_system_instructions(existing: Option<&str>, system: &str) -> String {
    let system_msg = serde_json::json!({ "role": "system", "content": system });
    let mut messages: Vec<serde_json::Value> = existing
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    messages.insert(0, system_msg);
    serde_json::Value::Array(messages).to_string()
}

fn extract_openinference(merged: &BTreeMap<String, String>) -> Option<ExtractionResult> {
    let input = merged.get(attrs::OPENINFERENCE_INPUT_VALUE).cloned();
    let output = merged.get(attrs::OPENINFERENCE_OUTPUT_VALUE).cloned();
    if input.is_none() && output.is_none() {
        return None;
    }
    Some(ExtractionResult {
        input,
        input_mime: merged.get(attrs::OPENINFERENCE_INPUT_MIME_TYPE).cloned(),
        output,
        output_mime: merged.get(attrs::OPENINFERENCE_OUTPUT_MIME_TYPE).cloned(),
    })
}

/// Last-resort extraction: synthesise message arrays from
/// `gen_ai.{user,system,assistant,tool}.message` event names; `gen_ai.choice`
/// events produce the output.
fn extract_gen_ai_events(events: &[SpanEvent]) -> ExtractionResult {
    let mut input_messages = Vec::new();
    let mut output_messages = Vec::new();

    for event in events {
        let role = match event.name.as_str() {
            n if n == attrs::GEN_AI_EVENT_USER_MESSAGE => Some("user"),
            n if n == attrs::GEN_AI_EVENT_SYSTEM_MESSAGE => Some("system"),
            n if n == attrs::GEN_AI_EVENT_ASSISTANT_MESSAGE => Some("assistant"),
            n if n == attrs::GEN_AI_EVENT_TOOL_MESSAGE => Some("tool"),
            _ => None,
        };
        if let Some(role) = role {
            let content = event.attributes.get("content").cloned().unwrap_or_default();
            input_messages.push(serde_json::json!({ "role": role, "content": content }));
        } else if event.name == attrs::GEN_AI_EVENT_CHOICE {
            let content = event.attributes.get("message").cloned().unwrap_or_default();
            output_messages.push(serde_json::json!({ "role": "assistant", "content": content }));
        }
    }

    ExtractionResult {
        input: (!input_messages.is_empty())
            .then(|| serde_json::Value::Array(input_messages).to_string()),
        input_mime: None,
        output: (!output_messages.is_empty())
            .then(|| serde_json::Value::Array(output_messages).to_string()),
        output_mime: None,
    }
}

/// Derive `brokle.llm.*` keys from a JSON message array with `role` on its
/// first element.
fn chatml_metadata(input: &str) -> Option<BTreeMap<String, String>> {
    let parsed: serde_json::Value = serde_json::from_str(input).ok()?;
    let messages = parsed.as_array()?;
    if messages.is_empty() || messages[0].get("role").is_none() {
        return None;
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut has_tool_calls = false;
    for message in messages {
        if let Some(role) = message.get("role").and_then(|r| r.as_str()) {
            *counts.entry(role_bucket(role)).or_insert(0) += 1;
        }
        if message.get("tool_calls").is_some() {
            has_tool_calls = true;
        }
    }

    let first_role = messages[0].get("role").and_then(|r| r.as_str()).unwrap_or("");
    let last_role = messages
        .last()
        .and_then(|m| m.get("role"))
        .and_then(|r| r.as_str())
        .unwrap_or("");

    let mut out = BTreeMap::new();
    out.insert("brokle.llm.message_count".to_string(), messages.len().to_string());
    out.insert(
        "user_message_count".to_string(),
        counts.get("user").copied().unwrap_or(0).to_string(),
    );
    out.insert(
        "assistant_message_count".to_string(),
        counts.get("assistant").copied().unwrap_or(0).to_string(),
    );
    out.insert(
        "system_message_count".to_string(),
        counts.get("system").copied().unwrap_or(0).to_string(),
    );
    out.insert(
        "tool_message_count".to_string(),
        counts.get("tool").copied().unwrap_or(0).to_string(),
    );
    out.insert("brokle.llm.first_role".to_string(), first_role.to_string());
    out.insert("brokle.llm.last_role".to_string(), last_role.to_string());
    out.insert("brokle.llm.has_tool_calls".to_string(), has_tool_calls.to_string());
    Some(out)
}

fn role_bucket(role: &str) -> &'static str {
    match role {
        "user" => "user",
        "assistant" => "assistant",
        "system" => "system",
        "tool" => "tool",
        _ => "other",
    }
}

/// When `gen_ai.tool.name` is set, extract tool metadata keys,
/// stringifying non-string values as JSON.
fn extract_tool_metadata(merged: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(tool_name) = merged.get(attrs::GEN_AI_TOOL_NAME) {
        out.insert("tool_name".to_string(), tool_name.clone());
        if let Some(v) = merged.get(attrs::GEN_AI_TOOL_PARAMETERS) {
            out.insert("tool_parameters".to_string(), v.clone());
        }
        if let Some(v) = merged.get(attrs::GEN_AI_TOOL_RESULT) {
            out.insert("tool_result".to_string(), v.clone());
        }
        if let Some(v) = merged.get(attrs::GEN_AI_TOOL_CALL_ID) {
            out.insert("tool_call_id".to_string(), v.clone());
        }
    }
    out
}

/// Map usage-token attributes into `usage_details`, accepting float/int/
/// string shapes and coercing to unsigned 64-bit.
fn extract_usage(merged: &BTreeMap<String, String>) -> UsageDetails {
    let mut usage = UsageDetails::new();
    let fields: &[(&str, &str)] = &[
        (attrs::GEN_AI_USAGE_INPUT_TOKENS, usage::keys::INPUT),
        (attrs::GEN_AI_USAGE_OUTPUT_TOKENS, usage::keys::OUTPUT),
        (
            attrs::GEN_AI_USAGE_CACHE_READ_INPUT_TOKENS,
            usage::keys::CACHE_READ_INPUT_TOKENS,
        ),
        (
            attrs::GEN_AI_USAGE_CACHE_CREATION_INPUT_TOKENS,
            usage::keys::CACHE_CREATION_INPUT_TOKENS,
        ),
        (attrs::GEN_AI_USAGE_REASONING_TOKENS, usage::keys::REASONING_TOKENS),
        (attrs::GEN_AI_USAGE_AUDIO_INPUT_TOKENS, usage::keys::AUDIO_INPUT),
        (attrs::GEN_AI_USAGE_AUDIO_OUTPUT_TOKENS, usage::keys::AUDIO_OUTPUT),
        (attrs::GEN_AI_USAGE_IMAGE_TOKENS, usage::keys::IMAGE_TOKENS),
        (attrs::GEN_AI_USAGE_VIDEO_TOKENS, usage::keys::VIDEO_TOKENS),
    ];

    for (attr_key, usage_key) in fields {
        if let Some(raw) = merged.get(*attr_key) {
            if let Some(n) = parse_flexible_u64(raw) {
                usage.insert(usage_key.to_string(), n);
            }
        }
    }
    usage
}

fn parse_flexible_u64(raw: &str) -> Option<u64> {
    raw.parse::<u64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Walk a single OTLP `AnyValue` JSON blob directly (used by callers that
/// hold a raw value rather than a flattened attribute map, e.g. tests).
pub fn any_value_from_raw(raw: &RawAnyValue) -> crate::model::value::Value {
    extract_value(raw)
}
