use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::span::Span;

/// A trace is a virtual/derived record: the set of spans sharing `trace_id`.
/// There is no independent trace row; this summary is assembled on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub project_id: String,
    pub root_span_id: Option<String>,
    pub root_span_name: Option<String>,
    pub span_count: u64,
    pub total_cost: Decimal,
    pub total_tokens: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub tags: Vec<String>,
    pub bookmarked: bool,
}

impl TraceSummary {
    /// Aggregate a trace summary from its constituent spans. `spans` need
    /// not be ordered; the root span is whichever member satisfies
    /// [`Span::is_root`].
    pub fn from_spans(trace_id: &str, project_id: &str, spans: &[Span]) -> Option<Self> {
        if spans.is_empty() {
            return None;
        }
        let root = spans.iter().find(|s| s.is_root());
        let total_cost = spans.iter().map(|s| s.total_cost).sum();
        let total_tokens: u64 = spans
            .iter()
            .filter_map(|s| s.usage_details.get("total"))
            .sum();
        let start_time = spans
            .iter()
            .map(|s| s.start_time)
            .min()
            .unwrap_or_else(Utc::now);
        let end_time = spans.iter().filter_map(|s| s.end_time).max();
        let session_id = root
            .and_then(|s| s.span_attributes.get("session.id"))
            .cloned();
        let user_id = root
            .and_then(|s| s.span_attributes.get("user.id"))
            .cloned();
        // tags/bookmarked are written onto every member span by
        // UpdateTraceTags/UpdateTraceBookmark, so the root carries them when
        // present; fall back to any member for a trace whose root isn't
        // (yet) among the spans passed in.
        let carrier = root.or_else(|| spans.first());
        let tags = carrier.map(|s| s.tags.clone()).unwrap_or_default();
        let bookmarked = carrier.map(|s| s.bookmarked).unwrap_or(false);

        Some(TraceSummary {
            trace_id: trace_id.to_string(),
            project_id: project_id.to_string(),
            root_span_id: root.map(|s| s.span_id.clone()),
            root_span_name: root.map(|s| s.span_name.clone()),
            span_count: spans.len() as u64,
            total_cost,
            total_tokens,
            start_time,
            end_time,
            session_id,
            user_id,
            tags,
            bookmarked,
        })
    }
}

/// Tree-structured view of a trace's spans, used by `GetTraceTree`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanTreeNode {
    pub span: Span,
    pub children: Vec<SpanTreeNode>,
}

pub fn build_span_tree(spans: Vec<Span>) -> Vec<SpanTreeNode> {
    use std::collections::HashMap;

    let mut children_of: HashMap<Option<String>, Vec<Span>> = HashMap::new();
    for span in spans {
        let key = if span.is_root() {
            None
        } else {
            span.parent_span_id.clone()
        };
        children_of.entry(key).or_default().push(span);
    }

    let roots = children_of.remove(&None).unwrap_or_default();
    roots
        .into_iter()
        .map(|root| assemble(root, &mut children_of))
        .collect()
}

fn assemble(
    span: Span,
    children_of: &mut std::collections::HashMap<Option<String>, Vec<Span>>,
) -> SpanTreeNode {
    let kids = children_of.remove(&Some(span.span_id.clone())).unwrap_or_default();
    let children = kids
        .into_iter()
        .map(|child| assemble(child, children_of))
        .collect();
    SpanTreeNode { span, children }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::span::{SpanKind, StatusCode};
    use std::collections::BTreeMap;

    fn span(id: &str, parent: Option<&str>, cost: Decimal) -> Span {
        Span {
            trace_id: "t".repeat(32),
            span_id: id.to_string(),
            parent_span_id: parent.map(|s| s.to_string()),
            project_id: "p1".into(),
            span_name: format!("span-{id}"),
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
            total_cost: cost,
            events: Vec::new(),
            links: Vec::new(),
            deleted_at: None,
            tags: Vec::new(),
            bookmarked: false,
        }
    }

    #[test]
    fn summary_sums_cost_across_spans() {
        let spans = vec![
            span("1111111111111111", None, Decimal::new(100, 2)),
            span("2222222222222222", Some("1111111111111111"), Decimal::new(50, 2)),
        ];
        let summary = TraceSummary::from_spans(&spans[0].trace_id.clone(), "p1", &spans).unwrap();
        assert_eq!(summary.span_count, 2);
        assert_eq!(summary.total_cost, Decimal::new(150, 2));
        assert_eq!(summary.root_span_id, Some("1111111111111111".to_string()));
    }

    #[test]
    fn empty_spans_yield_no_summary() {
        assert!(TraceSummary::from_spans("t", "p1", &[]).is_none());
    }

    #[test]
    fn summary_surfaces_root_tags_and_bookmark() {
        let mut root = span("1111111111111111", None, Decimal::ZERO);
        root.tags = vec!["prod".to_string()];
        root.bookmarked = true;
        let spans = vec![root, span("2222222222222222", Some("1111111111111111"), Decimal::ZERO)];
        let summary = TraceSummary::from_spans(&spans[0].trace_id.clone(), "p1", &spans).unwrap();
        assert_eq!(summary.tags, vec!["prod".to_string()]);
        assert!(summary.bookmarked);
    }

    #[test]
    fn tree_nests_children_under_root() {
        let spans = vec![
            span("1111111111111111", None, Decimal::ZERO),
            span("2222222222222222", Some("1111111111111111"), Decimal::ZERO),
        ];
        let tree = build_span_tree(spans);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children.len(), 1);
    }
}
