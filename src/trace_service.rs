use std::time::Duration;

use moka::sync::Cache;

use crate::error::{CoreError, CoreResult};
use crate::model::span::{validate_trace_id, Span};
use crate::model::trace::{SpanTreeNode, TraceSummary};
use crate::query_builder::{BuiltQuery, QueryRequest, SpanQueryBuilder};
use crate::store::{ColumnarStore, FilterOptions, SessionSummary};

pub const FILTER_OPTIONS_CACHE_CAPACITY: u64 = 500;
pub const FILTER_OPTIONS_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_TAGS_PER_TRACE: usize = 20;

/// Reads derived from spans, plus the write paths that forward to the
/// store after validation/defaulting. Holds the filter-options cache: a
/// bounded, TTL'd, internally-synchronized `moka::sync::Cache` satisfies
/// the "bounded LRU protected by a mutex" requirement without a hand-rolled
/// `Mutex<LruCache>`.
pub struct TraceService {
    store: Box<dyn ColumnarStore>,
    filter_options_cache: Cache<String, FilterOptions>,
    max_tags_per_trace: usize,
}

impl TraceService {
    pub fn new(store: Box<dyn ColumnarStore>) -> Self {
        Self::with_max_tags(store, DEFAULT_MAX_TAGS_PER_TRACE)
    }

    pub fn with_max_tags(store: Box<dyn ColumnarStore>, max_tags_per_trace: usize) -> Self {
        let filter_options_cache = Cache::builder()
            .max_capacity(FILTER_OPTIONS_CACHE_CAPACITY)
            .time_to_live(FILTER_OPTIONS_CACHE_TTL)
            .build();
        TraceService {
            store,
            filter_options_cache,
            max_tags_per_trace,
        }
    }

    pub async fn ingest_span(&self, mut span: Span) -> CoreResult<()> {
        span.validate_ids()?;
        span.compute_duration();
        self.store.insert_span(span).await
    }

    pub async fn ingest_span_batch(&self, mut spans: Vec<Span>) -> CoreResult<()> {
        for span in &mut spans {
            span.validate_ids()?;
            span.compute_duration();
        }
        self.store.insert_span_batch(spans).await
    }

    #[tracing::instrument(skip(self), fields(project_id = %project_id, trace_id = %trace_id))]
    pub async fn get_trace(&self, project_id: &str, trace_id: &str) -> CoreResult<TraceSummary> {
        validate_trace_id(trace_id)?;
        self.store.get_trace_summary(project_id, trace_id).await
    }

    pub async fn get_trace_spans(&self, project_id: &str, trace_id: &str) -> CoreResult<Vec<Span>> {
        validate_trace_id(trace_id)?;
        self.store.get_spans_by_trace_id(project_id, trace_id).await
    }

    pub async fn get_trace_tree(&self, project_id: &str, trace_id: &str) -> CoreResult<Vec<SpanTreeNode>> {
        validate_trace_id(trace_id)?;
        self.store.get_span_tree(project_id, trace_id).await
    }

    pub async fn get_root_span(&self, project_id: &str, trace_id: &str) -> CoreResult<Span> {
        validate_trace_id(trace_id)?;
        self.store.get_root_span(project_id, trace_id).await
    }

    pub async fn list_traces(&self, query: &BuiltQuery) -> CoreResult<Vec<TraceSummary>> {
        self.store.list_traces(query).await
    }

    pub async fn count_traces(&self, query: &BuiltQuery) -> CoreResult<u64> {
        self.store.count_traces(query).await
    }

    pub async fn get_traces_by_session(
        &self,
        project_id: &str,
        session_id: &str,
        limit: i64,
    ) -> CoreResult<Vec<TraceSummary>> {
        let builder = SpanQueryBuilder::new();
        let request = QueryRequest {
            project_id: project_id.to_string(),
            start_time: None,
            end_time: None,
            filter: Some(crate::filter::parser::FilterParser::parse_default(&format!(
                r#"session.id="{session_id}""#
            ))?),
            search: None,
            limit,
            offset: 0,
        };
        let query = builder.build_data_query(&request)?;
        self.store.list_traces(&query).await
    }

    pub async fn get_traces_by_user(
        &self,
        project_id: &str,
        user_id: &str,
        limit: i64,
    ) -> CoreResult<Vec<TraceSummary>> {
        let builder = SpanQueryBuilder::new();
        let request = QueryRequest {
            project_id: project_id.to_string(),
            start_time: None,
            end_time: None,
            filter: Some(crate::filter::parser::FilterParser::parse_default(&format!(
                r#"user.id="{user_id}""#
            ))?),
            search: None,
            limit,
            offset: 0,
        };
        let query = builder.build_data_query(&request)?;
        self.store.list_traces(&query).await
    }

    /// Both tag and bookmark updates first verify the root span belongs to
    /// `project_id`, preventing a caller from mutating another project's
    /// trace by guessing a `trace_id`.
    async fn verify_ownership(&self, project_id: &str, trace_id: &str) -> CoreResult<()> {
        validate_trace_id(trace_id)?;
        self.store.get_root_span(project_id, trace_id).await?;
        Ok(())
    }

    pub async fn update_trace_tags(&self, project_id: &str, trace_id: &str, tags: Vec<String>) -> CoreResult<()> {
        self.verify_ownership(project_id, trace_id).await?;
        if tags.len() > self.max_tags_per_trace {
            return Err(CoreError::Validation(format!(
                "trace may carry at most {} tags, got {}",
                self.max_tags_per_trace,
                tags.len()
            )));
        }
        self.store.update_trace_tags(project_id, trace_id, tags).await
    }

    pub async fn update_trace_bookmark(&self, project_id: &str, trace_id: &str, bookmarked: bool) -> CoreResult<()> {
        self.verify_ownership(project_id, trace_id).await?;
        self.store.update_trace_bookmark(project_id, trace_id, bookmarked).await
    }

    #[tracing::instrument(skip(self), fields(project_id = %project_id))]
    pub async fn get_filter_options(&self, project_id: &str) -> CoreResult<FilterOptions> {
        if let Some(cached) = self.filter_options_cache.get(project_id) {
            tracing::debug!("filter options cache hit");
            return Ok(cached);
        }
        let options = self.store.get_filter_options(project_id).await?;
        self.filter_options_cache.insert(project_id.to_string(), options.clone());
        Ok(options)
    }

    pub fn invalidate_filter_options_cache(&self, project_id: &str) {
        self.filter_options_cache.invalidate(project_id);
    }

    pub async fn discover_attributes(&self, project_id: &str, prefix: &str) -> CoreResult<Vec<String>> {
        self.store.discover_attributes(project_id, prefix).await
    }

    pub async fn list_sessions(&self, query: &BuiltQuery) -> CoreResult<Vec<SessionSummary>> {
        self.store.list_sessions(query).await
    }

    pub async fn count_sessions(&self, query: &BuiltQuery) -> CoreResult<u64> {
        self.store.count_sessions(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::span::{SpanKind, StatusCode};
    use crate::store::InMemoryColumnarStore;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn span(project_id: &str, trace_id: &str, span_id: &str, parent: Option<&str>) -> Span {
        Span {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: parent.map(|s| s.to_string()),
            project_id: project_id.to_string(),
            span_name: "s".into(),
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

    fn service() -> TraceService {
        TraceService::new(Box::new(InMemoryColumnarStore::new()))
    }

    #[tokio::test]
    async fn invalid_trace_id_rejected_before_store_call() {
        let svc = service();
        let err = svc.get_trace("p1", "not-32-hex").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn update_tags_rejects_trace_from_other_project() {
        let svc = service();
        svc.ingest_span(span("p1", &"a".repeat(32), "1111111111111111", None))
            .await
            .unwrap();
        let err = svc
            .update_trace_tags("p2", &"a".repeat(32), vec!["x".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_tags_rejects_too_many_tags() {
        let svc = service();
        svc.ingest_span(span("p1", &"a".repeat(32), "1111111111111111", None))
            .await
            .unwrap();
        let too_many: Vec<String> = (0..DEFAULT_MAX_TAGS_PER_TRACE + 1).map(|i| i.to_string()).collect();
        let err = svc
            .update_trace_tags("p1", &"a".repeat(32), too_many)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn update_tags_succeeds_for_owning_project() {
        let svc = service();
        svc.ingest_span(span("p1", &"a".repeat(32), "1111111111111111", None))
            .await
            .unwrap();
        svc.update_trace_tags("p1", &"a".repeat(32), vec!["prod".into()])
            .await
            .unwrap();
        let trace = svc.get_trace("p1", &"a".repeat(32)).await.unwrap();
        assert_eq!(trace.tags, vec!["prod".to_string()]);
    }

    #[tokio::test]
    async fn update_bookmark_succeeds_and_is_readable() {
        let svc = service();
        svc.ingest_span(span("p1", &"a".repeat(32), "1111111111111111", None))
            .await
            .unwrap();
        svc.update_trace_bookmark("p1", &"a".repeat(32), true).await.unwrap();
        let trace = svc.get_trace("p1", &"a".repeat(32)).await.unwrap();
        assert!(trace.bookmarked);
    }

    #[tokio::test]
    async fn filter_options_cache_hit_skips_second_store_call() {
        let svc = service();
        svc.ingest_span(span("p1", &"a".repeat(32), "1111111111111111", None))
            .await
            .unwrap();
        let first = svc.get_filter_options("p1").await.unwrap();
        let second = svc.get_filter_options("p1").await.unwrap();
        assert_eq!(first.values_by_field, second.values_by_field);
    }

    #[tokio::test]
    async fn invalidate_cache_forces_refetch() {
        let svc = service();
        svc.get_filter_options("p1").await.unwrap();
        svc.invalidate_filter_options_cache("p1");
        svc.ingest_span(span("p1", &"a".repeat(32), "1111111111111111", None))
            .await
            .unwrap();
        let options = svc.get_filter_options("p1").await.unwrap();
        assert!(options.values_by_field.contains_key("span.name"));
    }

    #[tokio::test]
    async fn ingest_span_batch_computes_duration() {
        let svc = service();
        let mut s = span("p1", &"a".repeat(32), "1111111111111111", None);
        s.end_time = Some(s.start_time + chrono::Duration::milliseconds(2));
        svc.ingest_span_batch(vec![s]).await.unwrap();
        let spans = svc.get_trace_spans("p1", &"a".repeat(32)).await.unwrap();
        assert_eq!(spans[0].duration_ns, Some(2_000_000));
    }

    #[tokio::test]
    async fn get_trace_tree_nests_children() {
        let svc = service();
        svc.ingest_span_batch(vec![
            span("p1", &"a".repeat(32), "1111111111111111", None),
            span("p1", &"a".repeat(32), "2222222222222222", Some("1111111111111111")),
        ])
        .await
        .unwrap();
        let tree = svc.get_trace_tree("p1", &"a".repeat(32)).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children.len(), 1);
    }
}
