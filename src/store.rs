use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{CoreError, CoreResult};
use crate::model::span::Span;
use crate::model::trace::{build_span_tree, SpanTreeNode, TraceSummary};
use crate::query_builder::{BuiltQuery, SqlArg};

#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Distinct values observed per filterable field, for UI autocomplete.
    pub values_by_field: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub project_id: String,
    pub user_id: Option<String>,
    pub trace_count: u64,
    pub last_seen: chrono::DateTime<Utc>,
}

/// External collaborator: the columnar analytical store backing table
/// `otel_traces`. `GetSpansByFilter`/`QuerySpansByExpression` (and their
/// COUNT counterparts) are the same primitive at the store boundary — both
/// execute an already-lowered `(sql, args)` pair, whether it came from the
/// query builder or a programmatic caller — so they're unified here as
/// `query_spans_by_sql`/`count_spans_by_sql`.
#[async_trait]
pub trait ColumnarStore: Send + Sync {
    async fn insert_span(&self, span: Span) -> CoreResult<()>;
    async fn insert_span_batch(&self, spans: Vec<Span>) -> CoreResult<()>;
    async fn get_span(&self, project_id: &str, span_id: &str) -> CoreResult<Span>;
    async fn get_spans_by_trace_id(&self, project_id: &str, trace_id: &str) -> CoreResult<Vec<Span>>;
    async fn get_root_span(&self, project_id: &str, trace_id: &str) -> CoreResult<Span>;
    async fn get_span_tree(&self, project_id: &str, trace_id: &str) -> CoreResult<Vec<SpanTreeNode>>;
    async fn get_span_children(&self, project_id: &str, span_id: &str) -> CoreResult<Vec<Span>>;

    async fn query_spans_by_sql(&self, query: &BuiltQuery) -> CoreResult<Vec<Span>>;
    async fn count_spans_by_sql(&self, query: &BuiltQuery) -> CoreResult<u64>;

    async fn get_trace_summary(&self, project_id: &str, trace_id: &str) -> CoreResult<TraceSummary>;
    async fn list_traces(&self, query: &BuiltQuery) -> CoreResult<Vec<TraceSummary>>;
    async fn count_traces(&self, query: &BuiltQuery) -> CoreResult<u64>;

    async fn delete_span(&self, project_id: &str, span_id: &str) -> CoreResult<()>;
    async fn delete_trace(&self, project_id: &str, trace_id: &str) -> CoreResult<()>;
    async fn update_trace_tags(&self, project_id: &str, trace_id: &str, tags: Vec<String>) -> CoreResult<()>;
    async fn update_trace_bookmark(&self, project_id: &str, trace_id: &str, bookmarked: bool) -> CoreResult<()>;

    async fn get_filter_options(&self, project_id: &str) -> CoreResult<FilterOptions>;
    async fn discover_attributes(&self, project_id: &str, prefix: &str) -> CoreResult<Vec<String>>;
    async fn list_sessions(&self, query: &BuiltQuery) -> CoreResult<Vec<SessionSummary>>;
    async fn count_sessions(&self, query: &BuiltQuery) -> CoreResult<u64>;

    async fn health_check(&self) -> CoreResult<Duration>;
}

/// In-memory store double: the crate's only fully-exercised
/// implementation, since the real ClickHouse driver internals are an
/// external collaborator out of scope here.
#[derive(Default)]
pub struct InMemoryColumnarStore {
    spans: RwLock<Vec<Span>>,
}

impl InMemoryColumnarStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn spans_in_trace(&self, project_id: &str, trace_id: &str) -> Vec<Span> {
        self.spans
            .read()
            .iter()
            .filter(|s| s.project_id == project_id && s.trace_id == trace_id && s.deleted_at.is_none())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ColumnarStore for InMemoryColumnarStore {
    async fn insert_span(&self, span: Span) -> CoreResult<()> {
        self.spans.write().push(span);
        Ok(())
    }

    async fn insert_span_batch(&self, spans: Vec<Span>) -> CoreResult<()> {
        self.spans.write().extend(spans);
        Ok(())
    }

    async fn get_span(&self, project_id: &str, span_id: &str) -> CoreResult<Span> {
        self.spans
            .read()
            .iter()
            .find(|s| s.project_id == project_id && s.span_id == span_id && s.deleted_at.is_none())
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("span {span_id}")))
    }

    async fn get_spans_by_trace_id(&self, project_id: &str, trace_id: &str) -> CoreResult<Vec<Span>> {
        Ok(self.spans_in_trace(project_id, trace_id))
    }

    async fn get_root_span(&self, project_id: &str, trace_id: &str) -> CoreResult<Span> {
        self.spans_in_trace(project_id, trace_id)
            .into_iter()
            .find(|s| s.is_root())
            .ok_or_else(|| CoreError::NotFound(format!("root span for trace {trace_id}")))
    }

    async fn get_span_tree(&self, project_id: &str, trace_id: &str) -> CoreResult<Vec<SpanTreeNode>> {
        Ok(build_span_tree(self.spans_in_trace(project_id, trace_id)))
    }

    async fn get_span_children(&self, project_id: &str, span_id: &str) -> CoreResult<Vec<Span>> {
        Ok(self
            .spans
            .read()
            .iter()
            .filter(|s| {
                s.project_id == project_id
                    && s.deleted_at.is_none()
                    && s.parent_span_id.as_deref() == Some(span_id)
            })
            .cloned()
            .collect())
    }

    async fn query_spans_by_sql(&self, _query: &BuiltQuery) -> CoreResult<Vec<Span>> {
        // The in-memory double doesn't interpret SQL; it exists to exercise
        // call sites that don't depend on filter semantics. A real
        // ClickHouseStore executes `query.sql` with `query.args` bound
        // positionally.
        Ok(self.spans.read().iter().filter(|s| s.deleted_at.is_none()).cloned().collect())
    }

    async fn count_spans_by_sql(&self, query: &BuiltQuery) -> CoreResult<u64> {
        Ok(self.query_spans_by_sql(query).await?.len() as u64)
    }

    async fn get_trace_summary(&self, project_id: &str, trace_id: &str) -> CoreResult<TraceSummary> {
        let spans = self.spans_in_trace(project_id, trace_id);
        TraceSummary::from_spans(trace_id, project_id, &spans)
            .ok_or_else(|| CoreError::NotFound(format!("trace {trace_id}")))
    }

    async fn list_traces(&self, _query: &BuiltQuery) -> CoreResult<Vec<TraceSummary>> {
        let spans = self.spans.read();
        let mut by_trace: BTreeMap<(String, String), Vec<Span>> = BTreeMap::new();
        for span in spans.iter().filter(|s| s.deleted_at.is_none()) {
            by_trace
                .entry((span.project_id.clone(), span.trace_id.clone()))
                .or_default()
                .push(span.clone());
        }
        Ok(by_trace
            .into_iter()
            .filter_map(|((project_id, trace_id), spans)| TraceSummary::from_spans(&trace_id, &project_id, &spans))
            .collect())
    }

    async fn count_traces(&self, query: &BuiltQuery) -> CoreResult<u64> {
        Ok(self.list_traces(query).await?.len() as u64)
    }

    async fn delete_span(&self, project_id: &str, span_id: &str) -> CoreResult<()> {
        let mut spans = self.spans.write();
        if let Some(span) = spans
            .iter_mut()
            .find(|s| s.project_id == project_id && s.span_id == span_id)
        {
            span.deleted_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete_trace(&self, project_id: &str, trace_id: &str) -> CoreResult<()> {
        let mut spans = self.spans.write();
        for span in spans
            .iter_mut()
            .filter(|s| s.project_id == project_id && s.trace_id == trace_id)
        {
            span.deleted_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_trace_tags(&self, project_id: &str, trace_id: &str, tags: Vec<String>) -> CoreResult<()> {
        let mut spans = self.spans.write();
        for span in spans
            .iter_mut()
            .filter(|s| s.project_id == project_id && s.trace_id == trace_id)
        {
            span.tags = tags.clone();
        }
        Ok(())
    }

    async fn update_trace_bookmark(&self, project_id: &str, trace_id: &str, bookmarked: bool) -> CoreResult<()> {
        let mut spans = self.spans.write();
        for span in spans
            .iter_mut()
            .filter(|s| s.project_id == project_id && s.trace_id == trace_id)
        {
            span.bookmarked = bookmarked;
        }
        Ok(())
    }

    async fn get_filter_options(&self, project_id: &str) -> CoreResult<FilterOptions> {
        let spans = self.spans.read();
        let mut values_by_field: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for span in spans.iter().filter(|s| s.project_id == project_id && s.deleted_at.is_none()) {
            values_by_field
                .entry("span.name".to_string())
                .or_default()
                .push(span.span_name.clone());
        }
        for values in values_by_field.values_mut() {
            values.sort();
            values.dedup();
        }
        Ok(FilterOptions { values_by_field })
    }

    async fn discover_attributes(&self, project_id: &str, prefix: &str) -> CoreResult<Vec<String>> {
        let spans = self.spans.read();
        let mut keys: Vec<String> = spans
            .iter()
            .filter(|s| s.project_id == project_id)
            .flat_map(|s| s.span_attributes.keys().cloned())
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn list_sessions(&self, _query: &BuiltQuery) -> CoreResult<Vec<SessionSummary>> {
        Ok(Vec::new())
    }

    async fn count_sessions(&self, _query: &BuiltQuery) -> CoreResult<u64> {
        Ok(0)
    }

    async fn health_check(&self) -> CoreResult<Duration> {
        let start = Instant::now();
        Ok(start.elapsed())
    }
}

/// ClickHouse-backed store. Uses the teacher's own `clickhouse::Client`;
/// the query builder's `(sql, args)` pairs are bound positionally via
/// repeated `.bind(..)` calls, generalising the single-placeholder binds
/// the teacher already does in its trace-lookup handler.
pub struct ClickHouseStore {
    client: clickhouse::Client,
}

impl ClickHouseStore {
    pub fn new(client: clickhouse::Client) -> Self {
        ClickHouseStore { client }
    }

    fn bind_query(&self, query: &BuiltQuery) -> clickhouse::query::Query {
        let mut q = self.client.query(&query.sql);
        for arg in &query.args {
            q = match arg {
                SqlArg::Str(s) => q.bind(s),
                SqlArg::Num(n) => q.bind(n),
            };
        }
        q
    }
}

#[async_trait]
impl ColumnarStore for ClickHouseStore {
    async fn insert_span(&self, span: Span) -> CoreResult<()> {
        self.insert_span_batch(vec![span]).await
    }

    async fn insert_span_batch(&self, spans: Vec<Span>) -> CoreResult<()> {
        let mut insert = self
            .client
            .insert("otel_traces")
            .map_err(|e| CoreError::Internal(format!("clickhouse insert init failed: {e}")))?;
        for span in &spans {
            insert
                .write(span)
                .await
                .map_err(|e| CoreError::Internal(format!("clickhouse insert write failed: {e}")))?;
        }
        insert
            .end()
            .await
            .map_err(|e| CoreError::Internal(format!("clickhouse insert commit failed: {e}")))
    }

    async fn get_span(&self, project_id: &str, span_id: &str) -> CoreResult<Span> {
        self.client
            .query("SELECT * FROM otel_traces WHERE project_id = ? AND span_id = ? AND deleted_at IS NULL LIMIT 1")
            .bind(project_id)
            .bind(span_id)
            .fetch_one::<Span>()
            .await
            .map_err(|e| match e {
                clickhouse::error::Error::RowNotFound => CoreError::NotFound(format!("span {span_id}")),
                other => CoreError::Internal(format!("clickhouse query failed: {other}")),
            })
    }

    async fn get_spans_by_trace_id(&self, project_id: &str, trace_id: &str) -> CoreResult<Vec<Span>> {
        self.client
            .query("SELECT * FROM otel_traces WHERE project_id = ? AND trace_id = ? AND deleted_at IS NULL")
            .bind(project_id)
            .bind(trace_id)
            .fetch_all::<Span>()
            .await
            .map_err(|e| CoreError::Internal(format!("clickhouse query failed: {e}")))
    }

    async fn get_root_span(&self, project_id: &str, trace_id: &str) -> CoreResult<Span> {
        let spans = self.get_spans_by_trace_id(project_id, trace_id).await?;
        spans
            .into_iter()
            .find(|s| s.is_root())
            .ok_or_else(|| CoreError::NotFound(format!("root span for trace {trace_id}")))
    }

    async fn get_span_tree(&self, project_id: &str, trace_id: &str) -> CoreResult<Vec<SpanTreeNode>> {
        Ok(build_span_tree(self.get_spans_by_trace_id(project_id, trace_id).await?))
    }

    async fn get_span_children(&self, project_id: &str, span_id: &str) -> CoreResult<Vec<Span>> {
        self.client
            .query("SELECT * FROM otel_traces WHERE project_id = ? AND parent_span_id = ? AND deleted_at IS NULL")
            .bind(project_id)
            .bind(span_id)
            .fetch_all::<Span>()
            .await
            .map_err(|e| CoreError::Internal(format!("clickhouse query failed: {e}")))
    }

    async fn query_spans_by_sql(&self, query: &BuiltQuery) -> CoreResult<Vec<Span>> {
        self.bind_query(query)
            .fetch_all::<Span>()
            .await
            .map_err(|e| CoreError::Internal(format!("clickhouse query failed: {e}")))
    }

    async fn count_spans_by_sql(&self, query: &BuiltQuery) -> CoreResult<u64> {
        self.bind_query(query)
            .fetch_one::<u64>()
            .await
            .map_err(|e| CoreError::Internal(format!("clickhouse count failed: {e}")))
    }

    async fn get_trace_summary(&self, project_id: &str, trace_id: &str) -> CoreResult<TraceSummary> {
        let spans = self.get_spans_by_trace_id(project_id, trace_id).await?;
        TraceSummary::from_spans(trace_id, project_id, &spans)
            .ok_or_else(|| CoreError::NotFound(format!("trace {trace_id}")))
    }

    async fn list_traces(&self, _query: &BuiltQuery) -> CoreResult<Vec<TraceSummary>> {
        Err(CoreError::Internal("list_traces requires a trace-level aggregation query not modelled here".into()))
    }

    async fn count_traces(&self, query: &BuiltQuery) -> CoreResult<u64> {
        self.count_spans_by_sql(query).await
    }

    async fn delete_span(&self, project_id: &str, span_id: &str) -> CoreResult<()> {
        self.client
            .query("ALTER TABLE otel_traces UPDATE deleted_at = now64(9) WHERE project_id = ? AND span_id = ?")
            .bind(project_id)
            .bind(span_id)
            .execute()
            .await
            .map_err(|e| CoreError::Internal(format!("clickhouse soft delete failed: {e}")))
    }

    async fn delete_trace(&self, project_id: &str, trace_id: &str) -> CoreResult<()> {
        self.client
            .query("ALTER TABLE otel_traces UPDATE deleted_at = now64(9) WHERE project_id = ? AND trace_id = ?")
            .bind(project_id)
            .bind(trace_id)
            .execute()
            .await
            .map_err(|e| CoreError::Internal(format!("clickhouse soft delete failed: {e}")))
    }

    async fn update_trace_tags(&self, project_id: &str, trace_id: &str, tags: Vec<String>) -> CoreResult<()> {
        self.client
            .query("ALTER TABLE otel_traces UPDATE tags = ? WHERE project_id = ? AND trace_id = ?")
            .bind(&tags)
            .bind(project_id)
            .bind(trace_id)
            .execute()
            .await
            .map_err(|e| CoreError::Internal(format!("clickhouse tag update failed: {e}")))
    }

    async fn update_trace_bookmark(&self, project_id: &str, trace_id: &str, bookmarked: bool) -> CoreResult<()> {
        self.client
            .query("ALTER TABLE otel_traces UPDATE bookmarked = ? WHERE project_id = ? AND trace_id = ?")
            .bind(bookmarked)
            .bind(project_id)
            .bind(trace_id)
            .execute()
            .await
            .map_err(|e| CoreError::Internal(format!("clickhouse bookmark update failed: {e}")))
    }

    async fn get_filter_options(&self, _project_id: &str) -> CoreResult<FilterOptions> {
        Err(CoreError::Internal("filter options discovery is store-specific and not modelled here".into()))
    }

    async fn discover_attributes(&self, _project_id: &str, _prefix: &str) -> CoreResult<Vec<String>> {
        Err(CoreError::Internal("attribute discovery is store-specific and not modelled here".into()))
    }

    async fn list_sessions(&self, _query: &BuiltQuery) -> CoreResult<Vec<SessionSummary>> {
        Err(CoreError::Internal("session listing is store-specific and not modelled here".into()))
    }

    async fn count_sessions(&self, query: &BuiltQuery) -> CoreResult<u64> {
        self.count_spans_by_sql(query).await
    }

    async fn health_check(&self) -> CoreResult<Duration> {
        let start = Instant::now();
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map_err(|e| CoreError::Internal(format!("clickhouse health check failed: {e}")))?;
        Ok(start.elapsed())
    }
}
