use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};
use crate::filter::parser::FilterParser;
use crate::model::span::Span;
use crate::query_builder::{QueryRequest, SearchRequest, SpanQueryBuilder};
use crate::store::ColumnarStore;

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

/// Caller-facing request shape, one level above the builder's [`QueryRequest`]:
/// `filter` is still raw DSL text here, `page` is 1-based.
#[derive(Debug, Clone)]
pub struct SpanQuery {
    pub project_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub filter: Option<String>,
    pub search: Option<SearchRequest>,
    pub limit: i64,
    pub page: i64,
}

#[derive(Debug, Clone)]
pub struct SpanQueryResult {
    pub spans: Vec<Span>,
    pub total_count: u64,
    pub has_more: bool,
}

fn validate_request(request: &SpanQuery) -> CoreResult<()> {
    if request.project_id.trim().is_empty() {
        return Err(CoreError::Validation("project_id must not be empty".into()));
    }
    if request.limit <= 0 || request.limit > MAX_LIMIT {
        return Err(CoreError::Validation(format!(
            "limit must be between 1 and {MAX_LIMIT}, got {}",
            request.limit
        )));
    }
    if request.page < 1 {
        return Err(CoreError::Validation(format!(
            "page must be >= 1, got {}",
            request.page
        )));
    }
    Ok(())
}

/// Runs a span query end to end: validate, parse the filter, build fresh
/// parser/builder instances, execute data + count queries, assemble the
/// page result. A fresh [`FilterParser`]/[`SpanQueryBuilder`] pair is
/// constructed per call — neither type is safe to share across concurrent
/// requests.
#[tracing::instrument(skip(store, request), fields(project_id = %request.project_id, page = request.page, limit = request.limit))]
pub async fn execute_query(store: &dyn ColumnarStore, request: SpanQuery) -> CoreResult<SpanQueryResult> {
    validate_request(&request)?;

    let filter = match &request.filter {
        Some(text) => Some(FilterParser::parse_default(text)?),
        None => None,
    };

    let offset = (request.page - 1) * request.limit;
    let builder_request = QueryRequest {
        project_id: request.project_id.clone(),
        start_time: request.start_time,
        end_time: request.end_time,
        filter,
        search: request.search.clone(),
        limit: request.limit,
        offset,
    };

    let builder = SpanQueryBuilder::new();
    let data_query = builder.build_data_query(&builder_request)?;
    let count_query = builder.build_count_query(&builder_request)?;

    let spans = store.query_spans_by_sql(&data_query).await?;
    let total_count = store.count_spans_by_sql(&count_query).await?;
    let has_more = (offset as u64) + (spans.len() as u64) < total_count;

    tracing::debug!(returned = spans.len(), total_count, has_more, "query executed");

    Ok(SpanQueryResult {
        spans,
        total_count,
        has_more,
    })
}
