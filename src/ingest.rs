use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::dedup::{fingerprint, DedupStore, DEFAULT_TTL};
use crate::error::{CoreError, CoreResult};
use crate::model::span::Span;

/// External collaborator: the streaming backbone events are handed off to.
/// Opaque to the core; a publish failure triggers dedup-claim release.
#[async_trait]
pub trait StreamProducer: Send + Sync {
    async fn publish(&self, span: Span) -> CoreResult<()>;
    async fn publish_batch(&self, spans: Vec<Span>) -> CoreResult<()>;
}

/// In-memory producer double backed by an mpsc channel.
pub struct InMemoryStreamProducer {
    sender: tokio::sync::mpsc::UnboundedSender<Span>,
}

impl InMemoryStreamProducer {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Span>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl StreamProducer for InMemoryStreamProducer {
    async fn publish(&self, span: Span) -> CoreResult<()> {
        self.sender
            .send(span)
            .map_err(|e| CoreError::PublishFailed(e.to_string()))
    }

    async fn publish_batch(&self, spans: Vec<Span>) -> CoreResult<()> {
        for span in spans {
            self.publish(span).await?;
        }
        Ok(())
    }
}

/// A producer double that always fails, for exercising the
/// claim-then-release compensation path in tests.
pub struct AlwaysFailingProducer;

#[async_trait]
impl StreamProducer for AlwaysFailingProducer {
    async fn publish(&self, _span: Span) -> CoreResult<()> {
        Err(CoreError::PublishFailed("producer unavailable".into()))
    }

    async fn publish_batch(&self, _spans: Vec<Span>) -> CoreResult<()> {
        Err(CoreError::PublishFailed("producer unavailable".into()))
    }
}

/// Response of a batch ingest: counts even under partial failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestResult {
    pub processed_count: usize,
    pub duplicate_count: usize,
    pub failed_count: usize,
}

/// In-process performance counters, updated under a write lock; reads take
/// a read-lock. Mirrors the telemetry-service counters named in the
/// concurrency model (`batches_processed`, `events_processed`,
/// `avg_processing_time`).
#[derive(Default)]
pub struct IngestCounters {
    inner: RwLock<CountersInner>,
}

#[derive(Default, Clone, Copy)]
struct CountersInner {
    batches_processed: u64,
    events_processed: u64,
    total_processing_time: Duration,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, events: usize, elapsed: Duration) {
        let mut inner = self.inner.write();
        inner.batches_processed += 1;
        inner.events_processed += events as u64;
        inner.total_processing_time += elapsed;
    }

    pub fn batches_processed(&self) -> u64 {
        self.inner.read().batches_processed
    }

    pub fn events_processed(&self) -> u64 {
        self.inner.read().events_processed
    }

    pub fn avg_processing_time(&self) -> Duration {
        let inner = self.inner.read();
        if inner.batches_processed == 0 {
            Duration::ZERO
        } else {
            inner.total_processing_time / inner.batches_processed as u32
        }
    }
}

/// Batch ingestion coordinator: claim -> publish -> on-failure, release.
///
/// Each event is independent: a publish failure releases only that event's
/// claim, surfacing `PublishFailed` does not affect the other events in
/// the batch. Only successful handoffs remain in the dedup set.
#[tracing::instrument(skip(spans, dedup, producer, counters), fields(project_id = %project_id, batch_id = %batch_id, n = spans.len()))]
pub async fn ingest_batch(
    project_id: &str,
    batch_id: &str,
    spans: Vec<Span>,
    dedup: &dyn DedupStore,
    producer: &dyn StreamProducer,
    counters: &IngestCounters,
    ttl: Option<Duration>,
) -> CoreResult<IngestResult> {
    let start = Instant::now();
    let n = spans.len();
    let ttl = ttl.unwrap_or(DEFAULT_TTL);

    let fps: Vec<String> = spans
        .iter()
        .map(|s| fingerprint(&s.trace_id, &s.span_id))
        .collect();

    let (claimed_fps, duplicate_fps) = dedup
        .claim_events(project_id, batch_id, &fps, ttl)
        .await?;

    let claimed_set: std::collections::HashSet<&str> =
        claimed_fps.iter().map(|s| s.as_str()).collect();

    let mut processed = 0usize;
    let mut failed_fps = Vec::new();

    for (span, fp) in spans.into_iter().zip(fps.iter()) {
        if !claimed_set.contains(fp.as_str()) {
            continue;
        }
        match producer.publish(span).await {
            Ok(()) => {
                processed += 1;
                tracing::debug!(fingerprint = %fp, "span published");
            }
            Err(err) => {
                tracing::warn!(fingerprint = %fp, error = %err, "publish failed, releasing claim");
                failed_fps.push(fp.clone());
            }
        }
    }

    if !failed_fps.is_empty() {
        dedup.release_events(&failed_fps).await?;
    }

    counters.record(n, start.elapsed());

    Ok(IngestResult {
        processed_count: processed,
        duplicate_count: duplicate_fps.len(),
        failed_count: failed_fps.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::InMemoryDedupStore;
    use crate::model::span::{SpanKind, StatusCode};
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn span(trace_id: &str, span_id: &str) -> Span {
        Span {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: None,
            project_id: "p1".into(),
            span_name: "s".into(),
            span_kind: SpanKind::Internal,
            status_code: StatusCode::Ok,
            status_message: None,
            start_time: chrono::Utc::now(),
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

    #[tokio::test]
    async fn successful_batch_reports_processed_count() {
        let dedup = InMemoryDedupStore::new();
        let (producer, mut rx) = InMemoryStreamProducer::new();
        let counters = IngestCounters::new();

        let spans = vec![span(&"a".repeat(32), "1111111111111111")];
        let result = ingest_batch("p1", "b1", spans, &dedup, &producer, &counters, None)
            .await
            .unwrap();

        assert_eq!(result.processed_count, 1);
        assert_eq!(result.duplicate_count, 0);
        assert_eq!(result.failed_count, 0);
        assert!(rx.try_recv().is_ok());
        assert_eq!(counters.batches_processed(), 1);
        assert_eq!(counters.events_processed(), 1);
    }

    #[tokio::test]
    async fn duplicate_fingerprint_is_not_republished() {
        let dedup = InMemoryDedupStore::new();
        let (producer, _rx) = InMemoryStreamProducer::new();
        let counters = IngestCounters::new();

        let fp_span = span(&"a".repeat(32), "1111111111111111");
        ingest_batch("p1", "b1", vec![fp_span.clone()], &dedup, &producer, &counters, None)
            .await
            .unwrap();

        let result = ingest_batch("p1", "b2", vec![fp_span], &dedup, &producer, &counters, None)
            .await
            .unwrap();
        assert_eq!(result.processed_count, 0);
        assert_eq!(result.duplicate_count, 1);
    }

    #[tokio::test]
    async fn publish_failure_releases_claim_and_reports_failed() {
        let dedup = InMemoryDedupStore::new();
        let producer = AlwaysFailingProducer;
        let counters = IngestCounters::new();

        let s = span(&"a".repeat(32), "1111111111111111");
        let fp = fingerprint(&s.trace_id, &s.span_id);
        let result = ingest_batch("p1", "b1", vec![s], &dedup, &producer, &counters, None)
            .await
            .unwrap();

        assert_eq!(result.processed_count, 0);
        assert_eq!(result.failed_count, 1);
        assert!(!dedup.check_duplicate(&fp).await.unwrap());
    }
}
