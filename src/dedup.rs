use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Config, Pool, Runtime};
use parking_lot::Mutex;

use crate::error::{CoreError, CoreResult};

pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

pub fn fingerprint(trace_id: &str, span_id: &str) -> String {
    format!("{trace_id}:{span_id}")
}

/// External collaborator: the dedup backing store. `ClaimEvents` is the
/// atomic primitive; everything else is derivable from it. Stateless
/// in-process — atomicity is delegated to the backing store.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn check_duplicate(&self, fp: &str) -> CoreResult<bool>;
    async fn check_batch_duplicates(&self, fps: &[String]) -> CoreResult<Vec<String>>;

    /// Atomic per-fingerprint test-and-set. Returns `(claimed, already_present)`.
    async fn claim_events(
        &self,
        project_id: &str,
        batch_id: &str,
        fps: &[String],
        ttl: Duration,
    ) -> CoreResult<(Vec<String>, Vec<String>)>;

    /// Rollback path: remove claims (used when downstream publish fails).
    async fn release_events(&self, fps: &[String]) -> CoreResult<()>;

    /// Ensure fingerprints are present with the default TTL; used
    /// post-success when `claim_events` was skipped.
    async fn register_processed_events_batch(
        &self,
        project_id: &str,
        batch_id: &str,
        fps: &[String],
    ) -> CoreResult<()>;

    /// No-op: TTL handles expiry. Present for interface symmetry.
    async fn cleanup_expired(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn validate_redis_health(&self) -> CoreResult<Duration>;
}

/// Redis-backed dedup store. Claims use `SET NX PX` (millisecond-precision
/// TTL) so the default 24h window is exact rather than rounded to seconds.
pub struct RedisDedupStore {
    pool: Pool,
}

impl RedisDedupStore {
    pub fn new(redis_url: &str) -> CoreResult<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CoreError::Internal(format!("redis pool init failed: {e}")))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> CoreResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CoreError::Internal(format!("redis pool exhausted: {e}")))
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn check_duplicate(&self, fp: &str) -> CoreResult<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn
            .exists(dedup_key(fp))
            .await
            .map_err(|e| CoreError::Internal(format!("redis EXISTS failed: {e}")))?;
        Ok(exists)
    }

    async fn check_batch_duplicates(&self, fps: &[String]) -> CoreResult<Vec<String>> {
        let mut duplicates = Vec::new();
        for fp in fps {
            if self.check_duplicate(fp).await? {
                duplicates.push(fp.clone());
            }
        }
        Ok(duplicates)
    }

    async fn claim_events(
        &self,
        _project_id: &str,
        _batch_id: &str,
        fps: &[String],
        ttl: Duration,
    ) -> CoreResult<(Vec<String>, Vec<String>)> {
        let mut conn = self.conn().await?;
        let mut claimed = Vec::new();
        let mut duplicates = Vec::new();
        let ttl_ms = ttl.as_millis() as usize;

        for fp in fps {
            let key = dedup_key(fp);
            let set: Option<String> = deadpool_redis::redis::cmd("SET")
                .arg(&key)
                .arg(1)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| CoreError::Internal(format!("redis SET NX PX failed: {e}")))?;
            if set.is_some() {
                claimed.push(fp.clone());
            } else {
                duplicates.push(fp.clone());
            }
        }
        Ok((claimed, duplicates))
    }

    async fn release_events(&self, fps: &[String]) -> CoreResult<()> {
        if fps.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let keys: Vec<String> = fps.iter().map(|fp| dedup_key(fp)).collect();
        let _: i64 = conn
            .del(keys)
            .await
            .map_err(|e| CoreError::Internal(format!("redis DEL failed: {e}")))?;
        Ok(())
    }

    async fn register_processed_events_batch(
        &self,
        _project_id: &str,
        _batch_id: &str,
        fps: &[String],
    ) -> CoreResult<()> {
        let mut conn = self.conn().await?;
        let ttl_ms = DEFAULT_TTL.as_millis() as usize;
        for fp in fps {
            let _: () = conn
                .pset_ex(dedup_key(fp), 1, ttl_ms as u64)
                .await
                .map_err(|e| CoreError::Internal(format!("redis PSETEX failed: {e}")))?;
        }
        Ok(())
    }

    async fn validate_redis_health(&self) -> CoreResult<Duration> {
        let mut conn = self.conn().await?;
        let start = std::time::Instant::now();
        let _: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Internal(format!("redis PING failed: {e}")))?;
        Ok(start.elapsed())
    }
}

fn dedup_key(fp: &str) -> String {
    format!("dedup:{fp}")
}

/// In-memory dedup store for tests — the default/testable implementation,
/// since the real Redis driver is an external collaborator.
#[derive(Default)]
pub struct InMemoryDedupStore {
    claimed: Mutex<HashSet<String>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn check_duplicate(&self, fp: &str) -> CoreResult<bool> {
        Ok(self.claimed.lock().contains(fp))
    }

    async fn check_batch_duplicates(&self, fps: &[String]) -> CoreResult<Vec<String>> {
        let claimed = self.claimed.lock();
        Ok(fps.iter().filter(|fp| claimed.contains(*fp)).cloned().collect())
    }

    async fn claim_events(
        &self,
        _project_id: &str,
        _batch_id: &str,
        fps: &[String],
        _ttl: Duration,
    ) -> CoreResult<(Vec<String>, Vec<String>)> {
        let mut claimed_set = self.claimed.lock();
        let mut claimed = Vec::new();
        let mut duplicates = Vec::new();
        for fp in fps {
            if claimed_set.insert(fp.clone()) {
                claimed.push(fp.clone());
            } else {
                duplicates.push(fp.clone());
            }
        }
        Ok((claimed, duplicates))
    }

    async fn release_events(&self, fps: &[String]) -> CoreResult<()> {
        let mut claimed = self.claimed.lock();
        for fp in fps {
            claimed.remove(fp);
        }
        Ok(())
    }

    async fn register_processed_events_batch(
        &self,
        _project_id: &str,
        _batch_id: &str,
        fps: &[String],
    ) -> CoreResult<()> {
        let mut claimed = self.claimed.lock();
        for fp in fps {
            claimed.insert(fp.clone());
        }
        Ok(())
    }

    async fn validate_redis_health(&self) -> CoreResult<Duration> {
        Ok(Duration::from_millis(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_claim_reports_duplicate() {
        let store = InMemoryDedupStore::new();
        let fps = vec![fingerprint(&"a".repeat(32), &"b".repeat(16))];

        let (claimed, dup) = store
            .claim_events("p1", "batch1", &fps, DEFAULT_TTL)
            .await
            .unwrap();
        assert_eq!(claimed, fps);
        assert!(dup.is_empty());

        let (claimed2, dup2) = store
            .claim_events("p1", "batch2", &fps, DEFAULT_TTL)
            .await
            .unwrap();
        assert!(claimed2.is_empty());
        assert_eq!(dup2, fps);
    }

    #[tokio::test]
    async fn release_then_reclaim_succeeds() {
        let store = InMemoryDedupStore::new();
        let fps = vec![fingerprint(&"a".repeat(32), &"b".repeat(16))];

        store.claim_events("p1", "b1", &fps, DEFAULT_TTL).await.unwrap();
        store.release_events(&fps).await.unwrap();

        let (claimed, dup) = store.claim_events("p1", "b2", &fps, DEFAULT_TTL).await.unwrap();
        assert_eq!(claimed, fps);
        assert!(dup.is_empty());
    }

    #[tokio::test]
    async fn concurrent_claims_exactly_one_winner() {
        use std::sync::Arc;
        let store = Arc::new(InMemoryDedupStore::new());
        let fp = fingerprint(&"a".repeat(32), &"b".repeat(16));
        let fps_a = vec![fp.clone()];
        let fps_b = vec![fp.clone()];

        let store_a = store.clone();
        let store_b = store.clone();
        let (ra, rb) = tokio::join!(
            store_a.claim_events("p1", "batchA", &fps_a, DEFAULT_TTL),
            store_b.claim_events("p1", "batchB", &fps_b, DEFAULT_TTL),
        );
        let (claimed_a, dup_a) = ra.unwrap();
        let (claimed_b, dup_b) = rb.unwrap();

        let total_claimed = claimed_a.len() + claimed_b.len();
        let total_dup = dup_a.len() + dup_b.len();
        assert_eq!(total_claimed, 1);
        assert_eq!(total_dup, 1);
    }

    #[tokio::test]
    async fn register_processed_skips_claim_but_marks_present() {
        let store = InMemoryDedupStore::new();
        let fps = vec![fingerprint(&"a".repeat(32), &"b".repeat(16))];
        store
            .register_processed_events_batch("p1", "b1", &fps)
            .await
            .unwrap();
        assert!(store.check_duplicate(&fps[0]).await.unwrap());
    }

    #[test]
    fn fingerprint_format() {
        assert_eq!(fingerprint("abc", "def"), "abc:def");
    }
}

