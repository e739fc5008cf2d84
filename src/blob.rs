use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::blob::BlobReference;

/// Offload threshold: content larger than this (bytes) should be uploaded
/// to blob storage rather than stored inline.
pub fn should_offload(content: &[u8], threshold_bytes: usize) -> bool {
    content.len() > threshold_bytes
}

/// External collaborator: object storage. `key` is the full bucket path
/// (`{entity_type}/{entity_id}/{blob_id}.json`).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> CoreResult<()>;
    async fn download(&self, key: &str) -> CoreResult<Vec<u8>>;
    async fn delete(&self, key: &str) -> CoreResult<()>;
}

/// Persists/deletes [`BlobReference`] rows. A real implementation is
/// backed by the columnar store or a metadata table; out of scope here,
/// so only the in-memory double exists.
#[async_trait]
pub trait BlobReferenceStore: Send + Sync {
    async fn create(&self, reference: BlobReference) -> CoreResult<()>;
    async fn delete(&self, id: &str) -> CoreResult<()>;
}

/// Upload `content` under a freshly-minted blob id, then persist its
/// reference. On reference-persist failure, delete the uploaded object
/// (compensation) and surface the original error.
pub async fn upload_to_store(
    blob_store: &dyn BlobStore,
    reference_store: &dyn BlobReferenceStore,
    content: Vec<u8>,
    content_type: &str,
    project_id: &str,
    bucket_name: &str,
    entity_type: &str,
    entity_id: &str,
    event_id: &str,
) -> CoreResult<BlobReference> {
    let blob_id = Uuid::now_v7().to_string();
    let bucket_path = BlobReference::bucket_path(entity_type, entity_id, &blob_id);
    let file_size_bytes = content.len() as u64;

    blob_store
        .upload(&bucket_path, content, content_type)
        .await?;

    let reference = BlobReference::new(
        blob_id,
        project_id.to_string(),
        entity_type.to_string(),
        entity_id.to_string(),
        event_id.to_string(),
        bucket_name.to_string(),
        Some(file_size_bytes),
        Some(content_type.to_string()),
    );

    if let Err(err) = reference_store.create(reference.clone()).await {
        tracing::warn!(bucket_path = %bucket_path, error = %err, "blob reference persist failed, deleting uploaded object");
        if let Err(cleanup_err) = blob_store.delete(&bucket_path).await {
            tracing::error!(bucket_path = %bucket_path, error = %cleanup_err, "compensating blob delete also failed");
        }
        return Err(err);
    }

    Ok(reference)
}

/// Delete a blob reference: the blob itself is deleted first (best-effort
/// — a failure is logged but doesn't block reference deletion), then the
/// reference row.
pub async fn delete_reference(
    blob_store: &dyn BlobStore,
    reference_store: &dyn BlobReferenceStore,
    reference: &BlobReference,
) -> CoreResult<()> {
    if let Err(err) = blob_store.delete(&reference.bucket_path).await {
        tracing::warn!(bucket_path = %reference.bucket_path, error = %err, "best-effort blob delete failed");
    }
    reference_store.delete(&reference.id).await
}

/// In-memory blob store for tests.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> CoreResult<()> {
        self.objects.lock().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn download(&self, key: &str) -> CoreResult<Vec<u8>> {
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("blob {key}")))
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        self.objects.lock().remove(key);
        Ok(())
    }
}

/// In-memory blob reference store for tests.
#[derive(Default)]
pub struct InMemoryBlobReferenceStore {
    refs: Mutex<HashMap<String, BlobReference>>,
}

impl InMemoryBlobReferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: force the next `create` to fail, to exercise the
    /// compensation path.
    pub fn fail_next_create(&self, id: &str) {
        self.refs.lock().remove(id);
    }
}

#[async_trait]
impl BlobReferenceStore for InMemoryBlobReferenceStore {
    async fn create(&self, reference: BlobReference) -> CoreResult<()> {
        self.refs.lock().insert(reference.id.clone(), reference);
        Ok(())
    }

    async fn delete(&self, id: &str) -> CoreResult<()> {
        self.refs.lock().remove(id);
        Ok(())
    }
}

/// A reference store double that always fails `create`, for exercising
/// the upload-then-compensate path in tests.
#[derive(Default)]
pub struct AlwaysFailingReferenceStore;

#[async_trait]
impl BlobReferenceStore for AlwaysFailingReferenceStore {
    async fn create(&self, _reference: BlobReference) -> CoreResult<()> {
        Err(CoreError::Internal("reference store unavailable".into()))
    }

    async fn delete(&self, _id: &str) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_offload_respects_threshold() {
        assert!(!should_offload(b"short", 10));
        assert!(should_offload(&vec![0u8; 20], 10));
    }

    #[tokio::test]
    async fn roundtrip_upload_creates_reference_and_downloadable_object() {
        let blobs = InMemoryBlobStore::new();
        let refs = InMemoryBlobReferenceStore::new();
        let reference = upload_to_store(
            &blobs,
            &refs,
            b"{\"hello\":true}".to_vec(),
            "application/json",
            "proj1",
            "brokle-blobs",
            "span",
            "span123",
            "evt1",
        )
        .await
        .unwrap();

        let downloaded = blobs.download(&reference.bucket_path).await.unwrap();
        assert_eq!(downloaded, b"{\"hello\":true}");
    }

    #[tokio::test]
    async fn reference_persist_failure_compensates_by_deleting_blob() {
        let blobs = InMemoryBlobStore::new();
        let refs = AlwaysFailingReferenceStore;
        let result = upload_to_store(
            &blobs,
            &refs,
            b"data".to_vec(),
            "application/json",
            "proj1",
            "brokle-blobs",
            "span",
            "span123",
            "evt1",
        )
        .await;
        assert!(result.is_err());
        assert!(blobs.objects.lock().is_empty());
    }

    #[tokio::test]
    async fn delete_reference_deletes_blob_before_reference_row() {
        let blobs = InMemoryBlobStore::new();
        let refs = InMemoryBlobReferenceStore::new();
        let reference = upload_to_store(
            &blobs, &refs, b"x".repeat(20), "application/json", "p", "b", "span", "s1", "e1",
        )
        .await
        .unwrap();

        delete_reference(&blobs, &refs, &reference).await.unwrap();
        assert!(blobs.download(&reference.bucket_path).await.is_err());
    }
}
