use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A reference to a blob-offloaded payload, persisted alongside its owning
/// span. `bucket_path` is always `"{entity_type}/{entity_id}/{id}.json"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobReference {
    pub id: String,
    pub project_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub event_id: String,
    pub bucket_name: String,
    pub bucket_path: String,
    pub file_size_bytes: Option<u64>,
    pub content_type: Option<String>,
    pub compression: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlobReference {
    pub fn bucket_path(entity_type: &str, entity_id: &str, id: &str) -> String {
        format!("{entity_type}/{entity_id}/{id}.json")
    }

    pub fn new(
        id: String,
        project_id: String,
        entity_type: String,
        entity_id: String,
        event_id: String,
        bucket_name: String,
        file_size_bytes: Option<u64>,
        content_type: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let bucket_path = Self::bucket_path(&entity_type, &entity_id, &id);
        BlobReference {
            id,
            project_id,
            entity_type,
            entity_id,
            event_id,
            bucket_name,
            bucket_path,
            file_size_bytes,
            content_type,
            compression: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_path_follows_convention() {
        assert_eq!(
            BlobReference::bucket_path("span", "e1", "b1"),
            "span/e1/b1.json"
        );
    }
}
