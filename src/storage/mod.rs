//! Partial fact storage
//!
//! Each job owns at most two records, `<img_id>:bounding_boxes` and
//! `<img_id>:pii_terms`, holding JSON-serialized collections. The store is the
//! only durable state of the service; correlators hold none of their own.

mod memory;
mod redis_store;

pub use memory::MemoryFactStore;
pub use redis_store::{RedisFactStore, StoreOptions};

use crate::error::{PiiFilterError, Result};
use crate::facts::FactKind;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Key-value view over `(job_id, kind)` composite keys
///
/// Implementations do no retrying of their own. Transport failures and
/// timeouts surface as [`PiiFilterError::StoreUnavailable`].
#[async_trait]
pub trait PartialFactStore: Send + Sync {
    /// Store `payload` under `(job_id, kind)`, replacing any previous value
    async fn put(&self, job_id: &str, kind: FactKind, payload: &str) -> Result<()>;

    /// Previously stored payload, or `None` if the key was never written
    async fn get(&self, job_id: &str, kind: FactKind) -> Result<Option<String>>;

    /// Remove both records of a job. Missing keys are not an error.
    async fn delete_job(&self, job_id: &str) -> Result<()>;
}

/// Composite storage key for one fact record
pub fn fact_key(job_id: &str, kind: FactKind) -> String {
    format!("{}:{}", job_id, kind.as_str())
}

/// Serialize `value` as JSON and store it
pub async fn put_record<T>(
    store: &dyn PartialFactStore,
    job_id: &str,
    kind: FactKind,
    value: &T,
) -> Result<()>
where
    T: Serialize + ?Sized + Sync,
{
    let payload = serde_json::to_string(value).map_err(|e| PiiFilterError::Json {
        source: e,
        context: format!("Failed to serialize {}", fact_key(job_id, kind)),
    })?;
    store.put(job_id, kind, &payload).await
}

/// Load and deserialize a record, distinguishing absent from empty
pub async fn get_record<T>(
    store: &dyn PartialFactStore,
    job_id: &str,
    kind: FactKind,
) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    match store.get(job_id, kind).await? {
        Some(payload) => serde_json::from_str(&payload)
            .map(Some)
            .map_err(|e| PiiFilterError::CorruptRecord {
                key: fact_key(job_id, kind),
                source: e,
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Region;

    #[test]
    fn test_fact_keys() {
        assert_eq!(
            fact_key("image_123", FactKind::Regions),
            "image_123:bounding_boxes"
        );
        assert_eq!(fact_key("image_123", FactKind::Terms), "image_123:pii_terms");
    }

    #[tokio::test]
    async fn test_typed_records() {
        let store = MemoryFactStore::new();
        let regions = vec![Region::new("Hello", 10, 20, 100, 30)];

        put_record(&store, "job", FactKind::Regions, &regions)
            .await
            .unwrap();

        let loaded: Option<Vec<Region>> = get_record(&store, "job", FactKind::Regions)
            .await
            .unwrap();
        assert_eq!(loaded, Some(regions));

        let missing: Option<Vec<String>> = get_record(&store, "job", FactKind::Terms)
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_empty_collection_is_not_absent() {
        let store = MemoryFactStore::new();
        let empty: Vec<String> = Vec::new();
        put_record(&store, "job", FactKind::Terms, &empty)
            .await
            .unwrap();

        let loaded: Option<Vec<String>> = get_record(&store, "job", FactKind::Terms)
            .await
            .unwrap();
        assert_eq!(loaded, Some(vec![]));
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let store = MemoryFactStore::new();
        store.put("job", FactKind::Terms, "{not json").await.unwrap();

        let err = get_record::<Vec<String>>(&store, "job", FactKind::Terms)
            .await
            .unwrap_err();
        match err {
            PiiFilterError::CorruptRecord { key, .. } => assert_eq!(key, "job:pii_terms"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
