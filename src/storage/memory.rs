// Process-local fact store used by tests and single-node runs

use super::{fact_key, PartialFactStore};
use crate::error::{PiiFilterError, Result};
use crate::facts::FactKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// In-memory [`PartialFactStore`] keyed exactly like the Redis store
///
/// Availability can be switched off to simulate a store outage.
#[derive(Debug)]
pub struct MemoryFactStore {
    records: Mutex<HashMap<String, String>>,
    available: AtomicBool,
}

impl MemoryFactStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent call fail with `StoreUnavailable` (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Whether a record exists for `(job_id, kind)`
    pub fn contains(&self, job_id: &str, kind: FactKind) -> bool {
        self.lock().contains_key(&fact_key(job_id, kind))
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map still holds consistent string pairs
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PiiFilterError::StoreUnavailable(
                "memory store switched off".to_string(),
            ))
        }
    }
}

impl Default for MemoryFactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PartialFactStore for MemoryFactStore {
    async fn put(&self, job_id: &str, kind: FactKind, payload: &str) -> Result<()> {
        self.check_available()?;
        self.lock()
            .insert(fact_key(job_id, kind), payload.to_string());
        tracing::debug!("Stored {} for img_id {}", kind, job_id);
        Ok(())
    }

    async fn get(&self, job_id: &str, kind: FactKind) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.lock().get(&fact_key(job_id, kind)).cloned())
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.check_available()?;
        let mut records = self.lock();
        for kind in FactKind::all() {
            records.remove(&fact_key(job_id, kind));
        }
        tracing::debug!("Deleted facts for img_id {}", job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryFactStore::new();
        store.put("job", FactKind::Terms, "[\"a\"]").await.unwrap();
        store.put("job", FactKind::Terms, "[\"b\"]").await.unwrap();

        assert_eq!(
            store.get("job", FactKind::Terms).await.unwrap().as_deref(),
            Some("[\"b\"]")
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_job_removes_both_kinds_only_for_that_job() {
        let store = MemoryFactStore::new();
        store.put("a", FactKind::Terms, "[]").await.unwrap();
        store.put("a", FactKind::Regions, "[]").await.unwrap();
        store.put("b", FactKind::Terms, "[]").await.unwrap();

        store.delete_job("a").await.unwrap();
        assert_eq!(store.keys(), vec!["b:pii_terms".to_string()]);

        // Deleting a job with no records is fine
        store.delete_job("never-written").await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryFactStore::new();
        store.set_available(false);

        let err = store.put("job", FactKind::Terms, "[]").await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.is_empty());

        store.set_available(true);
        store.put("job", FactKind::Terms, "[]").await.unwrap();
        assert!(store.contains("job", FactKind::Terms));
    }
}
