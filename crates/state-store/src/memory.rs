use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Result, SagaId, StoreError, StoredState, Version,
    store::{SaveOptions, StateStore},
};

type RecordKey = (String, SagaId);

/// In-memory state store implementation.
///
/// Provides the same interface and concurrency checks as the PostgreSQL
/// implementation; used by tests and by the API server when no database
/// is configured.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    records: Arc<RwLock<HashMap<RecordKey, StoredState>>>,
}

impl InMemoryStateStore {
    /// Creates a new empty in-memory state store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of records stored.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Clears all records.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, saga_type: &str, saga_id: SagaId) -> Result<Option<StoredState>> {
        let records = self.records.read().await;
        Ok(records.get(&(saga_type.to_string(), saga_id)).cloned())
    }

    async fn save(&self, record: StoredState, options: SaveOptions) -> Result<Version> {
        let key = (record.saga_type.clone(), record.saga_id);
        let mut records = self.records.write().await;

        let current_version = records
            .get(&key)
            .map(|r| r.version)
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(StoreError::ConcurrencyConflict {
                saga_id: record.saga_id,
                expected,
                actual: current_version,
            });
        }

        // A save must move the version forward (unique constraint simulation)
        if record.version <= current_version {
            return Err(StoreError::ConcurrencyConflict {
                saga_id: record.saga_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let version = record.version;
        records.insert(key, record);
        metrics::counter!("state_store_saves_total", "backend" => "memory").increment(1);

        Ok(version)
    }

    async fn list(&self, saga_type: &str) -> Result<Vec<StoredState>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| r.saga_type == saga_type)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.saga_id);
        Ok(matching)
    }

    async fn list_by_status(&self, saga_type: &str, statuses: &[&str]) -> Result<Vec<StoredState>> {
        let mut matching = self.list(saga_type).await?;
        matching.retain(|r| {
            r.state
                .get("status")
                .and_then(|status| status.as_str())
                .is_some_and(|status| statuses.contains(&status))
        });
        Ok(matching)
    }

    async fn delete(&self, saga_type: &str, saga_id: SagaId) -> Result<()> {
        self.records
            .write()
            .await
            .remove(&(saga_type.to_string(), saga_id));
        Ok(())
    }
}
