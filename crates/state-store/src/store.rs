use async_trait::async_trait;

use crate::{Result, SagaId, StoredState, Version};

/// Options for saving a saga record.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Version the stored record must currently have for the save to succeed.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl SaveOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the stored record to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting no record to exist yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// Core trait for saga state storage.
///
/// Implementations must make each `save` atomic: a reader observes either
/// the previous record or the new one, never a mix.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the record for a saga.
    ///
    /// Returns None if the saga has never been saved.
    async fn load(&self, saga_type: &str, saga_id: SagaId) -> Result<Option<StoredState>>;

    /// Saves a record, replacing any previous record for the same saga.
    ///
    /// If `options.expected_version` is set, the save fails with
    /// `ConcurrencyConflict` when the stored version differs.
    ///
    /// Returns the version of the record after the save.
    async fn save(&self, record: StoredState, options: SaveOptions) -> Result<Version>;

    /// Lists every record of a saga type, ordered by saga id.
    async fn list(&self, saga_type: &str) -> Result<Vec<StoredState>>;

    /// Lists the records of a saga type whose state carries a top-level
    /// `status` field equal to one of `statuses`, ordered by saga id.
    async fn list_by_status(&self, saga_type: &str, statuses: &[&str]) -> Result<Vec<StoredState>>;

    /// Deletes the record for a saga. Deleting a missing record is not an error.
    async fn delete(&self, saga_type: &str, saga_id: SagaId) -> Result<()>;
}

/// Extension trait providing convenience methods for state stores.
#[async_trait]
pub trait StateStoreExt: StateStore {
    /// Checks if a record exists for the saga.
    async fn exists(&self, saga_type: &str, saga_id: SagaId) -> Result<bool> {
        Ok(self.load(saga_type, saga_id).await?.is_some())
    }

    /// Gets the stored version of a saga record.
    ///
    /// Returns `Version::initial()` if no record exists.
    async fn current_version(&self, saga_type: &str, saga_id: SagaId) -> Result<Version> {
        Ok(self
            .load(saga_type, saga_id)
            .await?
            .map(|record| record.version)
            .unwrap_or_default())
    }
}

// Blanket implementation for all StateStore implementations
impl<T: StateStore + ?Sized> StateStoreExt for T {}

