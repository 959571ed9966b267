//! Durable keyed storage for saga state.
//!
//! Every saga instance owns exactly one record, addressed by
//! `(saga_type, saga_id)`. Writes are atomic per record and guarded by an
//! optimistic [`Version`], so a stale writer can never silently overwrite a
//! newer checkpoint.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;
pub mod version;

pub use common::SagaId;
pub use error::{Result, StoreError};
pub use memory::InMemoryStateStore;
pub use postgres::PostgresStateStore;
pub use record::StoredState;
pub use store::{SaveOptions, StateStore, StateStoreExt};
pub use version::Version;
