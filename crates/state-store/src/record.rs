use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{SagaId, Version};

/// The durable record of one saga instance.
///
/// The store treats `state` as opaque JSON; the orchestrator owns its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredState {
    /// The saga this record belongs to.
    pub saga_id: SagaId,

    /// The saga type (e.g., "OrderFulfillment").
    pub saga_type: String,

    /// The version this record will have once saved.
    pub version: Version,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,

    /// The serialized saga state.
    pub state: serde_json::Value,
}

impl StoredState {
    /// Creates a new record.
    pub fn new(
        saga_id: SagaId,
        saga_type: impl Into<String>,
        version: Version,
        state: serde_json::Value,
    ) -> Self {
        Self {
            saga_id,
            saga_type: saga_type.into(),
            version,
            updated_at: Utc::now(),
            state,
        }
    }

    /// Creates a record from a serializable state.
    pub fn from_state<T: Serialize>(
        saga_id: SagaId,
        saga_type: impl Into<String>,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            saga_id,
            saga_type,
            version,
            serde_json::to_value(state)?,
        ))
    }

    /// Deserializes the record into a concrete state type.
    pub fn into_state<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }

    /// Gets a reference to the state as JSON.
    pub fn state_ref(&self) -> &serde_json::Value {
        &self.state
    }
}
