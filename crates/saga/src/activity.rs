//! The capability contract every saga step implements.

use std::sync::Arc;

use async_trait::async_trait;
use common::SagaId;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors an activity reports from `execute` or `compensate`.
///
/// Any error is treated the same way by the orchestrator: an execute
/// failure starts compensation, a compensate failure is retried.
#[derive(Debug, Error)]
pub enum ActivityError {
    /// The forward or undo action failed.
    #[error("{0}")]
    Failed(String),

    /// `initialize` did not provide a collaborator the activity needs.
    #[error("Missing dependency: {0}")]
    MissingDependency(&'static str),

    /// The activity needs a configuration value and none was applied.
    #[error("Activity '{0}' requires configuration")]
    NotConfigured(&'static str),
}

impl ActivityError {
    /// Creates a generic failure from any displayable reason.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        ActivityError::Failed(reason.to_string())
    }
}

/// Runtime collaborators handed to an activity by `initialize`.
///
/// `D` is the host's service bundle: whatever handles the activities need
/// to call out to other services.
pub struct ActivityContext<D> {
    saga_id: SagaId,
    saga_type: Arc<str>,
    services: Arc<D>,
}

impl<D> ActivityContext<D> {
    /// Creates a context for one drive cycle of a saga.
    pub fn new(saga_id: SagaId, saga_type: impl Into<Arc<str>>, services: Arc<D>) -> Self {
        Self {
            saga_id,
            saga_type: saga_type.into(),
            services,
        }
    }

    /// The saga the activity runs for.
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    /// The saga type the activity runs under.
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    /// Collaborator factory shared by every activity of the host.
    pub fn services(&self) -> &Arc<D> {
        &self.services
    }
}

impl<D> Clone for ActivityContext<D> {
    fn clone(&self) -> Self {
        Self {
            saga_id: self.saga_id,
            saga_type: Arc::clone(&self.saga_type),
            services: Arc::clone(&self.services),
        }
    }
}

/// A single saga step with a forward action and its undo.
///
/// Instances are rebuilt from their persisted definition on every drive
/// cycle and must not rely on in-memory state surviving between cycles.
/// Both actions run with at-least-once semantics: a crash after an action
/// started but before its checkpoint was written replays it.
#[async_trait]
pub trait Activity<D>: Send {
    /// Stable human-readable label used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Wires runtime collaborators into a freshly constructed instance.
    ///
    /// Called once per drive cycle, before `execute` or `compensate`.
    fn initialize(&mut self, ctx: &ActivityContext<D>);

    /// Performs the forward action.
    async fn execute(&mut self) -> Result<(), ActivityError>;

    /// Undoes the effect of `execute`.
    async fn compensate(&mut self) -> Result<(), ActivityError>;
}

/// Activities that accept a typed configuration value.
///
/// The registry decodes the persisted JSON into `Config` and calls
/// `configure` exactly once, before the activity runs.
pub trait Configurable {
    type Config: DeserializeOwned + Send + 'static;

    fn configure(&mut self, config: Self::Config);
}
