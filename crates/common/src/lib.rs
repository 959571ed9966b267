//! Shared types for the saga orchestrator workspace.

pub mod types;

pub use types::{ParseSagaIdError, SagaId};
