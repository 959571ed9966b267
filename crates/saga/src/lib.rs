//! Saga orchestration.
//!
//! A saga runs an ordered chain of activities as a pseudo-transaction. The
//! [`SagaOrchestrator`] executes the activities in order, checkpointing
//! after every step; if one fails it compensates the failed activity and
//! every one before it in reverse order. A recovery reminder keeps waking
//! an unsettled saga until it reaches a terminal status, so a saga
//! interrupted by a crash finishes without outside help.
//!
//! Each saga instance is owned by a single worker task ([`SagaHost`]),
//! which serializes Execute, Abort, Resume and reminder ticks for it.

pub mod activity;
pub mod config;
pub mod error;
pub mod fulfillment;
pub mod host;
pub mod orchestrator;
pub mod registry;
pub mod reminder;
pub mod state;
pub mod status;

pub use activity::{Activity, ActivityContext, ActivityError, Configurable};
pub use config::{CompensationRetryPolicy, OrchestratorConfig};
pub use error::{Result, SagaError};
pub use host::{SagaCommand, SagaHandle, SagaHost, SagaSnapshot};
pub use orchestrator::{DriveHooks, SagaOrchestrator};
pub use registry::ActivityRegistry;
pub use reminder::{ReminderHandle, ReminderService, ReminderTick, TokioReminderService};
pub use state::{ActivityDefinition, ActivityFailure, FailurePhase, SagaState};
pub use status::SagaStatus;
