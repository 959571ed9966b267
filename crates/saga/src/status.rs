//! Saga lifecycle status.

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// NotStarted ──► Executing ──┬──► Executed
///                            └──► Compensating ──┬──► Compensated
///                                                └──► CompensationFailed
/// ```
///
/// An abort forces any status into `Compensating`. `CompensationFailed` is
/// only reachable under a bounded compensation retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Saga has not been started yet.
    #[default]
    NotStarted,

    /// Activities are being executed in order.
    Executing,

    /// Activities are being compensated in reverse order.
    Compensating,

    /// Every activity executed successfully (terminal state).
    Executed,

    /// Every attempted activity was compensated (terminal state).
    Compensated,

    /// Compensation gave up after exhausting its retry budget (terminal state).
    CompensationFailed,
}

impl SagaStatus {
    /// Returns true if the saga can accept its activity definitions.
    pub fn can_start(&self) -> bool {
        matches!(self, SagaStatus::NotStarted)
    }

    /// Returns true while the drive loop still has work to do.
    pub fn is_active(&self) -> bool {
        matches!(self, SagaStatus::Executing | SagaStatus::Compensating)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Executed | SagaStatus::Compensated | SagaStatus::CompensationFailed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::NotStarted => "NotStarted",
            SagaStatus::Executing => "Executing",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Executed => "Executed",
            SagaStatus::Compensated => "Compensated",
            SagaStatus::CompensationFailed => "CompensationFailed",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
