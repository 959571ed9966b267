//! Orchestrator settings.

use std::time::Duration;

/// How a failing compensation is retried.
///
/// The default retries forever at a fixed delay; a saga that cannot be
/// compensated stays in `Compensating` and keeps trying. `bounded` opts
/// into giving up after `max_attempts` consecutive failures within one
/// drive cycle, ending in `SagaStatus::CompensationFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompensationRetryPolicy {
    /// Fixed pause before retrying the same compensation.
    pub delay: Duration,
    /// Consecutive failures tolerated before giving up; None retries forever.
    pub max_attempts: Option<u32>,
}

impl CompensationRetryPolicy {
    /// Retries forever at a fixed delay.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Gives up after `max_attempts` consecutive failures.
    pub fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Returns true once `attempts` failures exhaust the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl Default for CompensationRetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(5))
    }
}

/// Settings for one saga type.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Saga type; scopes stored records and the reminder name.
    pub saga_type: String,
    /// Name of the recovery reminder.
    pub reminder_name: String,
    /// Delay before the first recovery tick.
    pub reminder_due: Duration,
    /// Interval between recovery ticks.
    pub reminder_period: Duration,
    /// Retry behaviour for failing compensations.
    pub compensation_retry: CompensationRetryPolicy,
}

impl OrchestratorConfig {
    /// Creates a configuration with defaults for the given saga type.
    pub fn new(saga_type: impl Into<String>) -> Self {
        let saga_type = saga_type.into();
        Self {
            reminder_name: format!("{saga_type}.recovery"),
            saga_type,
            reminder_due: Duration::from_secs(60),
            reminder_period: Duration::from_secs(60),
            compensation_retry: CompensationRetryPolicy::default(),
        }
    }

    /// Overrides the reminder name.
    pub fn with_reminder_name(mut self, name: impl Into<String>) -> Self {
        self.reminder_name = name.into();
        self
    }

    /// Sets the recovery reminder schedule.
    pub fn with_reminder_schedule(mut self, due: Duration, period: Duration) -> Self {
        self.reminder_due = due;
        self.reminder_period = period;
        self
    }

    /// Sets the compensation retry policy.
    pub fn with_compensation_retry(mut self, policy: CompensationRetryPolicy) -> Self {
        self.compensation_retry = policy;
        self
    }
}
