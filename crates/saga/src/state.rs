//! Durable saga progress record.

use serde::{Deserialize, Serialize};
use state_store::Version;

use crate::status::SagaStatus;

/// One step of a saga as persisted: a registered type tag plus an optional
/// opaque configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDefinition {
    /// Tag of the registered activity factory.
    pub activity_type: String,
    /// Configuration applied to the activity before it runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl ActivityDefinition {
    /// Creates a definition without configuration.
    pub fn new(activity_type: impl Into<String>) -> Self {
        Self {
            activity_type: activity_type.into(),
            config: None,
        }
    }

    /// Creates a definition with a typed configuration value.
    pub fn with_config<T: Serialize>(
        activity_type: impl Into<String>,
        config: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            activity_type: activity_type.into(),
            config: Some(serde_json::to_value(config)?),
        })
    }

    /// Creates a definition with a raw JSON configuration value.
    pub fn with_raw_config(activity_type: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            activity_type: activity_type.into(),
            config: Some(config),
        }
    }
}

/// The direction a saga was moving when an activity failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePhase {
    Execute,
    Compensate,
}

/// Diagnostic record of the most recent activity failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityFailure {
    /// Index of the failing activity.
    pub index: usize,
    /// Name reported by the activity.
    pub activity: String,
    /// Whether `execute` or `compensate` failed.
    pub phase: FailurePhase,
    /// Error message returned by the activity.
    pub reason: String,
    /// Consecutive failed attempts on this index during the current cycle.
    pub attempts: u32,
}

/// Progress of a single saga instance.
///
/// Every mutation here is followed by a durable write before the
/// orchestrator takes any further externally observable action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaState {
    status: SagaStatus,
    activity_definitions: Vec<ActivityDefinition>,
    num_completed_activities: usize,
    compensation_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<ActivityFailure>,
    /// Version of the stored record this state was loaded from.
    #[serde(skip)]
    version: Version,
}

impl Default for SagaState {
    fn default() -> Self {
        Self {
            status: SagaStatus::NotStarted,
            activity_definitions: Vec::new(),
            num_completed_activities: 0,
            compensation_index: -1,
            failure: None,
            version: Version::initial(),
        }
    }
}

// Transitions
impl SagaState {
    /// Stores the activity chain and moves to `Executing`.
    ///
    /// Returns false, leaving the state untouched, if the saga was already
    /// started: definitions are set exactly once.
    pub fn start(&mut self, definitions: Vec<ActivityDefinition>) -> bool {
        if !self.status.can_start() {
            return false;
        }
        self.activity_definitions = definitions;
        self.num_completed_activities = 0;
        self.compensation_index = -1;
        self.status = SagaStatus::Executing;
        true
    }

    /// Advances the execution cursor past the activity that just succeeded.
    pub fn record_executed(&mut self) {
        debug_assert_eq!(self.status, SagaStatus::Executing);
        debug_assert!(self.num_completed_activities < self.activity_definitions.len());
        self.num_completed_activities += 1;
    }

    /// Switches to compensation starting at the activity that just failed.
    ///
    /// The failed activity itself is compensated, since a failed `execute`
    /// may have applied part of its effect.
    pub fn record_execute_failure(&mut self, activity: impl Into<String>, reason: impl Into<String>) {
        let index = self.num_completed_activities;
        self.compensation_index = index as i64;
        self.status = SagaStatus::Compensating;
        self.failure = Some(ActivityFailure {
            index,
            activity: activity.into(),
            phase: FailurePhase::Execute,
            reason: reason.into(),
            attempts: 1,
        });
    }

    /// Marks the whole chain as executed.
    pub fn mark_executed(&mut self) {
        self.status = SagaStatus::Executed;
    }

    /// Moves the compensation cursor down past the activity just compensated.
    pub fn record_compensated(&mut self) {
        debug_assert!(self.compensation_index >= 0);
        self.compensation_index -= 1;
    }

    /// Records a failed compensation attempt. The cursor does not move.
    pub fn record_compensation_failure(
        &mut self,
        activity: impl Into<String>,
        reason: impl Into<String>,
        attempts: u32,
    ) {
        self.failure = Some(ActivityFailure {
            index: self.compensation_index.max(0) as usize,
            activity: activity.into(),
            phase: FailurePhase::Compensate,
            reason: reason.into(),
            attempts,
        });
    }

    /// Marks compensation as finished.
    pub fn mark_compensated(&mut self) {
        self.status = SagaStatus::Compensated;
    }

    /// Marks compensation as abandoned after exhausting its retry budget.
    pub fn mark_compensation_failed(&mut self) {
        self.status = SagaStatus::CompensationFailed;
    }

    /// Forces the saga into `Compensating`, whatever its current status.
    ///
    /// From `NotStarted`, `Executing` or `Executed` the compensation cursor
    /// is placed on the activity at the execution cursor (clamped to the
    /// last activity), so an in-progress activity is compensated too. From
    /// any compensation status the cursor is kept, so no compensation
    /// progress is lost.
    pub fn abort(&mut self) {
        match self.status {
            SagaStatus::NotStarted | SagaStatus::Executing | SagaStatus::Executed => {
                let last = self.activity_definitions.len() as i64 - 1;
                self.compensation_index = (self.num_completed_activities as i64).min(last);
            }
            SagaStatus::Compensating
            | SagaStatus::Compensated
            | SagaStatus::CompensationFailed => {}
        }
        self.status = SagaStatus::Compensating;
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Checks the record's structural invariants.
    pub fn validate(&self) -> Result<(), String> {
        let len = self.activity_definitions.len();
        if self.num_completed_activities > len {
            return Err(format!(
                "num_completed_activities {} exceeds {} activities",
                self.num_completed_activities, len
            ));
        }
        if self.compensation_index < -1 || self.compensation_index >= len as i64 {
            return Err(format!(
                "compensation_index {} outside -1..{}",
                self.compensation_index, len
            ));
        }
        if self.status == SagaStatus::NotStarted && !self.activity_definitions.is_empty() {
            return Err("activity definitions stored on a saga that never started".to_string());
        }
        Ok(())
    }
}

// Query methods
impl SagaState {
    /// Returns the saga status.
    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Returns the persisted activity chain.
    pub fn activity_definitions(&self) -> &[ActivityDefinition] {
        &self.activity_definitions
    }

    /// Returns the number of activities in the chain.
    pub fn activity_count(&self) -> usize {
        self.activity_definitions.len()
    }

    /// Returns the execution cursor.
    pub fn num_completed_activities(&self) -> usize {
        self.num_completed_activities
    }

    /// Returns the raw compensation cursor (-1 once nothing is left to undo).
    pub fn compensation_index(&self) -> i64 {
        self.compensation_index
    }

    /// Returns the index of the next activity to execute, if any.
    pub fn execution_cursor(&self) -> Option<usize> {
        (self.num_completed_activities < self.activity_definitions.len())
            .then_some(self.num_completed_activities)
    }

    /// Returns the index of the next activity to compensate, if any.
    pub fn compensation_cursor(&self) -> Option<usize> {
        usize::try_from(self.compensation_index).ok()
    }

    /// Returns the most recent activity failure, if any.
    pub fn failure(&self) -> Option<&ActivityFailure> {
        self.failure.as_ref()
    }

    /// Returns the version of the stored record this state was loaded from.
    pub fn version(&self) -> Version {
        self.version
    }
}
