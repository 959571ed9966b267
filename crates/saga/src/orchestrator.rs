//! The resume/execute/compensate state machine.
//!
//! The orchestrator keeps no per-saga state of its own: every operation
//! loads the saga's record from the store, and every transition is written
//! back before anything else happens. A crash therefore loses at most the
//! one activity call that was in flight, and the next drive replays it.

use std::sync::Arc;

use common::SagaId;
use state_store::{SaveOptions, StateStore, StoredState, Version};

use crate::activity::{Activity, ActivityContext};
use crate::config::OrchestratorConfig;
use crate::error::{Result, SagaError};
use crate::registry::ActivityRegistry;
use crate::reminder::ReminderService;
use crate::state::{ActivityDefinition, SagaState};
use crate::status::SagaStatus;

/// Callbacks invoked by [`SagaOrchestrator::drive`] between steps.
///
/// The worker driving a saga uses these to publish progress and to slip an
/// abort in between two activity calls.
pub trait DriveHooks: Send {
    /// Called after the initial load and after every durable write.
    fn checkpointed(&mut self, _state: &SagaState) {}

    /// Consulted after every successful step and after every failed
    /// compensation attempt; returning true applies an abort before the
    /// next call starts.
    fn abort_requested(&mut self) -> bool {
        false
    }
}

impl DriveHooks for () {}

type Activities<D> = Vec<Box<dyn Activity<D>>>;

/// Drives sagas of one type through their activity chains.
pub struct SagaOrchestrator<S, D>
where
    S: StateStore,
{
    store: S,
    registry: Arc<ActivityRegistry<D>>,
    reminders: Arc<dyn ReminderService>,
    services: Arc<D>,
    config: OrchestratorConfig,
}

impl<S, D> SagaOrchestrator<S, D>
where
    S: StateStore,
    D: Send + Sync + 'static,
{
    /// Creates a new orchestrator.
    pub fn new(
        store: S,
        registry: Arc<ActivityRegistry<D>>,
        reminders: Arc<dyn ReminderService>,
        services: Arc<D>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            reminders,
            services,
            config,
        }
    }

    /// Returns the orchestrator's settings.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Returns the registry used to rehydrate activities.
    pub fn registry(&self) -> &ActivityRegistry<D> {
        &self.registry
    }

    /// Returns the underlying state store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Starts a saga with the given activity chain.
    ///
    /// Only a saga that was never started takes the definitions; for any
    /// other status this is a no-op and the caller's following drive acts
    /// as a resume. The recovery reminder is armed once the chain is stored.
    #[tracing::instrument(skip(self, definitions), fields(saga_type = %self.config.saga_type))]
    pub async fn execute(
        &self,
        saga_id: SagaId,
        definitions: Vec<ActivityDefinition>,
    ) -> Result<SagaState> {
        let mut state = self.load(saga_id).await?;
        let activity_count = definitions.len();

        if !state.start(definitions) {
            tracing::info!(
                %saga_id,
                status = %state.status(),
                "saga already started, execute treated as resume"
            );
            return Ok(state);
        }

        self.persist(saga_id, &mut state).await?;
        self.arm_reminder(saga_id).await?;

        metrics::counter!("saga_executions_total").increment(1);
        tracing::info!(%saga_id, activity_count, "saga started");
        Ok(state)
    }

    /// Forces the saga into compensation.
    ///
    /// Only the status change is written here; the next drive (a resume or
    /// a reminder tick) runs the compensations.
    #[tracing::instrument(skip(self), fields(saga_type = %self.config.saga_type))]
    pub async fn abort(&self, saga_id: SagaId) -> Result<SagaState> {
        let mut state = self.load(saga_id).await?;
        self.apply_abort(saga_id, &mut state, &mut ()).await?;
        Ok(state)
    }

    /// Returns the persisted status of a saga.
    pub async fn status(&self, saga_id: SagaId) -> Result<SagaStatus> {
        Ok(self.load(saga_id).await?.status())
    }

    /// Returns the persisted progress record of a saga.
    pub async fn snapshot(&self, saga_id: SagaId) -> Result<SagaState> {
        self.load(saga_id).await
    }

    /// Lists the sagas of this type that are still executing or compensating.
    pub async fn in_flight(&self) -> Result<Vec<SagaId>> {
        let active_statuses = [
            SagaStatus::Executing.as_str(),
            SagaStatus::Compensating.as_str(),
        ];
        let records = self
            .store
            .list_by_status(&self.config.saga_type, &active_statuses)
            .await?;
        let mut active = Vec::new();
        for record in records {
            let saga_id = record.saga_id;
            match record.into_state::<SagaState>() {
                Ok(state) if state.status().is_active() => active.push(saga_id),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(%saga_id, error = %e, "skipping unreadable saga record");
                }
            }
        }
        Ok(active)
    }

    /// Runs the saga until it settles.
    ///
    /// Executes activities forward until one fails or the chain completes,
    /// then compensates backward from the failed activity. Each step is
    /// checkpointed before the next begins. Once the saga settles the
    /// recovery reminder is removed; if the cycle fails with an error the
    /// reminder stays armed and retries it later.
    #[tracing::instrument(skip(self, hooks), fields(saga_type = %self.config.saga_type))]
    pub async fn drive<H: DriveHooks>(&self, saga_id: SagaId, hooks: &mut H) -> Result<SagaStatus> {
        let started = std::time::Instant::now();
        let mut state = self.load(saga_id).await?;
        let initial = state.status();
        hooks.checkpointed(&state);

        if initial.is_active() {
            let mut activities = self.registry.rehydrate(state.activity_definitions())?;
            let ctx = ActivityContext::new(
                saga_id,
                self.config.saga_type.as_str(),
                Arc::clone(&self.services),
            );
            for activity in activities.iter_mut() {
                activity.initialize(&ctx);
            }

            loop {
                match state.status() {
                    SagaStatus::Executing => {
                        self.run_execution(saga_id, &mut state, &mut activities, hooks)
                            .await?
                    }
                    SagaStatus::Compensating => {
                        self.run_compensation(saga_id, &mut state, &mut activities, hooks)
                            .await?
                    }
                    _ => break,
                }
            }
        }

        metrics::histogram!("saga_drive_duration_seconds").record(started.elapsed().as_secs_f64());
        self.log_outcome(saga_id, &state, initial != state.status());
        self.cancel_reminder(saga_id).await?;
        Ok(state.status())
    }

    async fn run_execution<H: DriveHooks>(
        &self,
        saga_id: SagaId,
        state: &mut SagaState,
        activities: &mut Activities<D>,
        hooks: &mut H,
    ) -> Result<()> {
        while let Some(index) = state.execution_cursor() {
            let activity = &mut activities[index];
            let name = activity.name().to_string();
            tracing::info!(%saga_id, index, activity = %name, "executing activity");

            match activity.execute().await {
                Ok(()) => {
                    metrics::counter!("saga_activities_executed_total").increment(1);
                    state.record_executed();
                    self.checkpoint(saga_id, state, hooks).await?;

                    if hooks.abort_requested() {
                        tracing::info!(%saga_id, index, "abort requested between steps");
                        return self.apply_abort(saga_id, state, hooks).await;
                    }
                }
                Err(e) => {
                    metrics::counter!("saga_activity_failures_total").increment(1);
                    tracing::warn!(
                        %saga_id,
                        index,
                        activity = %name,
                        error = %e,
                        "activity failed, compensating"
                    );
                    state.record_execute_failure(name, e.to_string());
                    return self.checkpoint(saga_id, state, hooks).await;
                }
            }
        }

        state.mark_executed();
        self.checkpoint(saga_id, state, hooks).await
    }

    async fn run_compensation<H: DriveHooks>(
        &self,
        saga_id: SagaId,
        state: &mut SagaState,
        activities: &mut Activities<D>,
        hooks: &mut H,
    ) -> Result<()> {
        let policy = self.config.compensation_retry;
        let mut attempts = 0u32;

        while let Some(index) = state.compensation_cursor() {
            let activity = &mut activities[index];
            let name = activity.name().to_string();
            tracing::info!(%saga_id, index, activity = %name, "compensating activity");

            match activity.compensate().await {
                Ok(()) => {
                    metrics::counter!("saga_compensations_total").increment(1);
                    attempts = 0;
                    state.record_compensated();
                    self.checkpoint(saga_id, state, hooks).await?;

                    // Already compensating; applying keeps the cursor and
                    // acknowledges the request once written.
                    if hooks.abort_requested() {
                        self.apply_abort(saga_id, state, hooks).await?;
                    }
                }
                Err(e) => {
                    attempts += 1;
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    state.record_compensation_failure(&name, e.to_string(), attempts);
                    self.checkpoint(saga_id, state, hooks).await?;

                    if policy.is_exhausted(attempts) {
                        tracing::error!(
                            %saga_id,
                            index,
                            activity = %name,
                            attempts,
                            error = %e,
                            "compensation retries exhausted"
                        );
                        state.mark_compensation_failed();
                        return self.checkpoint(saga_id, state, hooks).await;
                    }

                    if hooks.abort_requested() {
                        self.apply_abort(saga_id, state, hooks).await?;
                    }

                    tracing::warn!(
                        %saga_id,
                        index,
                        activity = %name,
                        attempts,
                        error = %e,
                        retry_in_ms = policy.delay.as_millis() as u64,
                        "compensation failed, retrying"
                    );
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }

        state.mark_compensated();
        self.checkpoint(saga_id, state, hooks).await
    }

    async fn apply_abort<H: DriveHooks>(
        &self,
        saga_id: SagaId,
        state: &mut SagaState,
        hooks: &mut H,
    ) -> Result<()> {
        let previous = state.status();
        state.abort();
        self.checkpoint(saga_id, state, hooks).await?;
        self.arm_reminder(saga_id).await?;
        tracing::info!(
            %saga_id,
            previous = %previous,
            compensation_index = state.compensation_index(),
            "saga aborted"
        );
        Ok(())
    }

    async fn checkpoint<H: DriveHooks>(
        &self,
        saga_id: SagaId,
        state: &mut SagaState,
        hooks: &mut H,
    ) -> Result<()> {
        self.persist(saga_id, state).await?;
        hooks.checkpointed(state);
        Ok(())
    }

    /// Loads the saga's state, or a fresh `NotStarted` state if none exists.
    async fn load(&self, saga_id: SagaId) -> Result<SagaState> {
        let Some(record) = self.store.load(&self.config.saga_type, saga_id).await? else {
            return Ok(SagaState::default());
        };

        let version = record.version;
        let mut state: SagaState = record
            .into_state()
            .map_err(|e| SagaError::CorruptState {
                saga_id,
                reason: e.to_string(),
            })?;
        state
            .validate()
            .map_err(|reason| SagaError::CorruptState { saga_id, reason })?;
        state.set_version(version);
        Ok(state)
    }

    /// Writes the state as the next version of the saga's record.
    async fn persist(&self, saga_id: SagaId, state: &mut SagaState) -> Result<()> {
        let expected = state.version();
        let record = StoredState::from_state(saga_id, &self.config.saga_type, expected.next(), state)?;
        let options = if expected == Version::initial() {
            SaveOptions::expect_new()
        } else {
            SaveOptions::expect_version(expected)
        };

        let version = self.store.save(record, options).await?;
        state.set_version(version);
        tracing::debug!(
            %saga_id,
            status = %state.status(),
            version = %version,
            "checkpoint written"
        );
        Ok(())
    }

    async fn arm_reminder(&self, saga_id: SagaId) -> Result<()> {
        self.reminders
            .register_or_update(
                saga_id,
                &self.config.reminder_name,
                self.config.reminder_due,
                self.config.reminder_period,
            )
            .await?;
        Ok(())
    }

    /// Removes the recovery reminder whether or not this process armed it.
    async fn cancel_reminder(&self, saga_id: SagaId) -> Result<()> {
        let handle = self
            .reminders
            .register_or_update(
                saga_id,
                &self.config.reminder_name,
                self.config.reminder_due,
                self.config.reminder_period,
            )
            .await?;
        self.reminders.cancel(handle).await
    }

    /// `settled` is true when this drive moved the saga into its status.
    fn log_outcome(&self, saga_id: SagaId, state: &SagaState, settled: bool) {
        if !settled && state.status().is_terminal() {
            tracing::debug!(%saga_id, status = %state.status(), "saga already settled");
            return;
        }
        match state.status() {
            SagaStatus::NotStarted => {
                tracing::warn!(%saga_id, "resume invoked on a saga that was never started");
            }
            SagaStatus::Executed => {
                metrics::counter!("saga_completed").increment(1);
                tracing::info!(
                    %saga_id,
                    activity_count = state.activity_count(),
                    "saga executed"
                );
            }
            SagaStatus::Compensated => {
                metrics::counter!("saga_compensated").increment(1);
                tracing::info!(
                    %saga_id,
                    failure = ?state.failure(),
                    "saga compensated"
                );
            }
            SagaStatus::CompensationFailed => {
                tracing::error!(
                    %saga_id,
                    failure = ?state.failure(),
                    "saga compensation abandoned"
                );
            }
            SagaStatus::Executing | SagaStatus::Compensating => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::Deserialize;
    use state_store::InMemoryStateStore;

    use super::*;
    use crate::activity::{ActivityError, Configurable};
    use crate::config::CompensationRetryPolicy;
    use crate::reminder::TokioReminderService;
    use crate::state::FailurePhase;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        compensation_failures: Mutex<u32>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn take_compensation_failure(&self) -> bool {
            let mut remaining = self.compensation_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        }
    }

    #[derive(Debug, Default, Deserialize)]
    struct StepConfig {
        label: String,
        #[serde(default)]
        fail: bool,
    }

    #[derive(Default)]
    struct Step {
        config: StepConfig,
        recorder: Option<Arc<Recorder>>,
    }

    #[async_trait]
    impl Activity<Recorder> for Step {
        fn name(&self) -> &str {
            &self.config.label
        }

        fn initialize(&mut self, ctx: &ActivityContext<Recorder>) {
            self.recorder = Some(Arc::clone(ctx.services()));
        }

        async fn execute(&mut self) -> std::result::Result<(), ActivityError> {
            let recorder = self
                .recorder
                .as_ref()
                .ok_or(ActivityError::MissingDependency("recorder"))?;
            recorder.push(format!("execute:{}", self.config.label));
            if self.config.fail {
                return Err(ActivityError::failed("step failed"));
            }
            Ok(())
        }

        async fn compensate(&mut self) -> std::result::Result<(), ActivityError> {
            let recorder = self
                .recorder
                .as_ref()
                .ok_or(ActivityError::MissingDependency("recorder"))?;
            recorder.push(format!("compensate:{}", self.config.label));
            if recorder.take_compensation_failure() {
                return Err(ActivityError::failed("undo failed"));
            }
            Ok(())
        }
    }

    impl Configurable for Step {
        type Config = StepConfig;

        fn configure(&mut self, config: StepConfig) {
            self.config = config;
        }
    }

    struct Fixture {
        orchestrator: SagaOrchestrator<InMemoryStateStore, Recorder>,
        recorder: Arc<Recorder>,
        reminders: TokioReminderService,
        store: InMemoryStateStore,
        _ticks: tokio::sync::mpsc::UnboundedReceiver<crate::reminder::ReminderTick>,
    }

    fn fixture(policy: CompensationRetryPolicy) -> Fixture {
        let mut registry = ActivityRegistry::new();
        registry.register_configurable("step", Step::default);

        let store = InMemoryStateStore::new();
        let recorder = Arc::new(Recorder::default());
        let (reminders, ticks) = TokioReminderService::new();
        let config = OrchestratorConfig::new("Test").with_compensation_retry(policy);

        Fixture {
            orchestrator: SagaOrchestrator::new(
                store.clone(),
                Arc::new(registry),
                Arc::new(reminders.clone()),
                Arc::clone(&recorder),
                config,
            ),
            recorder,
            reminders,
            store,
            _ticks: ticks,
        }
    }

    fn step(label: &str) -> ActivityDefinition {
        ActivityDefinition::with_raw_config("step", serde_json::json!({ "label": label }))
    }

    fn failing_step(label: &str) -> ActivityDefinition {
        ActivityDefinition::with_raw_config(
            "step",
            serde_json::json!({ "label": label, "fail": true }),
        )
    }

    /// Aborts after a fixed number of checkpoints.
    struct AbortAfter {
        checkpoints: usize,
        seen: usize,
    }

    impl DriveHooks for AbortAfter {
        fn checkpointed(&mut self, _state: &SagaState) {
            self.seen += 1;
        }

        fn abort_requested(&mut self) -> bool {
            self.seen > self.checkpoints
        }
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        f.orchestrator
            .execute(saga_id, vec![step("a"), step("b"), step("c")])
            .await
            .unwrap();
        let status = f.orchestrator.drive(saga_id, &mut ()).await.unwrap();

        assert_eq!(status, SagaStatus::Executed);
        assert_eq!(
            f.recorder.calls(),
            vec!["execute:a", "execute:b", "execute:c"]
        );
        let state = f.orchestrator.snapshot(saga_id).await.unwrap();
        assert_eq!(state.num_completed_activities(), 3);
    }

    #[tokio::test]
    async fn test_failure_compensates_failed_step_and_predecessors() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        f.orchestrator
            .execute(saga_id, vec![step("a"), failing_step("b"), step("c")])
            .await
            .unwrap();
        let status = f.orchestrator.drive(saga_id, &mut ()).await.unwrap();

        assert_eq!(status, SagaStatus::Compensated);
        assert_eq!(
            f.recorder.calls(),
            vec!["execute:a", "execute:b", "compensate:b", "compensate:a"]
        );
        let state = f.orchestrator.snapshot(saga_id).await.unwrap();
        assert_eq!(state.compensation_index(), -1);
        assert_eq!(state.failure().unwrap().activity, "b");
    }

    #[tokio::test]
    async fn test_every_transition_is_checkpointed() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        f.orchestrator
            .execute(saga_id, vec![step("a"), step("b")])
            .await
            .unwrap();
        f.orchestrator.drive(saga_id, &mut ()).await.unwrap();

        // start + two steps + executed
        let state = f.orchestrator.snapshot(saga_id).await.unwrap();
        assert_eq!(state.version(), Version::new(4));
    }

    #[tokio::test]
    async fn test_second_execute_keeps_original_definitions() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        f.orchestrator.execute(saga_id, vec![step("a")]).await.unwrap();
        let state = f
            .orchestrator
            .execute(saga_id, vec![step("x"), step("y")])
            .await
            .unwrap();

        assert_eq!(state.activity_count(), 1);
        assert_eq!(state.version(), Version::first());
    }

    #[tokio::test]
    async fn test_drive_on_unstarted_saga_writes_nothing() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        let status = f.orchestrator.drive(saga_id, &mut ()).await.unwrap();

        assert_eq!(status, SagaStatus::NotStarted);
        assert!(f.recorder.calls().is_empty());
        assert_eq!(f.store.record_count().await, 0);
        assert_eq!(f.reminders.registered_count().await, 0);
    }

    #[tokio::test]
    async fn test_abort_between_steps_starts_compensation_at_cursor() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        f.orchestrator
            .execute(saga_id, vec![step("a"), step("b"), step("c")])
            .await
            .unwrap();
        // Initial load, then the checkpoint after "a"; the cursor sits on "b"
        let mut hooks = AbortAfter {
            checkpoints: 1,
            seen: 0,
        };
        let status = f.orchestrator.drive(saga_id, &mut hooks).await.unwrap();

        assert_eq!(status, SagaStatus::Compensated);
        assert_eq!(
            f.recorder.calls(),
            vec!["execute:a", "compensate:b", "compensate:a"]
        );
    }

    /// Requests an abort once a compensation attempt has failed.
    #[derive(Default)]
    struct AbortWhileRetrying {
        retrying: bool,
        aborted: bool,
    }

    impl DriveHooks for AbortWhileRetrying {
        fn checkpointed(&mut self, state: &SagaState) {
            self.retrying = state
                .failure()
                .is_some_and(|failure| failure.phase == FailurePhase::Compensate);
        }

        fn abort_requested(&mut self) -> bool {
            if self.retrying && !self.aborted {
                self.aborted = true;
                return true;
            }
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_is_observed_between_compensation_retries() {
        let f = fixture(CompensationRetryPolicy::unbounded(Duration::from_secs(5)));
        *f.recorder.compensation_failures.lock().unwrap() = 1;
        let saga_id = SagaId::new();

        f.orchestrator
            .execute(saga_id, vec![step("a"), failing_step("b")])
            .await
            .unwrap();
        let mut hooks = AbortWhileRetrying::default();
        let status = f.orchestrator.drive(saga_id, &mut hooks).await.unwrap();

        assert!(hooks.aborted);
        assert_eq!(status, SagaStatus::Compensated);
        // The abort keeps the cursor on "b", which is retried before "a"
        assert_eq!(
            f.recorder.calls(),
            vec!["execute:a", "execute:b", "compensate:b", "compensate:b", "compensate:a"]
        );
    }

    #[tokio::test]
    async fn test_abort_of_idle_saga_only_writes_status() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        f.orchestrator
            .execute(saga_id, vec![step("a"), step("b")])
            .await
            .unwrap();
        let state = f.orchestrator.abort(saga_id).await.unwrap();

        assert_eq!(state.status(), SagaStatus::Compensating);
        assert_eq!(state.compensation_index(), 0);
        assert!(f.recorder.calls().is_empty());
        assert!(
            f.reminders
                .is_registered(saga_id, "Test.recovery")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_abort_after_executed_compensates_everything() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        f.orchestrator
            .execute(saga_id, vec![step("a"), step("b")])
            .await
            .unwrap();
        f.orchestrator.drive(saga_id, &mut ()).await.unwrap();
        f.orchestrator.abort(saga_id).await.unwrap();
        let status = f.orchestrator.drive(saga_id, &mut ()).await.unwrap();

        assert_eq!(status, SagaStatus::Compensated);
        assert_eq!(
            f.recorder.calls(),
            vec!["execute:a", "execute:b", "compensate:b", "compensate:a"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_compensation_failure_retries_same_index() {
        let f = fixture(CompensationRetryPolicy::unbounded(Duration::from_secs(5)));
        *f.recorder.compensation_failures.lock().unwrap() = 2;
        let saga_id = SagaId::new();

        f.orchestrator
            .execute(saga_id, vec![step("a"), failing_step("b")])
            .await
            .unwrap();
        let started = tokio::time::Instant::now();
        let status = f.orchestrator.drive(saga_id, &mut ()).await.unwrap();

        assert_eq!(status, SagaStatus::Compensated);
        assert_eq!(
            f.recorder.calls(),
            vec![
                "execute:a",
                "execute:b",
                "compensate:b",
                "compensate:b",
                "compensate:b",
                "compensate:a"
            ]
        );
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_ends_in_compensation_failed() {
        let f = fixture(CompensationRetryPolicy::bounded(Duration::from_secs(1), 2));
        *f.recorder.compensation_failures.lock().unwrap() = 10;
        let saga_id = SagaId::new();

        f.orchestrator
            .execute(saga_id, vec![step("a"), failing_step("b")])
            .await
            .unwrap();
        let status = f.orchestrator.drive(saga_id, &mut ()).await.unwrap();

        assert_eq!(status, SagaStatus::CompensationFailed);
        let state = f.orchestrator.snapshot(saga_id).await.unwrap();
        assert_eq!(state.compensation_index(), 1);
        assert_eq!(state.failure().unwrap().attempts, 2);
        assert!(!f.recorder.calls().contains(&"compensate:a".to_string()));
    }

    #[tokio::test]
    async fn test_reminder_armed_by_execute_and_cancelled_after_settling() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        f.orchestrator.execute(saga_id, vec![step("a")]).await.unwrap();
        assert!(
            f.reminders
                .is_registered(saga_id, "Test.recovery")
                .await
                .unwrap()
        );

        f.orchestrator.drive(saga_id, &mut ()).await.unwrap();
        assert!(
            !f.reminders
                .is_registered(saga_id, "Test.recovery")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_activity_fails_cycle_and_keeps_reminder() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        f.orchestrator
            .execute(saga_id, vec![ActivityDefinition::new("missing")])
            .await
            .unwrap();
        let result = f.orchestrator.drive(saga_id, &mut ()).await;

        assert!(matches!(result, Err(SagaError::UnknownActivityType(_))));
        assert!(
            f.reminders
                .is_registered(saga_id, "Test.recovery")
                .await
                .unwrap()
        );
        let state = f.orchestrator.snapshot(saga_id).await.unwrap();
        assert_eq!(state.status(), SagaStatus::Executing);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_rejected() {
        let f = fixture(CompensationRetryPolicy::default());
        let saga_id = SagaId::new();

        let record = StoredState::new(
            saga_id,
            "Test",
            Version::first(),
            serde_json::json!({
                "status": "Executing",
                "activity_definitions": [],
                "num_completed_activities": 5,
                "compensation_index": -1
            }),
        );
        f.store.save(record, SaveOptions::expect_new()).await.unwrap();

        let result = f.orchestrator.drive(saga_id, &mut ()).await;
        assert!(matches!(result, Err(SagaError::CorruptState { .. })));
    }

    #[tokio::test]
    async fn test_in_flight_lists_only_active_sagas() {
        let f = fixture(CompensationRetryPolicy::default());
        let active = SagaId::new();
        let done = SagaId::new();

        f.orchestrator.execute(active, vec![step("a")]).await.unwrap();
        f.orchestrator.execute(done, vec![step("a")]).await.unwrap();
        f.orchestrator.drive(done, &mut ()).await.unwrap();

        assert_eq!(f.orchestrator.in_flight().await.unwrap(), vec![active]);
    }
}
