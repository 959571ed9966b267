//! Per-saga workers.
//!
//! Each saga instance is owned by exactly one worker task, which is the
//! only code that drives or mutates it. Callers talk to the worker through
//! a [`SagaHandle`]: commands go into its inbox, progress comes back on a
//! watch channel so reading a saga's status never waits on a running step.
//!
//! A worker leaves the host once its saga has settled, its inbox is empty
//! and no caller still holds its handle; addressing the saga again spawns a
//! fresh worker from the stored record.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::SagaId;
use serde::{Deserialize, Serialize};
use state_store::{StateStore, Version};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, SagaError};
use crate::orchestrator::{DriveHooks, SagaOrchestrator};
use crate::reminder::ReminderTick;
use crate::state::{ActivityDefinition, ActivityFailure, SagaState};
use crate::status::SagaStatus;

/// Point-in-time view of a saga's persisted progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaSnapshot {
    pub saga_id: SagaId,
    pub status: SagaStatus,
    pub activity_count: usize,
    pub num_completed_activities: usize,
    pub compensation_index: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ActivityFailure>,
    pub version: Version,
}

impl SagaSnapshot {
    /// Captures the progress of a loaded saga state.
    pub fn from_state(saga_id: SagaId, state: &SagaState) -> Self {
        Self {
            saga_id,
            status: state.status(),
            activity_count: state.activity_count(),
            num_completed_activities: state.num_completed_activities(),
            compensation_index: state.compensation_index(),
            failure: state.failure().cloned(),
            version: state.version(),
        }
    }

    fn unloaded(saga_id: SagaId) -> Self {
        Self::from_state(saga_id, &SagaState::default())
    }
}

type Ack = oneshot::Sender<Result<SagaSnapshot>>;

/// A request delivered to a saga's worker.
#[derive(Debug)]
pub enum SagaCommand {
    /// Start the saga; acknowledged once the chain has been written.
    Execute {
        definitions: Vec<ActivityDefinition>,
        ack: Ack,
    },
    /// Force compensation; acknowledged once the status has been written.
    Abort { ack: Ack },
    /// Drive the saga from its persisted state.
    Resume,
    /// A recovery reminder fired; same effect as `Resume`.
    Tick,
}

/// Handle to the worker owning one saga.
#[derive(Debug, Clone)]
pub struct SagaHandle {
    saga_id: SagaId,
    worker_id: u64,
    commands: mpsc::UnboundedSender<SagaCommand>,
    snapshots: watch::Receiver<SagaSnapshot>,
}

impl SagaHandle {
    /// The saga this handle addresses.
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    /// Starts the saga with the given chain and returns once it is stored.
    ///
    /// The drive itself runs in the background.
    pub async fn execute(&self, definitions: Vec<ActivityDefinition>) -> Result<SagaSnapshot> {
        let (ack, response) = oneshot::channel();
        self.send(SagaCommand::Execute { definitions, ack })?;
        response
            .await
            .map_err(|_| SagaError::WorkerUnavailable(self.saga_id))?
    }

    /// Forces compensation and returns once the abort is stored.
    pub async fn abort(&self) -> Result<SagaSnapshot> {
        let (ack, response) = oneshot::channel();
        self.send(SagaCommand::Abort { ack })?;
        response
            .await
            .map_err(|_| SagaError::WorkerUnavailable(self.saga_id))?
    }

    /// Asks the worker to drive the saga. Does not wait for the drive.
    pub fn resume(&self) -> Result<()> {
        self.send(SagaCommand::Resume)
    }

    /// Delivers a reminder tick.
    pub fn tick(&self) -> Result<()> {
        self.send(SagaCommand::Tick)
    }

    /// Returns the latest snapshot published by the worker.
    pub fn snapshot(&self) -> SagaSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Returns the latest status published by the worker.
    pub fn status(&self) -> SagaStatus {
        self.snapshots.borrow().status
    }

    /// Waits until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SagaSnapshot>
    where
        F: FnMut(&SagaSnapshot) -> bool,
    {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| SagaError::WorkerUnavailable(self.saga_id))?;
        Ok(snapshot.clone())
    }

    /// Returns true once the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: SagaCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SagaError::WorkerUnavailable(self.saga_id))
    }
}

/// An intent that must be written in arrival order.
enum Intent {
    Execute(Vec<ActivityDefinition>, Ack),
    Abort(Ack),
}

/// Work the worker has accepted but not finished.
#[derive(Default)]
struct Backlog {
    intents: VecDeque<Intent>,
    /// Aborts handed to the orchestrator, acknowledged at the next checkpoint.
    applying: Vec<Ack>,
    drive: bool,
}

impl Backlog {
    fn accept(&mut self, command: SagaCommand) {
        match command {
            SagaCommand::Execute { definitions, ack } => {
                self.intents.push_back(Intent::Execute(definitions, ack))
            }
            SagaCommand::Abort { ack } => self.intents.push_back(Intent::Abort(ack)),
            SagaCommand::Resume | SagaCommand::Tick => self.drive = true,
        }
    }

    fn is_empty(&self) -> bool {
        self.intents.is_empty() && self.applying.is_empty() && !self.drive
    }

    /// Puts aborts that were never written back in front of the queue.
    fn requeue_applying(&mut self) {
        for ack in self.applying.drain(..).rev() {
            self.intents.push_front(Intent::Abort(ack));
        }
    }
}

/// Hooks that let the worker serve its inbox while a drive is running.
struct WorkerHooks<'a> {
    saga_id: SagaId,
    inbox: &'a mut mpsc::UnboundedReceiver<SagaCommand>,
    snapshots: &'a watch::Sender<SagaSnapshot>,
    backlog: &'a mut Backlog,
}

impl DriveHooks for WorkerHooks<'_> {
    fn checkpointed(&mut self, state: &SagaState) {
        let snapshot = SagaSnapshot::from_state(self.saga_id, state);
        for ack in self.backlog.applying.drain(..) {
            let _ = ack.send(Ok(snapshot.clone()));
        }

        while let Ok(command) = self.inbox.try_recv() {
            match command {
                // Already started: the definitions are ignored and the
                // request folds into a follow-up drive.
                SagaCommand::Execute { ack, .. } if !state.status().can_start() => {
                    let _ = ack.send(Ok(snapshot.clone()));
                    self.backlog.drive = true;
                }
                command => self.backlog.accept(command),
            }
        }

        self.snapshots.send_replace(snapshot);
    }

    fn abort_requested(&mut self) -> bool {
        let mut remaining = VecDeque::with_capacity(self.backlog.intents.len());
        for intent in self.backlog.intents.drain(..) {
            match intent {
                Intent::Abort(ack) => self.backlog.applying.push(ack),
                other => remaining.push_back(other),
            }
        }
        self.backlog.intents = remaining;
        !self.backlog.applying.is_empty()
    }
}

type Workers = Arc<Mutex<HashMap<SagaId, SagaHandle>>>;

struct SagaWorker<S, D>
where
    S: StateStore,
{
    saga_id: SagaId,
    worker_id: u64,
    orchestrator: Arc<SagaOrchestrator<S, D>>,
    workers: Workers,
    idle_timeout: Duration,
    inbox: mpsc::UnboundedReceiver<SagaCommand>,
    snapshots: watch::Sender<SagaSnapshot>,
    backlog: Backlog,
}

impl<S, D> SagaWorker<S, D>
where
    S: StateStore + 'static,
    D: Send + Sync + 'static,
{
    async fn run(mut self) {
        tracing::debug!(saga_id = %self.saga_id, "saga worker started");
        self.refresh().await;

        loop {
            if self.backlog.is_empty() && self.retire().await {
                tracing::debug!(saga_id = %self.saga_id, "saga worker retired");
                return;
            }

            if self.backlog.is_empty() {
                match tokio::time::timeout(self.idle_timeout, self.inbox.recv()).await {
                    Ok(Some(command)) => self.backlog.accept(command),
                    Ok(None) => break,
                    // Idle; look again whether the worker can retire
                    Err(_) => continue,
                }
            }
            while let Ok(command) = self.inbox.try_recv() {
                self.backlog.accept(command);
            }
            self.settle().await;
        }

        tracing::debug!(saga_id = %self.saga_id, "saga worker stopped");
    }

    /// Removes this worker from the host if its saga is settled and no
    /// caller can still reach it.
    ///
    /// Handles are only handed out under the workers lock, so with the lock
    /// held and the map's handle as the only one left, no new command can
    /// arrive once the inbox is found empty.
    async fn retire(&mut self) -> bool {
        if self.snapshots.borrow().status.is_active() {
            return false;
        }

        let mut workers = self.workers.lock().await;
        let owned = workers
            .get(&self.saga_id)
            .is_some_and(|handle| handle.worker_id == self.worker_id);
        if !owned || self.snapshots.receiver_count() > 1 {
            return false;
        }
        if let Ok(command) = self.inbox.try_recv() {
            self.backlog.accept(command);
            return false;
        }

        workers.remove(&self.saga_id);
        metrics::counter!("saga_workers_retired_total").increment(1);
        true
    }

    /// Works through the backlog until nothing is left to do.
    async fn settle(&mut self) {
        loop {
            while let Some(intent) = self.backlog.intents.pop_front() {
                match intent {
                    Intent::Execute(definitions, ack) => {
                        let result = self.orchestrator.execute(self.saga_id, definitions).await;
                        if result.is_ok() {
                            self.backlog.drive = true;
                        }
                        let _ = ack.send(self.publish(result));
                    }
                    Intent::Abort(ack) => {
                        let result = self.orchestrator.abort(self.saga_id).await;
                        let _ = ack.send(self.publish(result));
                    }
                }
            }

            if !std::mem::take(&mut self.backlog.drive) {
                break;
            }
            self.drive().await;
        }
    }

    async fn drive(&mut self) {
        let mut hooks = WorkerHooks {
            saga_id: self.saga_id,
            inbox: &mut self.inbox,
            snapshots: &self.snapshots,
            backlog: &mut self.backlog,
        };

        match self.orchestrator.drive(self.saga_id, &mut hooks).await {
            Ok(status) => {
                tracing::debug!(saga_id = %self.saga_id, %status, "drive settled");
            }
            Err(e) => {
                metrics::counter!("saga_drive_errors_total").increment(1);
                tracing::error!(
                    saga_id = %self.saga_id,
                    error = %e,
                    "drive failed, waiting for the next resume"
                );
                self.backlog.requeue_applying();
            }
        }
    }

    fn publish(&self, result: Result<SagaState>) -> Result<SagaSnapshot> {
        let snapshot = SagaSnapshot::from_state(self.saga_id, &result?);
        self.snapshots.send_replace(snapshot.clone());
        Ok(snapshot)
    }

    async fn refresh(&self) {
        match self.orchestrator.snapshot(self.saga_id).await {
            Ok(state) => {
                self.snapshots
                    .send_replace(SagaSnapshot::from_state(self.saga_id, &state));
            }
            Err(e) => {
                tracing::warn!(saga_id = %self.saga_id, error = %e, "failed to load saga");
            }
        }
    }
}

/// Owns the workers of every saga of one type.
pub struct SagaHost<S, D>
where
    S: StateStore,
{
    orchestrator: Arc<SagaOrchestrator<S, D>>,
    workers: Workers,
    next_worker: Arc<AtomicU64>,
    idle_timeout: Duration,
}

impl<S, D> Clone for SagaHost<S, D>
where
    S: StateStore,
{
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            workers: Arc::clone(&self.workers),
            next_worker: Arc::clone(&self.next_worker),
            idle_timeout: self.idle_timeout,
        }
    }
}

/// How long an idle worker waits before checking again whether it can retire.
pub const DEFAULT_WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

impl<S, D> SagaHost<S, D>
where
    S: StateStore + 'static,
    D: Send + Sync + 'static,
{
    /// Creates a host around an orchestrator.
    pub fn new(orchestrator: SagaOrchestrator<S, D>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            workers: Arc::new(Mutex::new(HashMap::new())),
            next_worker: Arc::new(AtomicU64::new(0)),
            idle_timeout: DEFAULT_WORKER_IDLE_TIMEOUT,
        }
    }

    /// Sets how often an idle worker checks whether it can retire.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout.max(Duration::from_millis(1));
        self
    }

    /// Returns the orchestrator shared by every worker.
    pub fn orchestrator(&self) -> &Arc<SagaOrchestrator<S, D>> {
        &self.orchestrator
    }

    /// Returns the worker handle for a saga, spawning the worker if needed.
    pub async fn handle(&self, saga_id: SagaId) -> SagaHandle {
        let mut workers = self.workers.lock().await;
        if let Some(handle) = workers.get(&saga_id)
            && !handle.is_closed()
        {
            return handle.clone();
        }

        let handle = self.spawn_worker(saga_id);
        workers.insert(saga_id, handle.clone());
        handle
    }

    /// Reads a saga's persisted progress without going through its worker.
    pub async fn snapshot(&self, saga_id: SagaId) -> Result<SagaSnapshot> {
        let state = self.orchestrator.snapshot(saga_id).await?;
        Ok(SagaSnapshot::from_state(saga_id, &state))
    }

    /// Returns the number of workers currently registered with the host.
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Resumes every saga that was executing or compensating.
    ///
    /// Run once at startup so sagas interrupted by a restart continue
    /// without waiting for a caller.
    #[tracing::instrument(skip(self), fields(saga_type = %self.orchestrator.config().saga_type))]
    pub async fn recover_in_flight(&self) -> Result<usize> {
        let in_flight = self.orchestrator.in_flight().await?;
        for saga_id in &in_flight {
            self.handle(*saga_id).await.resume()?;
        }
        tracing::info!(count = in_flight.len(), "resumed in-flight sagas");
        Ok(in_flight.len())
    }

    /// Forwards reminder ticks to the workers they address.
    pub fn spawn_tick_router(
        &self,
        mut ticks: mpsc::UnboundedReceiver<ReminderTick>,
    ) -> JoinHandle<()> {
        let host = self.clone();
        tokio::spawn(async move {
            while let Some(tick) = ticks.recv().await {
                if tick.name != host.orchestrator.config().reminder_name {
                    tracing::debug!(saga_id = %tick.saga_id, reminder = %tick.name, "ignoring foreign reminder");
                    continue;
                }
                if let Err(e) = host.handle(tick.saga_id).await.tick() {
                    tracing::warn!(saga_id = %tick.saga_id, error = %e, "failed to deliver reminder tick");
                }
            }
        })
    }

    /// Closes every worker inbox. Workers exit once their current cycle ends.
    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        let count = workers.len();
        workers.clear();
        tracing::info!(count, "saga workers released");
    }

    fn spawn_worker(&self, saga_id: SagaId) -> SagaHandle {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (snapshots, receiver) = watch::channel(SagaSnapshot::unloaded(saga_id));
        let worker_id = self.next_worker.fetch_add(1, Ordering::Relaxed);

        let worker = SagaWorker {
            saga_id,
            worker_id,
            orchestrator: Arc::clone(&self.orchestrator),
            workers: Arc::clone(&self.workers),
            idle_timeout: self.idle_timeout,
            inbox,
            snapshots,
            backlog: Backlog::default(),
        };
        tokio::spawn(worker.run());

        SagaHandle {
            saga_id,
            worker_id,
            commands,
            snapshots: receiver,
        }
    }
}
