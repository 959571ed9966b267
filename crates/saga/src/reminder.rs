//! Recovery reminders: periodic wake-ups that revive stalled sagas.
//!
//! A reminder is addressed by `(saga_id, name)`. Registering under a name
//! that is already taken returns the existing reminder's handle, which is
//! what makes re-acquire-then-cancel work for a caller that holds no live
//! handle (for example after a restart).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::SagaId;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{Result, SagaError};

/// Handle to a registered reminder.
///
/// The generation distinguishes successive registrations under the same
/// name, so cancelling an outdated handle never removes a newer reminder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReminderHandle {
    saga_id: SagaId,
    name: String,
    generation: u64,
}

impl ReminderHandle {
    /// The saga the reminder wakes up.
    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    /// The reminder name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One firing of a reminder, delivered to the saga's worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderTick {
    pub saga_id: SagaId,
    pub name: String,
}

/// Named, reschedulable periodic wake-ups.
#[async_trait]
pub trait ReminderService: Send + Sync {
    /// Returns the handle of the reminder registered under `(saga_id, name)`,
    /// creating it if absent. An existing reminder with a different
    /// schedule is rescheduled.
    async fn register_or_update(
        &self,
        saga_id: SagaId,
        name: &str,
        due: Duration,
        period: Duration,
    ) -> Result<ReminderHandle>;

    /// Cancels the reminder the handle refers to. Cancelling a reminder that
    /// is gone or was re-registered since is a no-op.
    async fn cancel(&self, handle: ReminderHandle) -> Result<()>;

    /// Returns true if a reminder is registered under `(saga_id, name)`.
    async fn is_registered(&self, saga_id: SagaId, name: &str) -> Result<bool>;
}

struct Registration {
    generation: u64,
    due: Duration,
    period: Duration,
    task: JoinHandle<()>,
}

struct Inner {
    reminders: Mutex<HashMap<(SagaId, String), Registration>>,
    next_generation: AtomicU64,
    ticks: mpsc::UnboundedSender<ReminderTick>,
}

/// In-process reminder service backed by tokio timers.
///
/// Ticks are delivered on the channel returned by [`TokioReminderService::new`].
/// Reminders live as long as the process: after a restart the host's
/// startup recovery re-arms in-flight sagas.
#[derive(Clone)]
pub struct TokioReminderService {
    inner: Arc<Inner>,
}

impl TokioReminderService {
    /// Creates the service and the receiving end of its tick channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReminderTick>) {
        let (ticks, receiver) = mpsc::unbounded_channel();
        let service = Self {
            inner: Arc::new(Inner {
                reminders: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                ticks,
            }),
        };
        (service, receiver)
    }

    /// Returns the number of registered reminders.
    pub async fn registered_count(&self) -> usize {
        self.inner.reminders.lock().await.len()
    }

    /// Stops every reminder.
    pub async fn shutdown(&self) {
        let mut reminders = self.inner.reminders.lock().await;
        for (_, registration) in reminders.drain() {
            registration.task.abort();
        }
    }

    fn spawn_timer(&self, saga_id: SagaId, name: String, due: Duration, period: Duration) -> JoinHandle<()> {
        let ticks = self.inner.ticks.clone();
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + due, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tracing::trace!(%saga_id, reminder = %name, "reminder fired");
                let tick = ReminderTick {
                    saga_id,
                    name: name.clone(),
                };
                if ticks.send(tick).is_err() {
                    break;
                }
            }
        })
    }
}

#[async_trait]
impl ReminderService for TokioReminderService {
    async fn register_or_update(
        &self,
        saga_id: SagaId,
        name: &str,
        due: Duration,
        period: Duration,
    ) -> Result<ReminderHandle> {
        if self.inner.ticks.is_closed() {
            return Err(SagaError::Reminder(
                "tick receiver has been dropped".to_string(),
            ));
        }

        let key = (saga_id, name.to_string());
        let mut reminders = self.inner.reminders.lock().await;

        if let Some(existing) = reminders.get(&key)
            && existing.due == due
            && existing.period == period
            && !existing.task.is_finished()
        {
            return Ok(ReminderHandle {
                saga_id,
                name: key.1,
                generation: existing.generation,
            });
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let task = self.spawn_timer(saga_id, name.to_string(), due, period);
        if let Some(previous) = reminders.insert(
            key,
            Registration {
                generation,
                due,
                period,
                task,
            },
        ) {
            previous.task.abort();
        }
        tracing::debug!(%saga_id, reminder = name, ?due, ?period, "reminder registered");

        Ok(ReminderHandle {
            saga_id,
            name: name.to_string(),
            generation,
        })
    }

    async fn cancel(&self, handle: ReminderHandle) -> Result<()> {
        let key = (handle.saga_id, handle.name);
        let mut reminders = self.inner.reminders.lock().await;

        if reminders
            .get(&key)
            .is_some_and(|r| r.generation == handle.generation)
            && let Some(registration) = reminders.remove(&key)
        {
            registration.task.abort();
            tracing::debug!(saga_id = %key.0, reminder = %key.1, "reminder cancelled");
        }
        Ok(())
    }

    async fn is_registered(&self, saga_id: SagaId, name: &str) -> Result<bool> {
        let reminders = self.inner.reminders.lock().await;
        Ok(reminders.contains_key(&(saga_id, name.to_string())))
    }
}
