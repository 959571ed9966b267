//! Integration tests for per-saga workers, reminder ticks and recovery.

mod support;

use std::time::Duration;

use saga::fulfillment::{self, FulfillmentServices};
use saga::{SagaHost, SagaStatus};
use state_store::SagaId;
use support::{FlakyStore, TestHarness, order};
use tokio::task::JoinHandle;

struct HostHarness {
    host: SagaHost<FlakyStore, FulfillmentServices>,
    parts: Parts,
    _router: JoinHandle<()>,
}

struct Parts {
    store: FlakyStore,
    inventory: fulfillment::InMemoryInventoryService,
    payment: fulfillment::InMemoryPaymentService,
    shipping: fulfillment::InMemoryShippingService,
}

impl HostHarness {
    fn new() -> Self {
        Self::from_harness(TestHarness::new())
    }

    /// Reminders fire one second after arming, then every second.
    fn with_fast_reminders() -> Self {
        Self::from_harness(TestHarness::with_config(
            fulfillment::orchestrator_config()
                .with_reminder_schedule(Duration::from_secs(1), Duration::from_secs(1)),
        ))
    }

    fn from_harness(mut h: TestHarness) -> Self {
        let ticks = h.ticks.take().unwrap();
        let parts = Parts {
            store: h.store.clone(),
            inventory: h.inventory.clone(),
            payment: h.payment.clone(),
            shipping: h.shipping.clone(),
        };
        let host = SagaHost::new(h.orchestrator);
        let router = host.spawn_tick_router(ticks);

        Self {
            host,
            parts,
            _router: router,
        }
    }
}

#[tokio::test]
async fn test_execute_through_worker_runs_to_completion() {
    let h = HostHarness::new();
    let saga_id = SagaId::new();
    let handle = h.host.handle(saga_id).await;

    let accepted = handle
        .execute(order("ORD-1").definitions().unwrap())
        .await
        .unwrap();
    assert_eq!(accepted.activity_count, 3);

    let settled = handle.wait_for(|s| s.status.is_terminal()).await.unwrap();
    assert_eq!(settled.status, SagaStatus::Executed);
    assert_eq!(settled.num_completed_activities, 3);
    assert!(h.parts.shipping.has_shipment("ORD-1"));

    let persisted = h.host.snapshot(saga_id).await.unwrap();
    assert_eq!(persisted, settled);
}

#[tokio::test]
async fn test_handle_is_shared_per_saga() {
    let h = HostHarness::new();
    let saga_id = SagaId::new();

    let first = h.host.handle(saga_id).await;
    let second = h.host.handle(saga_id).await;
    let _other = h.host.handle(SagaId::new()).await;

    assert_eq!(h.host.worker_count().await, 2);
    first.resume().unwrap();
    assert!(!second.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_status_is_readable_while_step_in_flight() {
    let h = HostHarness::new();
    h.parts.payment.set_charge_delay(Some(Duration::from_secs(30)));
    let saga_id = SagaId::new();
    let handle = h.host.handle(saga_id).await;

    handle
        .execute(order("ORD-1").definitions().unwrap())
        .await
        .unwrap();
    let in_flight = handle
        .wait_for(|s| s.num_completed_activities == 1)
        .await
        .unwrap();

    assert_eq!(in_flight.status, SagaStatus::Executing);
    assert_eq!(handle.status(), SagaStatus::Executing);
    assert!(!h.parts.payment.is_charged("ORD-1"));

    let settled = handle.wait_for(|s| s.status.is_terminal()).await.unwrap();
    assert_eq!(settled.status, SagaStatus::Executed);
}

#[tokio::test(start_paused = true)]
async fn test_abort_takes_effect_after_current_step() {
    let h = HostHarness::new();
    h.parts.payment.set_charge_delay(Some(Duration::from_secs(30)));
    let saga_id = SagaId::new();
    let handle = h.host.handle(saga_id).await;

    handle
        .execute(order("ORD-1").definitions().unwrap())
        .await
        .unwrap();
    handle
        .wait_for(|s| s.num_completed_activities == 1)
        .await
        .unwrap();

    // Payment is in flight; the abort lands once its checkpoint is written
    let aborted = handle.abort().await.unwrap();
    assert_eq!(aborted.status, SagaStatus::Compensating);
    assert_eq!(aborted.num_completed_activities, 2);
    assert_eq!(aborted.compensation_index, 2);

    let settled = handle.wait_for(|s| s.status.is_terminal()).await.unwrap();
    assert_eq!(settled.status, SagaStatus::Compensated);

    let parts = &h.parts;
    assert_eq!(parts.shipping.calls(), vec!["cancel:ORD-1"]);
    assert_eq!(parts.payment.calls(), vec!["charge:ORD-1", "refund:ORD-1"]);
    assert_eq!(parts.inventory.calls(), vec!["reserve:ORD-1", "release:ORD-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_execute_during_drive_is_folded_into_resume() {
    let h = HostHarness::new();
    h.parts.payment.set_charge_delay(Some(Duration::from_secs(30)));
    let saga_id = SagaId::new();
    let handle = h.host.handle(saga_id).await;

    handle
        .execute(order("ORD-1").definitions().unwrap())
        .await
        .unwrap();
    handle
        .wait_for(|s| s.num_completed_activities == 1)
        .await
        .unwrap();

    let second = handle
        .execute(order("ORD-2").definitions().unwrap())
        .await
        .unwrap();
    assert_ne!(second.status, SagaStatus::NotStarted);

    let settled = handle.wait_for(|s| s.status.is_terminal()).await.unwrap();
    assert_eq!(settled.status, SagaStatus::Executed);
    assert!(!h.parts.inventory.has_reservation("ORD-2"));
    assert_eq!(h.parts.payment.calls(), vec!["charge:ORD-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_reminder_tick_drives_aborted_saga() {
    let h = HostHarness::with_fast_reminders();
    let saga_id = SagaId::new();
    let handle = h.host.handle(saga_id).await;

    handle
        .execute(order("ORD-1").definitions().unwrap())
        .await
        .unwrap();
    handle
        .wait_for(|s| s.status == SagaStatus::Executed)
        .await
        .unwrap();

    // Abort only records the intent; the next tick compensates
    let aborted = handle.abort().await.unwrap();
    assert_eq!(aborted.status, SagaStatus::Compensating);
    assert!(h.parts.shipping.has_shipment("ORD-1"));

    let settled = handle
        .wait_for(|s| s.status == SagaStatus::Compensated)
        .await
        .unwrap();
    assert_eq!(settled.compensation_index, -1);
    assert_eq!(h.parts.shipping.shipment_count(), 0);
    assert_eq!(h.parts.payment.payment_count(), 0);
    assert_eq!(h.parts.inventory.reservation_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_drive_is_retried_by_reminder() {
    let h = HostHarness::with_fast_reminders();
    let saga_id = SagaId::new();
    let handle = h.host.handle(saga_id).await;

    // The execute checkpoint is written, the first step's is not
    h.parts.store.fail_after(1);
    handle
        .execute(order("ORD-1").definitions().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        h.host.snapshot(saga_id).await.unwrap().num_completed_activities,
        0
    );

    h.parts.store.heal();
    let settled = handle
        .wait_for(|s| s.status == SagaStatus::Executed)
        .await
        .unwrap();
    assert_eq!(settled.num_completed_activities, 3);
    assert_eq!(h.parts.inventory.reservation_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_compensation_retry_is_acknowledged() {
    let h = HostHarness::new();
    h.parts.shipping.set_fail_on_create(true);
    h.parts.payment.fail_next_refunds(u32::MAX);
    let saga_id = SagaId::new();
    let handle = h.host.handle(saga_id).await;

    handle
        .execute(order("ORD-1").definitions().unwrap())
        .await
        .unwrap();
    handle
        .wait_for(|s| s.compensation_index == 1 && s.failure.as_ref().is_some_and(|f| f.attempts >= 1))
        .await
        .unwrap();

    // Refunds keep failing; the abort is written between two attempts
    let aborted = tokio::time::timeout(Duration::from_secs(60), handle.abort())
        .await
        .expect("abort acknowledged while compensation retries")
        .unwrap();
    assert_eq!(aborted.status, SagaStatus::Compensating);
    assert_eq!(aborted.compensation_index, 1);

    h.parts.payment.fail_next_refunds(0);
    let settled = handle
        .wait_for(|s| s.status == SagaStatus::Compensated)
        .await
        .unwrap();
    assert_eq!(settled.compensation_index, -1);
    assert_eq!(h.parts.payment.payment_count(), 0);
    assert_eq!(h.parts.inventory.reservation_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_settled_workers_leave_the_host() {
    let h = HostHarness::new();
    let host = h.host.clone().with_idle_timeout(Duration::from_secs(1));
    let mut saga_ids = Vec::new();

    for i in 0..5 {
        let saga_id = SagaId::new();
        let handle = host.handle(saga_id).await;
        handle
            .execute(order(&format!("ORD-{i}")).definitions().unwrap())
            .await
            .unwrap();
        handle
            .wait_for(|s| s.status == SagaStatus::Executed)
            .await
            .unwrap();
        saga_ids.push(saga_id);
    }
    // A saga that was only ever looked at
    host.handle(SagaId::new()).await.resume().unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(host.worker_count().await, 0);

    // Addressing a settled saga again brings up a worker with its record
    let handle = host.handle(saga_ids[0]).await;
    let reloaded = handle
        .wait_for(|s| s.status == SagaStatus::Executed)
        .await
        .unwrap();
    assert_eq!(reloaded.num_completed_activities, 3);
    assert_eq!(host.worker_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_worker_with_outstanding_handle_stays() {
    let h = HostHarness::new();
    let host = h.host.clone().with_idle_timeout(Duration::from_secs(1));
    let saga_id = SagaId::new();
    let handle = host.handle(saga_id).await;

    handle
        .execute(order("ORD-1").definitions().unwrap())
        .await
        .unwrap();
    handle
        .wait_for(|s| s.status == SagaStatus::Executed)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(host.worker_count().await, 1);
    assert!(!handle.is_closed());

    drop(handle);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(host.worker_count().await, 0);
}

#[tokio::test]
async fn test_resume_on_unstarted_saga_stays_not_started() {
    let h = HostHarness::new();
    let saga_id = SagaId::new();
    let handle = h.host.handle(saga_id).await;

    handle.resume().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(handle.status(), SagaStatus::NotStarted);
    assert_eq!(
        h.host.snapshot(saga_id).await.unwrap().status,
        SagaStatus::NotStarted
    );
    assert!(h.parts.inventory.calls().is_empty());
}

#[tokio::test]
async fn test_recover_in_flight_resumes_interrupted_sagas() {
    let h = HostHarness::new();
    let interrupted = SagaId::new();
    let finished = SagaId::new();

    // Simulate a previous process: one saga stored mid-flight, one settled
    let orchestrator = h.host.orchestrator();
    orchestrator
        .execute(interrupted, order("ORD-1").definitions().unwrap())
        .await
        .unwrap();
    orchestrator
        .execute(finished, order("ORD-2").definitions().unwrap())
        .await
        .unwrap();
    orchestrator.drive(finished, &mut ()).await.unwrap();

    let resumed = h.host.recover_in_flight().await.unwrap();
    assert_eq!(resumed, 1);

    let handle = h.host.handle(interrupted).await;
    let settled = handle
        .wait_for(|s| s.status == SagaStatus::Executed)
        .await
        .unwrap();
    assert_eq!(settled.saga_id, interrupted);
    assert!(h.parts.shipping.has_shipment("ORD-1"));
}

#[tokio::test]
async fn test_shutdown_releases_workers() {
    let h = HostHarness::new();
    h.host.handle(SagaId::new()).await;
    h.host.handle(SagaId::new()).await;

    h.host.shutdown().await;
    assert_eq!(h.host.worker_count().await, 0);
}
