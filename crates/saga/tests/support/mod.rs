//! Shared fixtures for the saga integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use saga::fulfillment::{
    self, FulfillmentOrder, FulfillmentServices, InMemoryInventoryService, InMemoryPaymentService,
    InMemoryShippingService, ReservationItem,
};
use saga::{
    OrchestratorConfig, ReminderTick, SagaOrchestrator, TokioReminderService,
};
use state_store::{
    InMemoryStateStore, SagaId, SaveOptions, StateStore, StoreError, StoredState, Version,
};
use tokio::sync::mpsc;

/// In-memory store whose saves can be made to fail, standing in for a
/// process that dies between an activity call and its checkpoint.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: InMemoryStateStore,
    saves_left: Arc<Mutex<Option<usize>>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `saves` more saves through, then fails every save.
    pub fn fail_after(&self, saves: usize) {
        *self.saves_left.lock().unwrap() = Some(saves);
    }

    pub fn heal(&self) {
        *self.saves_left.lock().unwrap() = None;
    }

    pub fn inner(&self) -> &InMemoryStateStore {
        &self.inner
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn load(
        &self,
        saga_type: &str,
        saga_id: SagaId,
    ) -> state_store::Result<Option<StoredState>> {
        self.inner.load(saga_type, saga_id).await
    }

    async fn save(
        &self,
        record: StoredState,
        options: SaveOptions,
    ) -> state_store::Result<Version> {
        let refused = {
            let mut saves_left = self.saves_left.lock().unwrap();
            match saves_left.as_mut() {
                Some(0) => true,
                Some(left) => {
                    *left -= 1;
                    false
                }
                None => false,
            }
        };
        if refused {
            return Err(StoreError::ConcurrencyConflict {
                saga_id: record.saga_id,
                expected: options.expected_version.unwrap_or_default(),
                actual: record.version,
            });
        }
        self.inner.save(record, options).await
    }

    async fn list(&self, saga_type: &str) -> state_store::Result<Vec<StoredState>> {
        self.inner.list(saga_type).await
    }

    async fn list_by_status(
        &self,
        saga_type: &str,
        statuses: &[&str],
    ) -> state_store::Result<Vec<StoredState>> {
        self.inner.list_by_status(saga_type, statuses).await
    }

    async fn delete(&self, saga_type: &str, saga_id: SagaId) -> state_store::Result<()> {
        self.inner.delete(saga_type, saga_id).await
    }
}

pub struct TestHarness {
    pub orchestrator: SagaOrchestrator<FlakyStore, FulfillmentServices>,
    pub store: FlakyStore,
    pub inventory: InMemoryInventoryService,
    pub payment: InMemoryPaymentService,
    pub shipping: InMemoryShippingService,
    pub reminders: TokioReminderService,
    pub ticks: Option<mpsc::UnboundedReceiver<ReminderTick>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(fulfillment::orchestrator_config())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let store = FlakyStore::new();
        let inventory = InMemoryInventoryService::new();
        let payment = InMemoryPaymentService::new();
        let shipping = InMemoryShippingService::new();
        let (reminders, ticks) = TokioReminderService::new();

        let services = FulfillmentServices::new(
            Arc::new(inventory.clone()),
            Arc::new(payment.clone()),
            Arc::new(shipping.clone()),
        );
        let orchestrator = SagaOrchestrator::new(
            store.clone(),
            Arc::new(fulfillment::registry()),
            Arc::new(reminders.clone()),
            Arc::new(services),
            config,
        );

        Self {
            orchestrator,
            store,
            inventory,
            payment,
            shipping,
            reminders,
            ticks: Some(ticks),
        }
    }

    pub async fn reminder_armed(&self, saga_id: SagaId) -> bool {
        saga::ReminderService::is_registered(
            &self.reminders,
            saga_id,
            &self.orchestrator.config().reminder_name,
        )
        .await
        .unwrap()
    }
}

pub fn order(order_id: &str) -> FulfillmentOrder {
    FulfillmentOrder {
        order_id: order_id.to_string(),
        customer_id: "CUST-1".to_string(),
        items: vec![
            ReservationItem {
                product_id: "SKU-001".to_string(),
                product_name: "Widget".to_string(),
                quantity: 2,
            },
            ReservationItem {
                product_id: "SKU-002".to_string(),
                product_name: "Gadget".to_string(),
                quantity: 1,
            },
        ],
        amount_cents: 4500,
        destination: "221B Baker Street".to_string(),
    }
}
