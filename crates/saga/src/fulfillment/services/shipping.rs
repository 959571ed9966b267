//! Shipping service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{ServiceError, take_failure};

/// Result of a successful shipment creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentResult {
    /// The tracking number assigned by the shipping service.
    pub tracking_number: String,
}

/// Trait for shipping operations.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Creates a shipment for an order. An order ships at most once.
    async fn create_shipment(
        &self,
        order_id: &str,
        destination: &str,
    ) -> Result<ShipmentResult, ServiceError>;

    /// Cancels the order's shipment. Cancelling twice is a no-op.
    async fn cancel_shipment(&self, order_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    shipments: HashMap<String, (String, String)>,
    calls: Vec<String>,
    next_id: u32,
    fail_on_create: bool,
    failing_cancellations: u32,
}

/// In-memory shipping service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<RwLock<InMemoryShippingState>>,
}

impl InMemoryShippingService {
    /// Creates a new in-memory shipping service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every create_shipment call.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Makes the next `count` cancel_shipment calls fail.
    pub fn fail_next_cancellations(&self, count: u32) {
        self.state.write().unwrap().failing_cancellations = count;
    }

    /// Returns the number of active shipments.
    pub fn shipment_count(&self) -> usize {
        self.state.read().unwrap().shipments.len()
    }

    /// Returns true if the order has an active shipment.
    pub fn has_shipment(&self, order_id: &str) -> bool {
        self.state.read().unwrap().shipments.contains_key(order_id)
    }

    /// Returns every call made so far, e.g. `"create:ORD-1"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.read().unwrap().calls.clone()
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn create_shipment(
        &self,
        order_id: &str,
        destination: &str,
    ) -> Result<ShipmentResult, ServiceError> {
        let mut state = self.state.write().unwrap();
        state.calls.push(format!("create:{order_id}"));

        if state.fail_on_create {
            return Err(ServiceError::Unavailable("shipping".to_string()));
        }

        if let Some((tracking_number, _)) = state.shipments.get(order_id) {
            return Ok(ShipmentResult {
                tracking_number: tracking_number.clone(),
            });
        }

        state.next_id += 1;
        let tracking_number = format!("TRACK-{:04}", state.next_id);
        state.shipments.insert(
            order_id.to_string(),
            (tracking_number.clone(), destination.to_string()),
        );

        Ok(ShipmentResult { tracking_number })
    }

    async fn cancel_shipment(&self, order_id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        state.calls.push(format!("cancel:{order_id}"));

        if take_failure(&mut state.failing_cancellations) {
            return Err(ServiceError::Unavailable("shipping".to_string()));
        }

        state.shipments.remove(order_id);
        Ok(())
    }
}
