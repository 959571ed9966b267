//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ServiceError, take_failure};

/// Result of a successful inventory reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationResult {
    /// The reservation ID assigned by the inventory service.
    pub reservation_id: String,
}

/// An item to reserve in inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    /// The product to reserve.
    pub product_id: String,
    /// Product name for display.
    pub product_name: String,
    /// Quantity to reserve.
    pub quantity: u32,
}

/// Trait for inventory management operations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves inventory for an order. Reserving for an order that already
    /// holds a reservation returns the existing one.
    async fn reserve(
        &self,
        order_id: &str,
        items: Vec<ReservationItem>,
    ) -> Result<ReservationResult, ServiceError>;

    /// Releases the order's reservation. Releasing twice is a no-op.
    async fn release(&self, order_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    reservations: HashMap<String, (String, Vec<ReservationItem>)>,
    calls: Vec<String>,
    next_id: u32,
    fail_on_reserve: bool,
    failing_releases: u32,
}

/// In-memory inventory service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every reserve call.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.state.write().unwrap().fail_on_reserve = fail;
    }

    /// Makes the next `count` release calls fail.
    pub fn fail_next_releases(&self, count: u32) {
        self.state.write().unwrap().failing_releases = count;
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.state.read().unwrap().reservations.len()
    }

    /// Returns true if the order holds a reservation.
    pub fn has_reservation(&self, order_id: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .reservations
            .contains_key(order_id)
    }

    /// Returns every call made so far, e.g. `"reserve:ORD-1"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.read().unwrap().calls.clone()
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(
        &self,
        order_id: &str,
        items: Vec<ReservationItem>,
    ) -> Result<ReservationResult, ServiceError> {
        let mut state = self.state.write().unwrap();
        state.calls.push(format!("reserve:{order_id}"));

        if state.fail_on_reserve {
            return Err(ServiceError::Rejected("Insufficient stock".to_string()));
        }

        if let Some((reservation_id, _)) = state.reservations.get(order_id) {
            return Ok(ReservationResult {
                reservation_id: reservation_id.clone(),
            });
        }

        state.next_id += 1;
        let reservation_id = format!("RES-{:04}", state.next_id);
        state
            .reservations
            .insert(order_id.to_string(), (reservation_id.clone(), items));

        Ok(ReservationResult { reservation_id })
    }

    async fn release(&self, order_id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        state.calls.push(format!("release:{order_id}"));

        if take_failure(&mut state.failing_releases) {
            return Err(ServiceError::Unavailable("inventory".to_string()));
        }

        state.reservations.remove(order_id);
        Ok(())
    }
}
