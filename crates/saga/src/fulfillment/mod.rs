//! Order fulfillment: a three-step saga over inventory, payment and shipping.
//!
//! 1. Reserve inventory
//! 2. Process payment
//! 3. Create shipment
//!
//! If any step fails, the failed step and every step before it are
//! compensated in reverse order.

pub mod activities;
pub mod services;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use activities::{
    CreateShipment, CreateShipmentConfig, ProcessPayment, ProcessPaymentConfig, ReserveInventory,
    ReserveInventoryConfig,
};
pub use services::{
    InMemoryInventoryService, InMemoryPaymentService, InMemoryShippingService, InventoryService,
    PaymentResult, PaymentService, ReservationItem, ReservationResult, ServiceError,
    ShipmentResult, ShippingService,
};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::registry::ActivityRegistry;
use crate::state::ActivityDefinition;

/// The saga type identifier for order fulfillment.
pub const SAGA_TYPE: &str = "OrderFulfillment";

/// Step name: Reserve inventory for the order.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step name: Process payment for the order.
pub const STEP_PROCESS_PAYMENT: &str = "process_payment";

/// Step name: Create shipment for the order.
pub const STEP_CREATE_SHIPMENT: &str = "create_shipment";

/// Collaborators the fulfillment activities call.
#[derive(Clone)]
pub struct FulfillmentServices {
    pub inventory: Arc<dyn InventoryService>,
    pub payment: Arc<dyn PaymentService>,
    pub shipping: Arc<dyn ShippingService>,
}

impl FulfillmentServices {
    pub fn new(
        inventory: Arc<dyn InventoryService>,
        payment: Arc<dyn PaymentService>,
        shipping: Arc<dyn ShippingService>,
    ) -> Self {
        Self {
            inventory,
            payment,
            shipping,
        }
    }
}

/// Registers the three fulfillment activities under their step names.
pub fn register_activities(registry: &mut ActivityRegistry<FulfillmentServices>) {
    registry.register_configurable(STEP_RESERVE_INVENTORY, ReserveInventory::default);
    registry.register_configurable(STEP_PROCESS_PAYMENT, ProcessPayment::default);
    registry.register_configurable(STEP_CREATE_SHIPMENT, CreateShipment::default);
}

/// Builds a registry holding only the fulfillment activities.
pub fn registry() -> ActivityRegistry<FulfillmentServices> {
    let mut registry = ActivityRegistry::new();
    register_activities(&mut registry);
    registry
}

/// Default orchestrator settings for fulfillment sagas.
pub fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig::new(SAGA_TYPE)
}

/// An order to fulfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentOrder {
    pub order_id: String,
    pub customer_id: String,
    pub items: Vec<ReservationItem>,
    pub amount_cents: u64,
    pub destination: String,
}

impl FulfillmentOrder {
    /// Builds the activity chain that fulfills this order.
    pub fn definitions(&self) -> Result<Vec<ActivityDefinition>> {
        Ok(vec![
            ActivityDefinition::with_config(
                STEP_RESERVE_INVENTORY,
                &ReserveInventoryConfig {
                    order_id: self.order_id.clone(),
                    items: self.items.clone(),
                },
            )?,
            ActivityDefinition::with_config(
                STEP_PROCESS_PAYMENT,
                &ProcessPaymentConfig {
                    order_id: self.order_id.clone(),
                    customer_id: self.customer_id.clone(),
                    amount_cents: self.amount_cents,
                },
            )?,
            ActivityDefinition::with_config(
                STEP_CREATE_SHIPMENT,
                &CreateShipmentConfig {
                    order_id: self.order_id.clone(),
                    destination: self.destination.clone(),
                },
            )?,
        ])
    }
}
