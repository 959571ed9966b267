//! The three fulfillment steps.
//!
//! Each activity takes its order from configuration and keys every call by
//! order id, so compensation needs nothing from the forward run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::services::{InventoryService, PaymentService, ReservationItem, ShippingService};
use super::{
    FulfillmentServices, STEP_CREATE_SHIPMENT, STEP_PROCESS_PAYMENT, STEP_RESERVE_INVENTORY,
};
use crate::activity::{Activity, ActivityContext, ActivityError, Configurable};

/// Configuration of the inventory step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveInventoryConfig {
    pub order_id: String,
    pub items: Vec<ReservationItem>,
}

/// Configuration of the payment step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessPaymentConfig {
    pub order_id: String,
    pub customer_id: String,
    pub amount_cents: u64,
}

/// Configuration of the shipping step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateShipmentConfig {
    pub order_id: String,
    pub destination: String,
}

/// Reserves stock for the order; releases it on compensation.
#[derive(Default)]
pub struct ReserveInventory {
    config: Option<ReserveInventoryConfig>,
    inventory: Option<Arc<dyn InventoryService>>,
}

impl ReserveInventory {
    fn parts(&self) -> Result<(&ReserveInventoryConfig, &dyn InventoryService), ActivityError> {
        let config = self
            .config
            .as_ref()
            .ok_or(ActivityError::NotConfigured(STEP_RESERVE_INVENTORY))?;
        let inventory = self
            .inventory
            .as_deref()
            .ok_or(ActivityError::MissingDependency("inventory"))?;
        Ok((config, inventory))
    }
}

#[async_trait]
impl Activity<FulfillmentServices> for ReserveInventory {
    fn name(&self) -> &str {
        STEP_RESERVE_INVENTORY
    }

    fn initialize(&mut self, ctx: &ActivityContext<FulfillmentServices>) {
        self.inventory = Some(Arc::clone(&ctx.services().inventory));
    }

    async fn execute(&mut self) -> Result<(), ActivityError> {
        let (config, inventory) = self.parts()?;
        let result = inventory
            .reserve(&config.order_id, config.items.clone())
            .await
            .map_err(ActivityError::failed)?;
        tracing::info!(
            order_id = %config.order_id,
            reservation_id = %result.reservation_id,
            "inventory reserved"
        );
        Ok(())
    }

    async fn compensate(&mut self) -> Result<(), ActivityError> {
        let (config, inventory) = self.parts()?;
        inventory
            .release(&config.order_id)
            .await
            .map_err(ActivityError::failed)?;
        tracing::info!(order_id = %config.order_id, "inventory released");
        Ok(())
    }
}

impl Configurable for ReserveInventory {
    type Config = ReserveInventoryConfig;

    fn configure(&mut self, config: ReserveInventoryConfig) {
        self.config = Some(config);
    }
}

/// Charges the customer; refunds on compensation.
#[derive(Default)]
pub struct ProcessPayment {
    config: Option<ProcessPaymentConfig>,
    payment: Option<Arc<dyn PaymentService>>,
}

impl ProcessPayment {
    fn parts(&self) -> Result<(&ProcessPaymentConfig, &dyn PaymentService), ActivityError> {
        let config = self
            .config
            .as_ref()
            .ok_or(ActivityError::NotConfigured(STEP_PROCESS_PAYMENT))?;
        let payment = self
            .payment
            .as_deref()
            .ok_or(ActivityError::MissingDependency("payment"))?;
        Ok((config, payment))
    }
}

#[async_trait]
impl Activity<FulfillmentServices> for ProcessPayment {
    fn name(&self) -> &str {
        STEP_PROCESS_PAYMENT
    }

    fn initialize(&mut self, ctx: &ActivityContext<FulfillmentServices>) {
        self.payment = Some(Arc::clone(&ctx.services().payment));
    }

    async fn execute(&mut self) -> Result<(), ActivityError> {
        let (config, payment) = self.parts()?;
        let result = payment
            .charge(&config.order_id, &config.customer_id, config.amount_cents)
            .await
            .map_err(ActivityError::failed)?;
        tracing::info!(
            order_id = %config.order_id,
            payment_id = %result.payment_id,
            amount_cents = config.amount_cents,
            "payment charged"
        );
        Ok(())
    }

    async fn compensate(&mut self) -> Result<(), ActivityError> {
        let (config, payment) = self.parts()?;
        payment
            .refund(&config.order_id)
            .await
            .map_err(ActivityError::failed)?;
        tracing::info!(order_id = %config.order_id, "payment refunded");
        Ok(())
    }
}

impl Configurable for ProcessPayment {
    type Config = ProcessPaymentConfig;

    fn configure(&mut self, config: ProcessPaymentConfig) {
        self.config = Some(config);
    }
}

/// Creates the shipment; cancels it on compensation.
#[derive(Default)]
pub struct CreateShipment {
    config: Option<CreateShipmentConfig>,
    shipping: Option<Arc<dyn ShippingService>>,
}

impl CreateShipment {
    fn parts(&self) -> Result<(&CreateShipmentConfig, &dyn ShippingService), ActivityError> {
        let config = self
            .config
            .as_ref()
            .ok_or(ActivityError::NotConfigured(STEP_CREATE_SHIPMENT))?;
        let shipping = self
            .shipping
            .as_deref()
            .ok_or(ActivityError::MissingDependency("shipping"))?;
        Ok((config, shipping))
    }
}

#[async_trait]
impl Activity<FulfillmentServices> for CreateShipment {
    fn name(&self) -> &str {
        STEP_CREATE_SHIPMENT
    }

    fn initialize(&mut self, ctx: &ActivityContext<FulfillmentServices>) {
        self.shipping = Some(Arc::clone(&ctx.services().shipping));
    }

    async fn execute(&mut self) -> Result<(), ActivityError> {
        let (config, shipping) = self.parts()?;
        let result = shipping
            .create_shipment(&config.order_id, &config.destination)
            .await
            .map_err(ActivityError::failed)?;
        tracing::info!(
            order_id = %config.order_id,
            tracking_number = %result.tracking_number,
            "shipment created"
        );
        Ok(())
    }

    async fn compensate(&mut self) -> Result<(), ActivityError> {
        let (config, shipping) = self.parts()?;
        shipping
            .cancel_shipment(&config.order_id)
            .await
            .map_err(ActivityError::failed)?;
        tracing::info!(order_id = %config.order_id, "shipment cancelled");
        Ok(())
    }
}

impl Configurable for CreateShipment {
    type Config = CreateShipmentConfig;

    fn configure(&mut self, config: CreateShipmentConfig) {
        self.config = Some(config);
    }
}
