//! Collaborator services called by the fulfillment activities.
//!
//! Every operation is keyed by order id and idempotent, so a step replayed
//! after a crash does not reserve, charge or ship twice.

pub mod inventory;
pub mod payment;
pub mod shipping;

use thiserror::Error;

pub use inventory::{
    InMemoryInventoryService, InventoryService, ReservationItem, ReservationResult,
};
pub use payment::{InMemoryPaymentService, PaymentResult, PaymentService};
pub use shipping::{InMemoryShippingService, ShipmentResult, ShippingService};

/// Errors returned by the fulfillment collaborator services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service refused the request.
    #[error("{0}")]
    Rejected(String),

    /// The service could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Pops one pending injected failure, if any.
pub(crate) fn take_failure(remaining: &mut u32) -> bool {
    if *remaining == 0 {
        return false;
    }
    *remaining -= 1;
    true
}
