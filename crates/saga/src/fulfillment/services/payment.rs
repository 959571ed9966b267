//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::{ServiceError, take_failure};

/// Result of a successful payment charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    /// The payment ID assigned by the payment service.
    pub payment_id: String,
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges a customer for an order. An order is charged at most once.
    async fn charge(
        &self,
        order_id: &str,
        customer_id: &str,
        amount_cents: u64,
    ) -> Result<PaymentResult, ServiceError>;

    /// Refunds the order's payment. Refunding twice is a no-op.
    async fn refund(&self, order_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, (String, String, u64)>,
    calls: Vec<String>,
    next_id: u32,
    fail_on_charge: bool,
    failing_refunds: u32,
    charge_delay: Option<Duration>,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail every charge call.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().unwrap().fail_on_charge = fail;
    }

    /// Makes the next `count` refund calls fail.
    pub fn fail_next_refunds(&self, count: u32) {
        self.state.write().unwrap().failing_refunds = count;
    }

    /// Makes each charge call wait before answering.
    pub fn set_charge_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().charge_delay = delay;
    }

    /// Returns the number of active payments.
    pub fn payment_count(&self) -> usize {
        self.state.read().unwrap().payments.len()
    }

    /// Returns true if the order has an active payment.
    pub fn is_charged(&self, order_id: &str) -> bool {
        self.state.read().unwrap().payments.contains_key(order_id)
    }

    /// Returns every call made so far, e.g. `"charge:ORD-1"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.read().unwrap().calls.clone()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        order_id: &str,
        customer_id: &str,
        amount_cents: u64,
    ) -> Result<PaymentResult, ServiceError> {
        let delay = self.state.read().unwrap().charge_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        state.calls.push(format!("charge:{order_id}"));

        if state.fail_on_charge {
            return Err(ServiceError::Rejected("Payment declined".to_string()));
        }

        if let Some((payment_id, _, _)) = state.payments.get(order_id) {
            return Ok(PaymentResult {
                payment_id: payment_id.clone(),
            });
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state.payments.insert(
            order_id.to_string(),
            (payment_id.clone(), customer_id.to_string(), amount_cents),
        );

        Ok(PaymentResult { payment_id })
    }

    async fn refund(&self, order_id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        state.calls.push(format!("refund:{order_id}"));

        if take_failure(&mut state.failing_refunds) {
            return Err(ServiceError::Unavailable("payment".to_string()));
        }

        state.payments.remove(order_id);
        Ok(())
    }
}
