//! HTTP API server with observability for the saga orchestrator.
//!
//! Provides REST endpoints to execute, abort, resume and inspect sagas,
//! plus a fulfillment endpoint that starts the sample order saga, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::fulfillment::{
    self, FulfillmentServices, InMemoryInventoryService, InMemoryPaymentService,
    InMemoryShippingService,
};
use saga::{ReminderTick, SagaHost, SagaOrchestrator, TokioReminderService};
use state_store::StateStore;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::sagas::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: StateStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .route("/sagas/{id}/execute", post(routes::sagas::execute::<S>))
        .route("/sagas/{id}/abort", post(routes::sagas::abort::<S>))
        .route("/sagas/{id}/resume", post(routes::sagas::resume::<S>))
        .route("/fulfillments", post(routes::sagas::fulfill::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state with the fulfillment catalog and
/// in-memory collaborator services.
///
/// Returns the receiving end of the reminder tick channel; hand it to
/// `SagaHost::spawn_tick_router` so recovery reminders reach the workers.
pub fn create_default_state<S: StateStore + 'static>(
    store: S,
    config: &Config,
) -> (Arc<AppState<S>>, mpsc::UnboundedReceiver<ReminderTick>) {
    let inventory = InMemoryInventoryService::new();
    let payment = InMemoryPaymentService::new();
    let shipping = InMemoryShippingService::new();
    let services = FulfillmentServices::new(
        Arc::new(inventory.clone()),
        Arc::new(payment.clone()),
        Arc::new(shipping.clone()),
    );

    let (reminders, ticks) = TokioReminderService::new();
    let orchestrator = SagaOrchestrator::new(
        store,
        Arc::new(fulfillment::registry()),
        Arc::new(reminders),
        Arc::new(services),
        config.orchestrator_config(),
    );

    let state = Arc::new(AppState {
        host: SagaHost::new(orchestrator),
        inventory,
        payment,
        shipping,
    });

    (state, ticks)
}
