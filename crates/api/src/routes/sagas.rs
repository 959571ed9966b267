//! Saga control endpoints: Execute, Abort, Resume and GetStatus.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::SagaId;
use saga::fulfillment::{
    FulfillmentOrder, FulfillmentServices, InMemoryInventoryService, InMemoryPaymentService,
    InMemoryShippingService,
};
use saga::{ActivityDefinition, SagaHost, SagaSnapshot, SagaStatus};
use serde::{Deserialize, Serialize};
use state_store::StateStore;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: StateStore> {
    pub host: SagaHost<S, FulfillmentServices>,
    pub inventory: InMemoryInventoryService,
    pub payment: InMemoryPaymentService,
    pub shipping: InMemoryShippingService,
}

// -- Request types --

#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub activities: Vec<ActivityDefinition>,
}

// -- Response types --

#[derive(Serialize)]
pub struct AcceptedResponse {
    pub saga_id: String,
    pub status: SagaStatus,
}

// -- Handlers --

/// POST /sagas/:id/execute — store the activity chain and start driving it.
#[tracing::instrument(skip(state, body))]
pub async fn execute<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SagaSnapshot>), ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    // Reject chains the worker could never rehydrate
    state
        .host
        .orchestrator()
        .registry()
        .rehydrate(&req.activities)?;

    let snapshot = state
        .host
        .handle(saga_id)
        .await
        .execute(req.activities)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// POST /sagas/:id/abort — force the saga into compensation.
#[tracing::instrument(skip(state))]
pub async fn abort<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SagaSnapshot>), ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let snapshot = state.host.handle(saga_id).await.abort().await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// POST /sagas/:id/resume — drive the saga from its persisted state.
#[tracing::instrument(skip(state))]
pub async fn resume<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let saga_id = parse_saga_id(&id)?;
    state.host.handle(saga_id).await.resume()?;

    let response = AcceptedResponse {
        saga_id: saga_id.to_string(),
        status: state.host.snapshot(saga_id).await?.status,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /sagas/:id — persisted progress of a saga.
#[tracing::instrument(skip(state))]
pub async fn get<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaSnapshot>, ApiError> {
    let saga_id = parse_saga_id(&id)?;
    let snapshot = state.host.snapshot(saga_id).await?;
    Ok(Json(snapshot))
}

/// POST /fulfillments — start an order fulfillment saga for an order.
#[tracing::instrument(skip(state, body))]
pub async fn fulfill<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<FulfillmentOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let Json(order) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if order.items.is_empty() {
        return Err(ApiError::BadRequest("Order has no items".to_string()));
    }

    let saga_id = SagaId::new();
    let snapshot = state
        .host
        .handle(saga_id)
        .await
        .execute(order.definitions()?)
        .await?;
    tracing::info!(%saga_id, order_id = %order.order_id, "fulfillment accepted");

    let response = AcceptedResponse {
        saga_id: saga_id.to_string(),
        status: snapshot.status,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

fn parse_saga_id(id: &str) -> Result<SagaId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("{e}")))
}
