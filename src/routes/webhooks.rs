//! Webhook route handlers
//!
//! Bodies are taken as raw JSON: the handlers decode leniently and the raw
//! payload is what lands in the sync log.

use crate::dependency::DeliveryOutcome;
use crate::error::ApiResult;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use crate::sync::{HeaderOutcome, MasterdataReport, TrackingOutcome, MATERIAL, STYLE};
use axum::extract::State;
use axum::Json;
use serde_json::Value;

/// Material header events
pub async fn material_event(
    State(state): State<SharedState>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<SuccessResponse<HeaderOutcome>>> {
    let outcome = state.header.handle_event(&MATERIAL, &payload).await?;
    Ok(Json(SuccessResponse::with_data("Material event processed", outcome)))
}

/// Style header events
pub async fn style_event(
    State(state): State<SharedState>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<SuccessResponse<HeaderOutcome>>> {
    let outcome = state.header.handle_event(&STYLE, &payload).await?;
    Ok(Json(SuccessResponse::with_data("Style event processed", outcome)))
}

/// Tracking plan-style events
pub async fn tracking_event(
    State(state): State<SharedState>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<SuccessResponse<TrackingOutcome>>> {
    let outcome = state.tracking.handle_event(&payload).await?;
    Ok(Json(SuccessResponse::with_data("Tracking event processed", outcome)))
}

/// Dependency delivery from the agent
pub async fn deliver_dependencies(
    State(state): State<SharedState>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<SuccessResponse<DeliveryOutcome>>> {
    let outcome = state.dependencies.deliver(&payload).await?;
    let message = format!(
        "Stored {} dependencies for plan {}",
        outcome.dependencies_stored, outcome.plan_id
    );
    Ok(Json(SuccessResponse::with_data(message, outcome)))
}

pub async fn sync_masterdata(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<MasterdataReport>>> {
    let report = state.masterdata.sync_all().await;
    Ok(Json(SuccessResponse::with_data("Masterdata sync completed", report)))
}
