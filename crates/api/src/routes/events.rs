//! Watch event ingestion.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use sentinel_common::error::AppError;
use sentinel_common::types::WatchEvent;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/events", post(ingest_event))
}

/// POST /api/events: classify a watch event and enqueue its notification.
///
/// Answers once the message is on the pipeline intake, not after delivery.
async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<WatchEvent>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let severity = state.processor.process(event).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "notification": severity }))))
}
