pub mod events;
pub mod health;

use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::state::AppState;

/// Largest accepted request body. Backup objects carry little beyond
/// metadata and status.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(events::router())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
