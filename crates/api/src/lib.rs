//! HTTP ingestion surface for backup watch events.
//!
//! Endpoints:
//! - GET  /health: liveness plus the configured notification channels
//! - POST /api/events: submit one watch event for classification

pub mod routes;
pub mod state;
