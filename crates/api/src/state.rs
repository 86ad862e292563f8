//! Shared application state for the Axum API server.

use std::sync::Arc;

use sentinel_engine::EventProcessor;

/// Application state shared across all route handlers via Axum `State`.
///
/// Holds the pipeline intake through the processor; the pipeline only shuts
/// down after the last clone of this state is dropped.
#[derive(Clone)]
pub struct AppState {
    pub processor: EventProcessor,
    pub notifiers: Arc<[String]>,
}

impl AppState {
    pub fn new(processor: EventProcessor, notifiers: Vec<String>) -> Self {
        Self {
            processor,
            notifiers: notifiers.into(),
        }
    }
}
