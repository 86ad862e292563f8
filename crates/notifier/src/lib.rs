//! Notification delivery for classified backup events.
//!
//! A [`Pipeline`] owns one receive loop per configured channel and a
//! broadcaster that forwards every inbound [`Message`] to all of them:
//! - Webhook (templated HTTP callback, bounded retry)
//! - Opsgenie (incident creation)
//! - Log (always present, appended last)

pub mod error;
pub mod log;
pub mod opsgenie;
pub mod pipeline;
pub mod retry;
pub mod template;
pub mod webhook;

pub use error::NotifierError;
pub use pipeline::{Intake, Pipeline, PipelineTasks};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::Instrument;

use sentinel_common::types::Message;

/// A notification channel.
///
/// Implementations handle their own failures: `notify` never reports an
/// error to the caller, it logs and moves on to the next message.
#[async_trait]
pub trait Notifier: Send {
    /// Channel type, e.g. "webhook".
    fn kind(&self) -> &'static str;

    /// Configured alias used in logs.
    fn name(&self) -> &str;

    async fn notify(&mut self, message: &Message);
}

/// Drive a notifier until its intake is closed by the pipeline.
pub(crate) async fn run_notifier(
    mut notifier: Box<dyn Notifier>,
    mut intake: mpsc::Receiver<Arc<Message>>,
) {
    let span = tracing::info_span!("notifier", kind = notifier.kind(), name = %notifier.name());

    async move {
        tracing::info!("Starting up");
        while let Some(message) = intake.recv().await {
            notifier.notify(&message).await;
        }
        tracing::info!("Shut down");
    }
    .instrument(span)
    .await
}
