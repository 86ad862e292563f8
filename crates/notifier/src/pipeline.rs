//! Fan-out of classified messages to every configured channel.
//!
//! Layout after [`Pipeline::run`]:
//! 1. One intake channel, fed by the event processor
//! 2. One broadcaster task forwarding each message to every notifier intake,
//!    in order, awaiting each send
//! 3. One task per notifier draining its own intake
//!
//! All channels are bounded with capacity 1, so a notifier that is still busy
//! with an earlier message holds up delivery to the notifiers after it.
//! Dropping every [`Intake`] shuts the whole pipeline down.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sentinel_common::config::NotifierConfig;
use sentinel_common::types::Message;

use crate::error::NotifierError;
use crate::log::LogNotifier;
use crate::opsgenie::OpsgenieNotifier;
use crate::webhook::WebhookNotifier;
use crate::{Notifier, run_notifier};

pub const INTAKE_CAPACITY: usize = 1;

/// Sending side of the pipeline.
pub type Intake = mpsc::Sender<Arc<Message>>;

/// Configured notifiers, not yet running.
pub struct Pipeline {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Pipeline {
    /// Build every configured channel, followed by the log notifier.
    ///
    /// Fails on the first channel that cannot be built; nothing is spawned
    /// until [`Pipeline::run`].
    pub fn new(config: &NotifierConfig) -> Result<Self, NotifierError> {
        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::with_capacity(config.webhooks.len() + 1);

        for webhook in &config.webhooks {
            notifiers.push(Box::new(WebhookNotifier::new(webhook)?));
        }
        if let Some(opsgenie) = &config.opsgenie {
            notifiers.push(Box::new(OpsgenieNotifier::from_config(opsgenie)?));
        }

        Ok(Self::with_notifiers(notifiers))
    }

    /// Use `notifiers` as they are; the log notifier is appended last.
    pub fn with_notifiers(mut notifiers: Vec<Box<dyn Notifier>>) -> Self {
        notifiers.push(Box::new(LogNotifier::new()));
        Self { notifiers }
    }

    pub fn notifier_names(&self) -> Vec<&str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    pub fn notifier_count(&self) -> usize {
        self.notifiers.len()
    }

    /// Spawn the notifier tasks and the broadcaster.
    ///
    /// Must be called inside a tokio runtime.
    pub fn run(self) -> (Intake, PipelineTasks) {
        let (intake, upstream) = mpsc::channel(INTAKE_CAPACITY);
        let count = self.notifiers.len();

        let mut downstream = Vec::with_capacity(count);
        let mut tasks = Vec::with_capacity(count + 1);
        for notifier in self.notifiers {
            let (tx, rx) = mpsc::channel(INTAKE_CAPACITY);
            downstream.push(tx);
            tasks.push(tokio::spawn(run_notifier(notifier, rx)));
        }
        tasks.push(tokio::spawn(broadcast(upstream, downstream)));

        tracing::info!(notifiers = count, "Notification pipeline running");
        (intake, PipelineTasks { tasks })
    }
}

/// Forward every upstream message to all downstream intakes, in order.
///
/// Returns once upstream is closed and drained; the downstream senders are
/// dropped on return, which closes every notifier intake.
pub(crate) async fn broadcast(
    mut upstream: mpsc::Receiver<Arc<Message>>,
    downstream: Vec<mpsc::Sender<Arc<Message>>>,
) {
    while let Some(message) = upstream.recv().await {
        tracing::debug!(
            backup = %message.backup().name(),
            severity = %message.severity(),
            "Broadcasting message"
        );
        for (index, tx) in downstream.iter().enumerate() {
            if tx.send(Arc::clone(&message)).await.is_err() {
                tracing::warn!(notifier = index, "Notifier is gone, message dropped");
            }
        }
    }
    tracing::info!("Intake closed, shutting down notifiers");
}

/// Handles of every task spawned by [`Pipeline::run`].
#[derive(Debug)]
pub struct PipelineTasks {
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineTasks {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait until every notifier and the broadcaster have exited.
    ///
    /// Only returns after all intakes were dropped.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Pipeline task failed");
            }
        }
        tracing::info!("Notification pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use sentinel_common::config::{OpsgenieConfig, WebhookConfig};
    use sentinel_common::types::{Backup, BackupPhase};
    use tokio::sync::oneshot;

    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(name: &'static str) -> (Box<dyn Notifier>, Arc<Mutex<Vec<String>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let recorder = Recorder {
                name,
                seen: Arc::clone(&seen),
            };
            (Box::new(recorder), seen)
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        fn kind(&self) -> &'static str {
            "recorder"
        }

        fn name(&self) -> &str {
            self.name
        }

        async fn notify(&mut self, message: &Message) {
            self.seen
                .lock()
                .unwrap()
                .push(message.backup().name().to_string());
        }
    }

    /// Blocks on its first message until the gate is opened.
    struct Stalled {
        gate: Option<oneshot::Receiver<()>>,
    }

    #[async_trait]
    impl Notifier for Stalled {
        fn kind(&self) -> &'static str {
            "stalled"
        }

        fn name(&self) -> &str {
            "stalled"
        }

        async fn notify(&mut self, _message: &Message) {
            if let Some(gate) = self.gate.take() {
                let _ = gate.await;
            }
        }
    }

    fn failed(name: &str) -> Arc<Message> {
        Arc::new(Message::Error(Backup::new(name, BackupPhase::Failed)))
    }

    async fn join_within(tasks: PipelineTasks) {
        tokio::time::timeout(Duration::from_secs(5), tasks.join())
            .await
            .expect("pipeline did not shut down");
    }

    #[test]
    fn test_log_notifier_is_appended_last() {
        let config = NotifierConfig {
            webhooks: vec![
                WebhookConfig::new("first", "http://localhost:1/a"),
                WebhookConfig::new("second", "http://localhost:1/b"),
            ],
            opsgenie: Some(OpsgenieConfig {
                api_key: "6f1b1d6e-6b0c-4e0a-9f1e-2a4c2f3e8d11".to_string(),
                ..OpsgenieConfig::default()
            }),
        };

        let pipeline = Pipeline::new(&config).unwrap();
        assert_eq!(pipeline.notifier_count(), 4);
        assert_eq!(
            pipeline.notifier_names(),
            vec!["first", "second", "opsgenie", "log"]
        );
    }

    #[test]
    fn test_empty_config_is_log_only() {
        let pipeline = Pipeline::new(&NotifierConfig::default()).unwrap();
        assert_eq!(pipeline.notifier_names(), vec!["log"]);
    }

    #[test]
    fn test_invalid_webhook_aborts_construction() {
        let config = NotifierConfig {
            webhooks: vec![
                WebhookConfig::new("valid", "http://localhost:1/a"),
                WebhookConfig::new("invalidURL", "not a url"),
            ],
            opsgenie: None,
        };

        let err = Pipeline::new(&config).err().unwrap();
        assert!(matches!(err, NotifierError::InvalidUrl { ref name, .. } if name == "invalidURL"));
    }

    #[tokio::test]
    async fn test_runs_one_task_per_notifier_plus_broadcaster() {
        let (a, _) = Recorder::new("a");
        let (b, _) = Recorder::new("b");
        let (intake, tasks) = Pipeline::with_notifiers(vec![a, b]).run();

        // a, b, log, broadcaster
        assert_eq!(tasks.len(), 4);

        drop(intake);
        join_within(tasks).await;
    }

    #[tokio::test]
    async fn test_every_notifier_sees_every_message_in_order() {
        let (a, seen_a) = Recorder::new("a");
        let (b, seen_b) = Recorder::new("b");
        let (intake, tasks) = Pipeline::with_notifiers(vec![a, b]).run();

        for name in ["one", "two", "three"] {
            intake.send(failed(name)).await.unwrap();
        }
        drop(intake);
        join_within(tasks).await;

        let expected = vec!["one", "two", "three"];
        assert_eq!(*seen_a.lock().unwrap(), expected);
        assert_eq!(*seen_b.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_closing_intake_with_cloned_senders() {
        let (a, seen) = Recorder::new("a");
        let (intake, tasks) = Pipeline::with_notifiers(vec![a]).run();
        let other = intake.clone();

        drop(intake);
        other.send(failed("late")).await.unwrap();
        drop(other);
        join_within(tasks).await;

        assert_eq!(*seen.lock().unwrap(), vec!["late"]);
    }

    #[tokio::test]
    async fn test_stalled_notifier_blocks_the_others() {
        let (open, gate) = oneshot::channel();
        let stalled: Box<dyn Notifier> = Box::new(Stalled { gate: Some(gate) });
        let (after, seen) = Recorder::new("after");
        let (intake, tasks) = Pipeline::with_notifiers(vec![stalled, after]).run();

        for name in ["m1", "m2", "m3", "m4"] {
            intake.send(failed(name)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        // m1 is held by the stalled notifier, m2 sits in its intake and the
        // broadcaster waits to hand it m3; m4 waits in the pipeline intake.
        assert_eq!(*seen.lock().unwrap(), vec!["m1", "m2"]);
        assert!(intake.try_send(failed("m5")).is_err());

        open.send(()).unwrap();
        drop(intake);
        join_within(tasks).await;

        assert_eq!(*seen.lock().unwrap(), vec!["m1", "m2", "m3", "m4"]);
    }
}
