//! Opsgenie incident channel.
//!
//! Flow per message:
//! 1. Skip warnings unless the channel opted into them
//! 2. Build the incident (priority, text, details from annotations + labels)
//! 3. `POST <base>/v1/incidents/create` with bounded retry

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use url::Url;
use uuid::Uuid;

use sentinel_common::config::OpsgenieConfig;
use sentinel_common::types::Message;

pub use sentinel_common::config::OpsgenieRegion as Region;

use crate::Notifier;
use crate::error::NotifierError;
use crate::retry::{DEFAULT_DELAY, DeliveryError, RetryPolicy};
use crate::webhook::parse_destination;

const NAME: &str = "opsgenie";
const CREATE_INCIDENT_PATH: &str = "v1/incidents/create";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Public API endpoint of `region`.
pub fn region_url(region: Region) -> &'static str {
    match region {
        Region::Us => "https://api.opsgenie.com",
        Region::Eu => "https://api.eu.opsgenie.com",
        Region::Sandbox => "https://api.sandbox.opsgenie.com",
    }
}

/// Incident priority as understood by Opsgenie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Priority {
    P1,
    P5,
}

/// Body of an incident creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIncident {
    pub message: String,
    pub description: String,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub details: BTreeMap<String, String>,
    pub notify_stakeholders: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
}

/// Options for an [`OpsgenieNotifier`], checked in [`OpsgenieBuilder::build`].
#[derive(Debug, Clone)]
pub struct OpsgenieBuilder {
    api_key: String,
    region: Region,
    base_url: Option<String>,
    tags: Vec<String>,
    notify_on_warning: bool,
    notify_stakeholders: bool,
    service_id: Option<String>,
    retries: u32,
}

impl OpsgenieBuilder {
    pub fn region(mut self, region: Region) -> Self {
        self.region = region;
        self
    }

    /// Override the region's endpoint, e.g. for a proxy.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Tags are accumulated across calls.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn notify_on_warning(mut self, notify: bool) -> Self {
        self.notify_on_warning = notify;
        self
    }

    pub fn notify_stakeholders(mut self, notify: bool) -> Self {
        self.notify_stakeholders = notify;
        self
    }

    pub fn service_id(mut self, id: impl Into<String>) -> Self {
        self.service_id = Some(id.into());
        self
    }

    /// Retries after the first failed attempt.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn build(self) -> Result<OpsgenieNotifier, NotifierError> {
        let api_key = self.api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(NotifierError::MissingApiKey);
        }
        Uuid::parse_str(&api_key).map_err(|_| NotifierError::InvalidApiKey)?;

        let raw = self
            .base_url
            .unwrap_or_else(|| region_url(self.region).to_string());
        let mut base = parse_destination(NAME, &raw)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(CREATE_INCIDENT_PATH)
            .map_err(|e| NotifierError::InvalidUrl {
                name: NAME.to_string(),
                url: raw.clone(),
                reason: e.to_string(),
            })?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| NotifierError::HttpClient {
                name: NAME.to_string(),
                source,
            })?;

        tracing::debug!(
            endpoint = %endpoint,
            notify_on_warning = self.notify_on_warning,
            retries = self.retries,
            "Configured Opsgenie"
        );

        Ok(OpsgenieNotifier {
            endpoint,
            authorization: format!("GenieKey {}", api_key),
            client,
            tags: self.tags,
            notify_on_warning: self.notify_on_warning,
            notify_stakeholders: self.notify_stakeholders,
            service_id: self.service_id,
            retry: RetryPolicy::new(self.retries.saturating_add(1), DEFAULT_DELAY),
        })
    }
}

/// Opens an Opsgenie incident for every failed backup.
pub struct OpsgenieNotifier {
    endpoint: Url,
    authorization: String,
    client: Client,
    tags: Vec<String>,
    notify_on_warning: bool,
    notify_stakeholders: bool,
    service_id: Option<String>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpsgenieNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsgenieNotifier")
            .field("endpoint", &self.endpoint.as_str())
            .field("notify_on_warning", &self.notify_on_warning)
            .finish_non_exhaustive()
    }
}

impl OpsgenieNotifier {
    pub fn builder(api_key: impl Into<String>) -> OpsgenieBuilder {
        OpsgenieBuilder {
            api_key: api_key.into(),
            region: Region::default(),
            base_url: None,
            tags: Vec::new(),
            notify_on_warning: false,
            notify_stakeholders: false,
            service_id: None,
            retries: 2,
        }
    }

    pub fn from_config(config: &OpsgenieConfig) -> Result<Self, NotifierError> {
        let mut builder = Self::builder(config.api_key.clone())
            .region(config.region)
            .tags(config.tags.iter().cloned())
            .notify_on_warning(config.notify_on_warning)
            .notify_stakeholders(config.notify_stakeholders)
            .retries(config.retries);
        if let Some(url) = &config.api_url {
            builder = builder.base_url(url.clone());
        }
        if let Some(id) = &config.service_id {
            builder = builder.service_id(id.clone());
        }
        builder.build()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// The incident to open for `message`, if any.
    pub fn incident(&self, message: &Message) -> Option<CreateIncident> {
        let backup = message.backup();
        let (priority, text) = match message {
            Message::Warning(_) if !self.notify_on_warning => return None,
            Message::Warning(_) => (Priority::P5, format!("{} failed partially", backup.name())),
            Message::Error(_) => (Priority::P1, format!("{} failed", backup.name())),
        };

        let mut details = backup.metadata.annotations.clone();
        details.extend(
            backup
                .metadata
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        Some(CreateIncident {
            message: text,
            description: message.summary(),
            priority,
            tags: self.tags.clone(),
            details,
            notify_stakeholders: self.notify_stakeholders,
            service_id: self.service_id.clone(),
        })
    }

    async fn send(&self, body: &[u8]) -> Result<(), DeliveryError> {
        let request = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, &self.authorization)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .build()
            .map_err(DeliveryError::Request)?;

        let response = self
            .client
            .execute(request)
            .await
            .map_err(DeliveryError::Transport)?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(DeliveryError::Status(status));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for OpsgenieNotifier {
    fn kind(&self) -> &'static str {
        "opsgenie"
    }

    fn name(&self) -> &str {
        NAME
    }

    async fn notify(&mut self, message: &Message) {
        let backup = message.backup().name();
        let Some(incident) = self.incident(message) else {
            tracing::debug!(backup = %backup, "Skipping warning");
            return;
        };

        let body = match serde_json::to_vec(&incident) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(backup = %backup, error = %e, "Encoding incident failed");
                return;
            }
        };

        let this = &*self;
        let body = body.as_slice();
        let result = this
            .retry
            .run(
                move |_| this.send(body),
                |attempt, error| {
                    tracing::warn!(
                        backup = %backup,
                        attempt,
                        error = %error,
                        "Creating incident temporarily failed"
                    );
                },
            )
            .await;

        match result {
            Ok(_) => tracing::info!(
                backup = %backup,
                priority = ?incident.priority,
                "Incident created"
            ),
            Err(failure) => tracing::error!(
                backup = %backup,
                attempts = failure.attempts,
                error = %failure.error,
                "Creating incident failed"
            ),
        }
    }
}
