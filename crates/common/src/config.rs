use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the ingestion API binds to (default: 0.0.0.0:8080)
    pub bind_addr: SocketAddr,

    /// Path to the YAML notifier configuration. Unset means "log only".
    pub notifier_config_path: Option<PathBuf>,

    /// Emit logs as JSON lines instead of human readable text
    pub log_json: bool,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            bind_addr: std::env::var("SENTINEL_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SENTINEL_BIND_ADDR must be a socket address"))?,
            notifier_config_path: std::env::var("SENTINEL_NOTIFIER_CONFIG")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            log_json: std::env::var("SENTINEL_LOG_JSON")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SENTINEL_LOG_JSON must be true or false"))?,
        })
    }

    /// Load the notifier configuration this process points at.
    pub fn notifier_config(&self) -> Result<NotifierConfig, AppError> {
        match &self.notifier_config_path {
            Some(path) => NotifierConfig::from_file(path),
            None => Ok(NotifierConfig::default()),
        }
    }
}

/// Static configuration of every notification channel.
///
/// ```yaml
/// webhooks:
///   - name: slack
///     url: https://hooks.slack.com/services/T000/B000/XXXX
///     template: |
///       {{> slack}}
/// opsgenie:
///   api_key: 6f1b1d6e-6b0c-4e0a-9f1e-2a4c2f3e8d11
///   region: eu
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,

    #[serde(default)]
    pub opsgenie: Option<OpsgenieConfig>,
}

impl NotifierConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, AppError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| AppError::Config(format!("malformed notifier configuration: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!(
                "reading notifier configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_yaml_str(&yaml)?;

        tracing::info!(
            path = %path.display(),
            webhooks = config.webhooks.len(),
            opsgenie = config.opsgenie.is_some(),
            "Loaded notifier configuration"
        );
        Ok(config)
    }
}

/// A templated HTTP callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Alias used in logs
    pub name: String,

    /// Destination in the form (http|https)://host[:port][/path]
    pub url: String,

    /// HTTP method (default: POST)
    #[serde(default = "default_method")]
    pub method: String,

    /// Unified template; receives `type` = "warning" | "error"
    #[serde(default)]
    pub template: Option<String>,

    /// Template used for warnings instead of the unified one
    #[serde(default)]
    pub warning_template: Option<String>,

    /// Template used for errors instead of the unified one
    #[serde(default)]
    pub error_template: Option<String>,

    /// Extra request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Content type of the rendered body (default: application/json)
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Pause between delivery attempts in milliseconds (default: 500)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl WebhookConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: default_method(),
            template: None,
            warning_template: None,
            error_template: None,
            headers: BTreeMap::new(),
            content_type: default_content_type(),
            timeout_secs: default_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// Opsgenie API region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpsgenieRegion {
    #[default]
    Us,
    Eu,
    Sandbox,
}

/// Opsgenie incident channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpsgenieConfig {
    pub api_key: String,

    #[serde(default)]
    pub region: OpsgenieRegion,

    /// Overrides the region's API endpoint
    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Open incidents for partially failed backups too (default: false)
    #[serde(default)]
    pub notify_on_warning: bool,

    #[serde(default)]
    pub notify_stakeholders: bool,

    #[serde(default)]
    pub service_id: Option<String>,

    /// Retries after the first failed attempt (default: 2)
    #[serde(default = "default_opsgenie_retries")]
    pub retries: u32,
}

fn default_opsgenie_retries() -> u32 {
    2
}
