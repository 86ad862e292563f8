//! Templated HTTP callback channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use url::Url;

use sentinel_common::config::WebhookConfig;
use sentinel_common::types::{Message, Severity};

use crate::Notifier;
use crate::error::NotifierError;
use crate::retry::{DeliveryError, RetryPolicy};
use crate::template::{CompiledTemplate, DEFAULT_TEMPLATE};

/// Delivers every message as one HTTP request whose body is the rendered
/// template.
///
/// A warning- or error-specific template takes precedence over the unified
/// one for its severity.
pub struct WebhookNotifier {
    name: String,
    url: Url,
    method: Method,
    headers: HeaderMap,
    client: Client,
    unified: CompiledTemplate,
    warning: Option<CompiledTemplate>,
    error: Option<CompiledTemplate>,
    retry: RetryPolicy,
    buffer: Vec<u8>,
}

impl std::fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookNotifier")
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .finish()
    }
}

impl WebhookNotifier {
    /// Validate `config` and compile its templates.
    ///
    /// Nothing is sent here; every problem with the destination, method,
    /// headers or templates is reported before the first delivery.
    pub fn new(config: &WebhookConfig) -> Result<Self, NotifierError> {
        let name = config.name.clone();
        let url = parse_destination(&name, &config.url)?;

        for (setting, value) in [
            ("timeout_secs", config.timeout_secs),
            ("retry_delay_ms", config.retry_delay_ms),
        ] {
            if value == 0 {
                return Err(NotifierError::ZeroSetting {
                    name: name.clone(),
                    setting,
                });
            }
        }

        let method = Method::from_bytes(config.method.trim().to_uppercase().as_bytes())
            .map_err(|_| NotifierError::InvalidMethod {
                name: name.clone(),
                method: config.method.clone(),
            })?;

        let mut headers = HeaderMap::new();
        let content_type =
            HeaderValue::from_str(&config.content_type).map_err(|_| NotifierError::InvalidHeader {
                name: name.clone(),
                header: CONTENT_TYPE.to_string(),
            })?;
        headers.insert(CONTENT_TYPE, content_type);
        for (key, value) in &config.headers {
            let invalid = || NotifierError::InvalidHeader {
                name: name.clone(),
                header: key.clone(),
            };
            let key = HeaderName::from_bytes(key.as_bytes()).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.insert(key, value);
        }

        let compile = |source: Option<&str>| {
            CompiledTemplate::compile(source, DEFAULT_TEMPLATE).map_err(|source| {
                NotifierError::Template {
                    name: name.clone(),
                    source,
                }
            })
        };
        let unified = compile(config.template.as_deref())?;
        let warning = config
            .warning_template
            .as_deref()
            .map(|source| compile(Some(source)))
            .transpose()?;
        let error = config
            .error_template
            .as_deref()
            .map(|source| compile(Some(source)))
            .transpose()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|source| NotifierError::HttpClient {
                name: name.clone(),
                source,
            })?;

        tracing::debug!(
            webhook = %name,
            url = %url,
            method = %method,
            "Configured webhook"
        );

        Ok(Self {
            name,
            url,
            method,
            headers,
            client,
            unified,
            warning,
            error,
            retry: RetryPolicy::new(
                crate::retry::DEFAULT_ATTEMPTS,
                Duration::from_millis(config.retry_delay_ms),
            ),
            buffer: Vec::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Render `message` into the reusable buffer.
    fn render(&mut self, message: &Message) -> Result<(), DeliveryError> {
        self.buffer.clear();
        let template = match message.severity() {
            Severity::Warning => self.warning.as_ref(),
            Severity::Error => self.error.as_ref(),
        }
        .unwrap_or(&self.unified);
        template.render_into(message, &mut self.buffer)
    }

    /// One delivery attempt with the current buffer as body.
    async fn send(&self) -> Result<(), DeliveryError> {
        let request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone())
            .body(self.buffer.clone())
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
impl Notifier for WebhookNotifier {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&mut self, message: &Message) {
        if let Err(error) = self.render(message) {
            tracing::error!(
                webhook = %self.name,
                backup = %message.backup().name(),
                error = %error,
                "Rendering webhook payload failed"
            );
            return;
        }

        let this = &*self;
        let result = this
            .retry
            .run(
                move |_| this.send(),
                |attempt, error| {
                    tracing::warn!(
                        webhook = %this.name,
                        url = %this.url,
                        attempt,
                        error = %error,
                        "Sending webhook temporarily failed"
                    );
                },
            )
            .await;

        match result {
            Ok(attempts) => tracing::debug!(
                webhook = %this.name,
                backup = %message.backup().name(),
                attempts,
                "Webhook delivered"
            ),
            Err(failure) => tracing::error!(
                webhook = %this.name,
                url = %this.url,
                attempts = failure.attempts,
                error = %failure.error,
                "Sending webhook failed"
            ),
        }
    }
}

/// Parse an outbound destination; only absolute http(s) URLs with a host
/// are accepted.
pub(crate) fn parse_destination(name: &str, raw: &str) -> Result<Url, NotifierError> {
    let invalid = |reason: String| NotifierError::InvalidUrl {
        name: name.to_string(),
        url: raw.to_string(),
        reason,
    };

    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_common::types::{Backup, BackupPhase};

    #[test]
    fn test_valid_config() {
        let notifier = WebhookNotifier::new(&WebhookConfig::new("test", "http://example.com/hook"))
            .unwrap();
        assert_eq!(notifier.name(), "test");
        assert_eq!(notifier.kind(), "webhook");
        assert_eq!(notifier.method, Method::POST);
        assert_eq!(notifier.url().as_str(), "http://example.com/hook");
        assert_eq!(
            notifier.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_invalid_urls_rejected() {
        for url in ["not a url", "http://exa mple.com", "ftp://example.com", "/relative/path"] {
            let err = WebhookNotifier::new(&WebhookConfig::new("invalidURL", url)).unwrap_err();
            assert!(
                matches!(err, NotifierError::InvalidUrl { .. }),
                "{} should be rejected, got {:?}",
                url,
                err
            );
        }
    }

    #[test]
    fn test_method_is_normalised() {
        let mut config = WebhookConfig::new("test", "https://example.com");
        config.method = "put".to_string();
        let notifier = WebhookNotifier::new(&config).unwrap();
        assert_eq!(notifier.method, Method::PUT);
    }

    #[test]
    fn test_invalid_method_rejected() {
        let mut config = WebhookConfig::new("test", "https://example.com");
        config.method = "PO ST".to_string();
        let err = WebhookNotifier::new(&config).unwrap_err();
        assert!(matches!(err, NotifierError::InvalidMethod { .. }));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut config = WebhookConfig::new("test", "https://example.com");
        config
            .headers
            .insert("X-Token".to_string(), "line\nbreak".to_string());
        let err = WebhookNotifier::new(&config).unwrap_err();
        assert!(matches!(err, NotifierError::InvalidHeader { ref header, .. } if header == "X-Token"));
    }

    #[test]
    fn test_zero_timeout_and_delay_rejected() {
        let mut config = WebhookConfig::new("test", "https://example.com");
        config.timeout_secs = 0;
        let err = WebhookNotifier::new(&config).unwrap_err();
        assert!(matches!(err, NotifierError::ZeroSetting { setting: "timeout_secs", .. }));

        let mut config = WebhookConfig::new("test", "https://example.com");
        config.retry_delay_ms = 0;
        let err = WebhookNotifier::new(&config).unwrap_err();
        assert!(matches!(err, NotifierError::ZeroSetting { setting: "retry_delay_ms", .. }));
        assert_eq!(err.to_string(), "test: retry_delay_ms must be greater than zero");
    }

    #[test]
    fn test_illegal_templates_rejected() {
        for field in ["template", "warning_template", "error_template"] {
            let mut config = WebhookConfig::new(field, "https://example.com");
            let illegal = Some("{{backup.name".to_string());
            match field {
                "template" => config.template = illegal,
                "warning_template" => config.warning_template = illegal,
                _ => config.error_template = illegal,
            }
            let err = WebhookNotifier::new(&config).unwrap_err();
            assert!(matches!(err, NotifierError::Template { .. }), "{}", field);
        }
    }

    #[test]
    fn test_specific_template_preferred() {
        let mut config = WebhookConfig::new("test", "https://example.com");
        config.template = Some("unified:{{type}}".to_string());
        config.warning_template = Some("warning:{{backup.name}}".to_string());
        let mut notifier = WebhookNotifier::new(&config).unwrap();

        let warning = Message::Warning(Backup::new("w", BackupPhase::PartiallyFailed));
        notifier.render(&warning).unwrap();
        assert_eq!(notifier.buffer, b"warning:w");

        let error = Message::Error(Backup::new("e", BackupPhase::Failed));
        notifier.render(&error).unwrap();
        assert_eq!(notifier.buffer, b"unified:error");
    }
}
