//! Payload templates.
//!
//! Templates are Handlebars, compiled once when a notifier is built and
//! rendered in strict mode, so referencing a field that does not exist is a
//! render error instead of an empty string.
//!
//! Render context:
//! - `type`: "warning" | "error"
//! - `message`: one-line summary, e.g. "nightly is in state Failed"
//! - `timestamp`: RFC 3339 time of rendering
//! - `backup.name`, `backup.namespace`, `backup.phase`
//! - `backup.labels`, `backup.annotations`
//!
//! `{{value}}` is escaped for use inside a JSON string literal;
//! `{{{value}}}` writes it unchanged.

use std::collections::BTreeMap;

use chrono::Utc;
use handlebars::{Handlebars, TemplateError, handlebars_helper};
use serde::Serialize;

use sentinel_common::types::{BackupPhase, Message, Severity};

use crate::retry::DeliveryError;

/// Used when a channel does not configure a template of its own.
pub const DEFAULT_TEMPLATE: &str = r#"{
    "type": "{{type}}",
    "backup": {
        "name": "{{backup.name}}",
        "state": "{{backup.phase}}"
    }
}
"#;

/// Attachment color for warnings in the Slack partial.
pub const WARNING_COLOR: &str = "#ebab34";

/// Attachment color for errors in the Slack partial.
pub const ERROR_COLOR: &str = "#eb4634";

/// Slack incoming-webhook payload, available to every template as `{{> slack}}`.
pub const SLACK_PARTIAL: &str = r##"{
    "text": "<!channel> Velero *{{upper type}}*",
    "attachments": [
        {
            "color": "{{#if (eq type "warning")}}#ebab34{{else}}#eb4634{{/if}}",
            "text": "Backup '{{backup.name}}' is in state '{{backup.phase}}'"
        }
    ]
}
"##;

const MAIN: &str = "main";

handlebars_helper!(upper: |s: String| s.to_uppercase());
handlebars_helper!(lower: |s: String| s.to_lowercase());
// Emits JSON text; use with triple braces to avoid string escaping.
handlebars_helper!(json: |v: Json| v.to_string());

/// A template compiled together with its helpers and partials.
pub struct CompiledTemplate {
    registry: Handlebars<'static>,
}

impl std::fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTemplate").finish_non_exhaustive()
    }
}

impl CompiledTemplate {
    /// Compile `source`, or `default` when `source` is absent or blank.
    pub fn compile(source: Option<&str>, default: &str) -> Result<Self, TemplateError> {
        let source = source.filter(|s| !s.trim().is_empty()).unwrap_or(default);

        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(escape_json);
        registry.register_helper("upper", Box::new(upper));
        registry.register_helper("lower", Box::new(lower));
        registry.register_helper("json", Box::new(json));
        registry.register_partial("slack", SLACK_PARTIAL)?;
        registry.register_template_string(MAIN, source)?;

        Ok(Self { registry })
    }

    /// Render `message` into `out`, appending to whatever it already holds.
    pub fn render_into(&self, message: &Message, out: &mut Vec<u8>) -> Result<(), DeliveryError> {
        let context = RenderContext::new(message);
        self.registry
            .render_to_write(MAIN, &context, out)
            .map_err(DeliveryError::Render)
    }

    pub fn render(&self, message: &Message) -> Result<Vec<u8>, DeliveryError> {
        let mut out = Vec::new();
        self.render_into(message, &mut out)?;
        Ok(out)
    }
}

#[derive(Serialize)]
struct RenderContext<'a> {
    #[serde(rename = "type")]
    kind: Severity,
    message: String,
    timestamp: String,
    backup: BackupContext<'a>,
}

#[derive(Serialize)]
struct BackupContext<'a> {
    name: &'a str,
    namespace: Option<&'a str>,
    phase: BackupPhase,
    labels: &'a BTreeMap<String, String>,
    annotations: &'a BTreeMap<String, String>,
}

impl<'a> RenderContext<'a> {
    fn new(message: &'a Message) -> Self {
        let backup = message.backup();
        Self {
            kind: message.severity(),
            message: message.summary(),
            timestamp: Utc::now().to_rfc3339(),
            backup: BackupContext {
                name: backup.name(),
                namespace: backup.metadata.namespace.as_deref(),
                phase: backup.phase(),
                labels: &backup.metadata.labels,
                annotations: &backup.metadata.annotations,
            },
        }
    }
}

/// Escape `data` so it can sit between the quotes of a JSON string.
fn escape_json(data: &str) -> String {
    let mut escaped = String::with_capacity(data.len());
    for c in data.chars() {
        match c {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() => escaped.push_str(&format!("\\u{:04x}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}
