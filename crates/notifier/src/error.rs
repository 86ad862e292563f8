use thiserror::Error;

/// Errors raised while constructing a notifier or the pipeline.
///
/// All of them are configuration problems: they abort startup and are never
/// produced while messages are being delivered.
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("{name}: invalid URL '{url}': {reason}")]
    InvalidUrl {
        name: String,
        url: String,
        reason: String,
    },

    #[error("{name}: invalid HTTP method '{method}'")]
    InvalidMethod { name: String, method: String },

    #[error("{name}: invalid header '{header}'")]
    InvalidHeader { name: String, header: String },

    #[error("{name}: {setting} must be greater than zero")]
    ZeroSetting { name: String, setting: &'static str },

    #[error("{name}: compiling template: {source}")]
    Template {
        name: String,
        #[source]
        source: handlebars::TemplateError,
    },

    #[error("{name}: building HTTP client: {source}")]
    HttpClient {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("opsgenie: missing API key")]
    MissingApiKey,

    #[error("opsgenie: API key is not a valid UUID")]
    InvalidApiKey,
}
