//! Error types for the relay.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Slack Web API errors.
///
/// Recovery policy lives at the call site: the poll loop backs off on a
/// failed history fetch, skips a message whose re-fetch failed, and skips
/// a target whose post failed.
#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("Slack {method} request failed: {reason}")]
    Http { method: String, reason: String },

    #[error("Slack {method} returned an error: {reason}")]
    Api { method: String, reason: String },
}
