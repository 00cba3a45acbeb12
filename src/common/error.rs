//! Error types for the application.

use std::fmt;

use thiserror::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path of the offending field (e.g. `port`, `channels[2]`).
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}': {}", self.field, self.message)
    }
}

/// Configuration-related errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}. It doesn't look like valid YAML or JSON")]
    ParseError { message: String },

    #[error("Missing required section '{section}'")]
    MissingSection { section: &'static str },

    #[error("Client '{client_id}' does not specify a transport")]
    MissingTransport { client_id: String },

    #[error("Client '{client_id}' uses unknown transport '{kind}' (known: {known})")]
    UnknownTransport {
        client_id: String,
        kind: String,
        known: String,
    },

    #[error("Client '{client_id}' is invalid:\n{}", join_fields(.errors))]
    InvalidClient {
        client_id: String,
        errors: Vec<FieldError>,
    },

    #[error("Rule #{index} is invalid:\n{}", join_fields(.errors))]
    InvalidRule {
        index: usize,
        errors: Vec<FieldError>,
    },

    #[error("Invalid logging configuration: {message}")]
    Logging { message: String },

    #[error("Config validation failed:\n{}", join_errors(.0))]
    Multiple(Vec<ConfigError>),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transport session errors. These are logged by the session task and never
/// reach the router.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport '{client_id}' is already connected")]
    AlreadyConnected { client_id: String },

    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection timeout")]
    Timeout,

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("TLS error: {message}")]
    Tls { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("API rejected request: {description}")]
    Api { description: String },

    #[error("Request failed: {message}")]
    Request { message: String },

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// Request URLs may carry credentials, so they never reach the logs.
impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        TransportError::Http(error.without_url())
    }
}

impl TransportError {
    /// Permanent errors stop the session instead of scheduling a reconnect.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::Api { .. })
    }
}

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
