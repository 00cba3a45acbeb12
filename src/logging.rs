//! Tracing subscriber setup from the `logging` config section.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::{info_span, Span};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::common::ConfigError;
use crate::config::{LogHandlers, LogLevel, LoggingConfig};

const DEFAULT_LEVEL: &str = "info";

const DEFAULT_TITLE: &str = "chatrelay";

/// Build the level filter. A non-empty `RUST_LOG` wins over the configured level.
fn env_filter(level: Option<String>, rust_log: Option<String>) -> Result<EnvFilter, ConfigError> {
    let directive = rust_log
        .filter(|v| !v.trim().is_empty())
        .or(level)
        .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
    EnvFilter::try_new(&directive).map_err(|e| ConfigError::Logging {
        message: format!("invalid level '{}': {}", directive, e),
    })
}

/// Install the global subscriber.
pub fn init(config: Option<&LoggingConfig>) -> Result<(), ConfigError> {
    let level = config.and_then(|c| c.level.as_ref()).map(LogLevel::directive);
    let filter = env_filter(level, std::env::var("RUST_LOG").ok())?;

    let handlers = config
        .and_then(|c| c.handlers.clone())
        .unwrap_or_default();

    let file_layer = match open_log_file(&handlers)? {
        Some(file) => Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false)),
        None => None,
    };
    let stdout_layer = handlers.stdout_enabled().then(fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfigError::Logging {
            message: e.to_string(),
        })
}

/// Span carrying the instance title. Everything the relay runs is entered
/// under it.
pub fn root_span(config: Option<&LoggingConfig>) -> Span {
    let title = config
        .and_then(|c| c.title.as_deref())
        .unwrap_or(DEFAULT_TITLE);
    info_span!("relay", title = %title)
}

fn open_log_file(handlers: &LogHandlers) -> Result<Option<std::fs::File>, ConfigError> {
    let Some(ref path) = handlers.file else {
        return Ok(None);
    };
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(Some)
        .map_err(|e| ConfigError::Logging {
            message: format!("cannot open log file '{}': {}", path.display(), e),
        })
}
