//! Configuration type definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Root configuration document.
///
/// Client and rule entries stay as raw values here: they are validated
/// field-by-field against their schema before being turned into typed
/// structures, so that errors can name the offending client or rule.
#[derive(Debug, Clone)]
pub struct Config {
    /// Client id -> raw client object.
    pub clients: BTreeMap<String, Value>,
    /// Raw rule objects, in evaluation order.
    pub rules: Vec<Value>,
    pub logging: Option<LoggingConfig>,
}

/// A forwarding rule as written in the document.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RuleConfig {
    pub from: String,
    pub send_to: String,
    /// Forward only messages from these nicknames.
    pub nicknames: Option<Vec<String>>,
    /// Never forward messages from these nicknames.
    pub ignore_nicknames: Option<Vec<String>>,
    /// Forward only messages whose text matches this pattern.
    pub regexp: Option<String>,
}

/// Optional `logging` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Name attached to every log line of this relay instance.
    pub title: Option<String>,
    pub level: Option<LogLevel>,
    pub handlers: Option<LogHandlers>,
}

/// Either a filter directive (`info`, `chatrelay=debug,warn`) or a numeric
/// severity threshold (10 debug, 20 info, 30 warning, 40 error, 50 critical).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LogLevel {
    Numeric(u64),
    Directive(String),
}

impl LogLevel {
    /// The equivalent tracing filter directive.
    pub fn directive(&self) -> String {
        match self {
            LogLevel::Directive(directive) => directive.clone(),
            LogLevel::Numeric(level) => match level {
                0 => "trace",
                1..=10 => "debug",
                11..=20 => "info",
                21..=30 => "warn",
                31..=50 => "error",
                _ => "off",
            }
            .to_string(),
        }
    }
}

/// Log sinks. A sink is switched on by naming it, so `stdout:` with no value
/// enables stdout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogHandlers {
    #[serde(default, deserialize_with = "enabled_when_present")]
    pub stdout: Option<bool>,
    /// Append logs to this file.
    pub file: Option<PathBuf>,
}

fn enabled_when_present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    Ok(Some(Option::<bool>::deserialize(deserializer)?.unwrap_or(true)))
}

impl LogHandlers {
    /// Stdout stays on unless explicitly disabled or replaced by a file.
    pub fn stdout_enabled(&self) -> bool {
        self.stdout.unwrap_or(self.file.is_none())
    }
}
