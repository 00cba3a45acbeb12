//! Configuration document parsing (YAML or JSON).

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::common::ConfigError;
use crate::config::types::{Config, LoggingConfig};

/// Load configuration from a YAML or JSON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
        path: path.display().to_string(),
        source,
    })?;

    load_config_str(&content)
}

/// Load configuration from a YAML or JSON string.
///
/// JSON is accepted as-is since every JSON document is also valid YAML.
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    let document: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;

    let Value::Object(mut root) = document else {
        return Err(ConfigError::ParseError {
            message: "the top level must be a mapping".to_string(),
        });
    };

    let clients = root
        .remove("clients")
        .ok_or(ConfigError::MissingSection { section: "clients" })?;
    let rules = root
        .remove("rules")
        .ok_or(ConfigError::MissingSection { section: "rules" })?;

    let clients: BTreeMap<String, Value> =
        serde_json::from_value(clients).map_err(|e| ConfigError::ParseError {
            message: format!("'clients' must map client ids to objects: {}", e),
        })?;
    let rules: Vec<Value> = serde_json::from_value(rules).map_err(|e| ConfigError::ParseError {
        message: format!("'rules' must be a list: {}", e),
    })?;

    let logging = match root.remove("logging") {
        None | Some(Value::Null) => None,
        Some(value) => Some(serde_json::from_value::<LoggingConfig>(value).map_err(|e| {
            ConfigError::Logging {
                message: e.to_string(),
            }
        })?),
    };

    Ok(Config {
        clients,
        rules,
        logging,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r##"
clients:
  IRC:
    transport: irc
    server: irc.libera.chat
    port: 6697
    use_ssl: true
    nickname: relay-bot
    channels: ["#a"]
  Gitter:
    transport: gitter
    token: secret
rules:
  - from: "#a@IRC"
    send_to: "room/b@Gitter"
    ignore_nicknames: [bot2]
logging:
  level: debug
"##;

    #[test]
    fn test_load_yaml() {
        let config = load_config_str(YAML).unwrap();
        assert_eq!(config.clients.len(), 2);
        assert_eq!(config.clients["IRC"]["port"], 6697);
        assert_eq!(config.clients["IRC"]["use_ssl"], true);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0]["send_to"], "room/b@Gitter");
        assert_eq!(
            config.logging.unwrap().level,
            Some(crate::config::LogLevel::Directive("debug".to_string()))
        );
    }

    #[test]
    fn test_load_numeric_logging_section() {
        let doc = "clients: {}\nrules: []\nlogging:\n  title: forwarder\n  level: 20\n  handlers:\n    stdout:\n    file: /tmp/f.log\n";
        let logging = load_config_str(doc).unwrap().logging.unwrap();
        assert_eq!(logging.title.as_deref(), Some("forwarder"));
        assert_eq!(logging.level.unwrap().directive(), "info");
        let handlers = logging.handlers.unwrap();
        assert_eq!(handlers.stdout, Some(true));
        assert_eq!(handlers.file.unwrap().to_str(), Some("/tmp/f.log"));
    }

    #[test]
    fn test_load_json() {
        let json = r##"{"clients": {"TG": {"transport": "telegram", "token": "t"}},
                       "rules": [{"from": "x@TG", "send_to": "y@TG"}]}"##;
        let config = load_config_str(json).unwrap();
        assert_eq!(config.clients["TG"]["transport"], "telegram");
        assert_eq!(config.rules.len(), 1);
        assert!(config.logging.is_none());
    }

    #[test]
    fn test_missing_clients_section() {
        let err = load_config_str("rules: []").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection { section: "clients" }));
    }

    #[test]
    fn test_missing_rules_section() {
        let err = load_config_str("clients: {}").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection { section: "rules" }));
    }

    #[test]
    fn test_invalid_document() {
        let err = load_config_str("clients: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));

        let err = load_config_str("- just\n- a list\n").unwrap_err();
        assert!(err.to_string().contains("top level"));
    }

    #[test]
    fn test_rules_must_be_a_list() {
        let err = load_config_str("clients: {}\nrules: {a: 1}\n").unwrap_err();
        assert!(err.to_string().contains("'rules' must be a list"));
    }

    #[test]
    fn test_unknown_logging_key_rejected() {
        let err = load_config_str("clients: {}\nrules: []\nlogging: {colour: red}\n").unwrap_err();
        assert!(matches!(err, ConfigError::Logging { .. }));
    }

    #[test]
    fn test_unreadable_file() {
        let err = load_config("/nonexistent/chatrelay.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/chatrelay.yaml"));
    }
}
