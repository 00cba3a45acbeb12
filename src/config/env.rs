//! Environment variable overrides for client secrets.
//!
//! Secrets can be kept out of the config file:
//! - `CHATRELAY_<CLIENT>_TOKEN` - replaces the client's `token`
//! - `CHATRELAY_<CLIENT>_PASSWORD` - replaces the client's `password`
//!
//! `<CLIENT>` is the client id upper-cased, with every character that is not
//! an ASCII letter or digit replaced by `_` (so `my-irc` becomes `MY_IRC`).

use std::env;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "CHATRELAY";

/// Client fields that may be overridden from the environment.
const SECRET_FIELDS: &[&str] = &["token", "password"];

/// Variable name holding `field` for `client_id`.
pub fn env_var_name(client_id: &str, field: &str) -> String {
    let client: String = client_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}_{}", ENV_PREFIX, client, field.to_ascii_uppercase())
}

/// Apply environment variable overrides to a config.
///
/// Runs before validation, so an override may also supply a required field
/// that is absent from the file. A field is only set when `declares(kind,
/// field)` says the client's transport kind has it; clients without a string
/// `transport` are left for validation to report.
pub fn apply_env_overrides(mut config: Config, declares: impl Fn(&str, &str) -> bool) -> Config {
    for (client_id, client) in config.clients.iter_mut() {
        let Some(object) = client.as_object_mut() else {
            continue;
        };
        let Some(kind) = object.get("transport").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        for field in SECRET_FIELDS {
            let name = env_var_name(client_id, field);
            if !declares(&kind, field) {
                if env::var_os(&name).is_some() {
                    warn!(client_id = %client_id, "Ignoring {}: '{}' clients have no '{}' field", name, kind, field);
                }
                continue;
            }
            if let Ok(value) = env::var(&name) {
                debug!(client_id = %client_id, field = %field, "Using {} from the environment", name);
                object.insert(field.to_string(), Value::String(value));
            }
        }
    }
    config
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    fn make_test_config() -> Config {
        let mut clients = BTreeMap::new();
        clients.insert(
            "env-test-gitter".to_string(),
            json!({"transport": "gitter", "token": "original_token"}),
        );
        clients.insert(
            "EnvTestIrc".to_string(),
            json!({"transport": "irc", "server": "s", "port": 1, "nickname": "n"}),
        );
        Config {
            clients,
            rules: Vec::new(),
            logging: None,
        }
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("Gitter", "token"), "CHATRELAY_GITTER_TOKEN");
        assert_eq!(env_var_name("my-irc.net", "password"), "CHATRELAY_MY_IRC_NET_PASSWORD");
    }

    /// Gitter has a token, IRC a password.
    fn declares(kind: &str, field: &str) -> bool {
        matches!((kind, field), ("gitter", "token") | ("irc", "password"))
    }

    #[test]
    fn test_apply_env_overrides_no_vars() {
        env::remove_var("CHATRELAY_ENV_TEST_GITTER_TOKEN");

        let result = apply_env_overrides(make_test_config(), declares);
        assert_eq!(result.clients["env-test-gitter"]["token"], "original_token");
    }

    #[test]
    fn test_apply_env_overrides_sets_fields() {
        env::set_var("CHATRELAY_ENVTESTIRC_PASSWORD", "from-env");

        let result = apply_env_overrides(make_test_config(), declares);
        assert_eq!(result.clients["EnvTestIrc"]["password"], "from-env");
        assert!(result.clients["EnvTestIrc"].get("token").is_none());

        env::remove_var("CHATRELAY_ENVTESTIRC_PASSWORD");
    }

    #[test]
    fn test_undeclared_fields_are_not_overridden() {
        let mut config = make_test_config();
        config
            .clients
            .insert("EnvStrayIrc".to_string(), json!({"transport": "irc", "server": "s", "port": 1, "nickname": "n"}));
        config.clients.insert("EnvStrayNoKind".to_string(), json!({"server": "s"}));
        env::set_var("CHATRELAY_ENVSTRAYIRC_TOKEN", "stray");
        env::set_var("CHATRELAY_ENVSTRAYNOKIND_TOKEN", "stray");

        let result = apply_env_overrides(config, declares);
        assert!(result.clients["EnvStrayIrc"].get("token").is_none());
        assert!(result.clients["EnvStrayNoKind"].get("token").is_none());

        env::remove_var("CHATRELAY_ENVSTRAYIRC_TOKEN");
        env::remove_var("CHATRELAY_ENVSTRAYNOKIND_TOKEN");
    }
}
