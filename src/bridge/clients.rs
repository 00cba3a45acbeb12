//! Configured clients and their live transports.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::bridge::bus::MessageBus;
use crate::common::ConfigError;
use crate::transport::{ConnectContext, Transport, TransportKinds};

/// Client id -> transport. Built once at startup and read-only afterwards.
#[derive(Default)]
pub struct ClientRegistry {
    clients: BTreeMap<String, Arc<dyn Transport>>,
}

impl ClientRegistry {
    /// Validate and instantiate every configured client.
    ///
    /// Problems with all clients are collected before failing, so the operator
    /// sees every error at once. Nothing here touches the network.
    pub fn build(configs: &BTreeMap<String, Value>, kinds: &TransportKinds) -> Result<Self, ConfigError> {
        let mut transports = Vec::with_capacity(configs.len());
        let mut failures = Vec::new();

        for (client_id, config) in configs {
            match build_client(client_id, config, kinds) {
                Ok(transport) => transports.push(transport),
                Err(e) => failures.push(e),
            }
        }

        match failures.len() {
            0 => {
                let registry = Self::from_transports(transports);
                info!(
                    "Configured {} client(s): {}",
                    registry.len(),
                    registry.ids().collect::<Vec<_>>().join(", ")
                );
                Ok(registry)
            }
            1 => Err(failures.remove(0)),
            _ => Err(ConfigError::Multiple(failures)),
        }
    }

    /// Registry over already-built transports.
    pub fn from_transports(transports: impl IntoIterator<Item = Arc<dyn Transport>>) -> Self {
        let clients = transports
            .into_iter()
            .map(|t| (t.client_id().to_string(), t))
            .collect();
        Self { clients }
    }

    pub fn get(&self, client_id: &str) -> Option<&Arc<dyn Transport>> {
        self.clients.get(client_id)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    /// Start every transport's session task.
    pub fn connect_all(&self, bus: &MessageBus, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.clients.len());
        for (client_id, transport) in &self.clients {
            let ctx = ConnectContext {
                emitter: bus.emitter(client_id.as_str()),
                shutdown: shutdown.clone(),
            };
            match transport.connect(ctx) {
                Ok(handle) => handles.push(handle),
                Err(e) => error!("[{}] {}", client_id, e),
            }
        }
        handles
    }
}

fn build_client(client_id: &str, config: &Value, kinds: &TransportKinds) -> Result<Arc<dyn Transport>, ConfigError> {
    let kind = config
        .get("transport")
        .and_then(Value::as_str)
        .ok_or_else(|| ConfigError::MissingTransport {
            client_id: client_id.to_string(),
        })?;

    let factory = kinds.get(kind).ok_or_else(|| ConfigError::UnknownTransport {
        client_id: client_id.to_string(),
        kind: kind.to_string(),
        known: kinds.names().join(", "),
    })?;

    factory
        .validate(config)
        .map_err(|errors| ConfigError::InvalidClient {
            client_id: client_id.to_string(),
            errors,
        })?;

    factory.build(client_id, config)
}
