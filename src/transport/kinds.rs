//! Static registry of transport kinds.
//!
//! Kinds are added by explicit `register` calls at startup; the registry is
//! read-only afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::schema::json_schema;
use crate::transport::gitter::GitterFactory;
use crate::transport::irc::IrcFactory;
use crate::transport::telegram::TelegramFactory;
use crate::transport::TransportFactory;

/// Kind name -> factory.
#[derive(Default)]
pub struct TransportKinds {
    factories: BTreeMap<&'static str, Arc<dyn TransportFactory>>,
}

impl TransportKinds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every transport shipped in this crate.
    pub fn builtin() -> Self {
        let mut kinds = Self::new();
        kinds.register(IrcFactory);
        kinds.register(GitterFactory);
        kinds.register(TelegramFactory);
        kinds
    }

    /// Register a transport kind, replacing any factory of the same name.
    pub fn register(&mut self, factory: impl TransportFactory + 'static) {
        self.factories.insert(factory.kind(), Arc::new(factory));
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn TransportFactory>> {
        self.factories.get(kind)
    }

    /// Whether clients of `kind` accept `field`.
    pub fn declares(&self, kind: &str, field: &str) -> bool {
        self.get(kind)
            .is_some_and(|factory| factory.fields().iter().any(|f| f.name == field))
    }

    /// Registered kind names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    /// JSON-Schema of every registered kind, keyed by kind name.
    pub fn schemas(&self) -> Value {
        let schemas = self
            .factories
            .iter()
            .map(|(name, factory)| (name.to_string(), json_schema(factory.fields())))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(schemas)
    }
}
