//! In-process hand-off from transports to the router.
//!
//! Every transport publishes through its own `Emitter`; the router task is the
//! only consumer of the `BusReceiver`. The channel is unbounded so publishing
//! never suspends a transport's receive loop.

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::common::InboundMessage;

/// Publishing side of the bus.
#[derive(Debug, Clone)]
pub struct MessageBus {
    tx: mpsc::UnboundedSender<InboundMessage>,
}

/// Consuming side of the bus, owned by the router.
#[derive(Debug)]
pub struct BusReceiver {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl MessageBus {
    pub fn new() -> (MessageBus, BusReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MessageBus { tx }, BusReceiver { rx })
    }

    /// Publish a message. Messages published after the router stopped are dropped.
    pub fn publish(&self, msg: InboundMessage) {
        if let Err(e) = self.tx.send(msg) {
            debug!("Message bus closed, dropping message from {}", e.0.origin_client_id);
        }
    }

    /// Build the emitter handed to the transport registered as `client_id`.
    pub fn emitter(&self, client_id: impl Into<String>) -> Emitter {
        Emitter {
            client_id: Arc::from(client_id.into()),
            bus: self.clone(),
            identity: Arc::new(RwLock::new(None)),
        }
    }
}

impl BusReceiver {
    /// Receive the next message; `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}

/// A transport's emission handle.
///
/// Knows the transport's client id and, once connected, the identity it is
/// logged in as. Messages authored by that identity are dropped here so a
/// transport never re-publishes what the relay itself just sent.
#[derive(Debug, Clone)]
pub struct Emitter {
    client_id: Arc<str>,
    bus: MessageBus,
    identity: Arc<RwLock<Option<String>>>,
}

impl Emitter {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Record the identity the session is connected as.
    pub fn set_identity(&self, identity: impl Into<String>) {
        let mut guard = self.identity.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(identity.into());
    }

    pub fn identity(&self) -> Option<String> {
        self.identity.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_self(&self, author: &str) -> bool {
        self.identity().as_deref() == Some(author)
    }

    /// Publish a decoded inbound message unless we authored it.
    ///
    /// Returns whether the message was published.
    pub fn emit(&self, channel: &str, author: &str, text: &str) -> bool {
        if self.is_self(author) {
            trace!(client_id = %self.client_id, channel, "Ignoring own message");
            return false;
        }
        self.bus
            .publish(InboundMessage::new(&*self.client_id, channel, author, text));
        true
    }
}
