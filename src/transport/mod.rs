//! Pluggable chat-network transports.
//!
//! ## Module Structure
//!
//! - `kinds`: static kind-name -> factory registry
//! - `irc`: stateful IRC session over TCP/TLS
//! - `gitter`: Gitter REST API with one streaming request per room
//! - `telegram`: Telegram bot API with a long-poll loop
//!
//! Every transport is a `SessionTransport` around a kind-specific `Session`.
//! `Transport::send` only enqueues; the session task drains the queue while
//! connected and `supervise` reconnects it with exponential backoff.

pub mod gitter;
pub mod irc;
pub mod kinds;
pub mod telegram;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backon::BackoffBuilder;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::bridge::bus::Emitter;
use crate::bridge::template::MessageTemplate;
use crate::common::{ConfigError, FieldError, OutboundSend, TransportError, TransportResult};
use crate::config::schema::{validate_object, FieldSpec};

pub use kinds::TransportKinds;

/// Everything a transport needs to start its session task.
pub struct ConnectContext {
    /// Where decoded inbound messages are published.
    pub emitter: Emitter,
    /// Flips to `true` when the process shuts down.
    pub shutdown: watch::Receiver<bool>,
}

/// One live connection to one chat network.
pub trait Transport: Send + Sync {
    fn client_id(&self) -> &str;

    /// Transport kind name as used in the `transport` config field.
    fn kind(&self) -> &'static str;

    /// Template used to render messages sent through this transport.
    fn template(&self) -> &MessageTemplate;

    /// Spawn the session task. Succeeds at most once per instance.
    fn connect(&self, ctx: ConnectContext) -> TransportResult<JoinHandle<()>>;

    /// Queue `text` for delivery to `channel`. Never blocks, never reports back.
    fn send(&self, channel: &str, text: String);
}

/// Constructor and schema for one transport kind.
pub trait TransportFactory: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Allowed client fields, including `transport` and `msg_template`.
    fn fields(&self) -> &'static [FieldSpec];

    /// Static check of a client object; does not touch the network.
    fn validate(&self, config: &Value) -> Result<(), Vec<FieldError>> {
        let errors = validate_object(config, self.fields());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Instantiate a transport from a client object that passed `validate`.
    fn build(&self, client_id: &str, config: &Value) -> Result<Arc<dyn Transport>, ConfigError>;
}

/// How a session run ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested; do not reconnect.
    Shutdown,
    /// The remote side closed an established session; reconnect.
    Disconnected,
}

/// Receiving end of a transport's outbound queue.
pub type OutboxReceiver = mpsc::UnboundedReceiver<OutboundSend>;

/// A kind-specific network session, run repeatedly by `supervise`.
pub trait Session: Send {
    /// Establish the session and serve it until it ends.
    ///
    /// Queued sends are read from `outbox` while the session is up.
    fn run(
        &mut self,
        outbox: &mut OutboxReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> impl Future<Output = TransportResult<SessionEnd>> + Send;
}

/// Typed per-kind client configuration that knows how to open sessions.
pub trait SessionConfig: DeserializeOwned + Send + Sync + 'static {
    type Session: Session + 'static;

    fn new_session(config: Arc<Self>, client_id: &str, emitter: Emitter) -> Self::Session;
}

/// Outbound queue shared by `send` and the session task.
#[derive(Debug)]
pub struct Outbox {
    client_id: String,
    tx: mpsc::UnboundedSender<OutboundSend>,
    rx: Mutex<Option<OutboxReceiver>>,
}

impl Outbox {
    pub fn new(client_id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            client_id: client_id.into(),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub fn push(&self, channel: &str, text: String) {
        let send = OutboundSend {
            target_client_id: self.client_id.clone(),
            target_channel: channel.to_string(),
            rendered_text: text,
        };
        if self.tx.send(send).is_err() {
            debug!(client_id = %self.client_id, channel, "Transport stopped, dropping outbound message");
        }
    }

    /// Take the receiver; `None` if it was already taken.
    pub fn take(&self) -> Option<OutboxReceiver> {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Generic transport around a kind-specific session.
pub struct SessionTransport<C: SessionConfig> {
    client_id: String,
    kind: &'static str,
    config: Arc<C>,
    template: MessageTemplate,
    outbox: Outbox,
}

impl<C: SessionConfig> SessionTransport<C> {
    pub fn new(client_id: &str, kind: &'static str, config: C, template: MessageTemplate) -> Self {
        Self {
            client_id: client_id.to_string(),
            kind,
            config: Arc::new(config),
            template,
            outbox: Outbox::new(client_id),
        }
    }

    /// Deserialize a validated client object into a transport.
    ///
    /// `msg_template` overrides `default_template` when present.
    pub fn from_value(
        client_id: &str,
        kind: &'static str,
        value: &Value,
        default_template: &str,
    ) -> Result<Self, ConfigError> {
        let config: C =
            serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidClient {
                client_id: client_id.to_string(),
                errors: vec![FieldError::new("<root>", e.to_string())],
            })?;
        let template = value
            .get("msg_template")
            .and_then(Value::as_str)
            .map(MessageTemplate::new)
            .unwrap_or_else(|| MessageTemplate::new(default_template));
        Ok(Self::new(client_id, kind, config, template))
    }
}

impl<C: SessionConfig> Transport for SessionTransport<C> {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn kind(&self) -> &'static str {
        self.kind
    }

    fn template(&self) -> &MessageTemplate {
        &self.template
    }

    fn connect(&self, ctx: ConnectContext) -> TransportResult<JoinHandle<()>> {
        let outbox = self.outbox.take().ok_or_else(|| TransportError::AlreadyConnected {
            client_id: self.client_id.clone(),
        })?;
        info!("[{}] Connecting...", self.client_id);
        debug!("[{}] Outgoing message template: {}", self.client_id, self.template.as_str());
        let session = C::new_session(Arc::clone(&self.config), &self.client_id, ctx.emitter);
        Ok(tokio::spawn(
            supervise(self.client_id.clone(), session, outbox, ctx.shutdown).in_current_span(),
        ))
    }

    fn send(&self, channel: &str, text: String) {
        self.outbox.push(channel, text);
    }
}

/// Create an exponential backoff iterator for reconnection.
/// 2s initial, 5min max, factor 2, with jitter, unlimited retries.
pub fn reconnect_backoff() -> impl Iterator<Item = Duration> + Send {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(2))
        .with_max_delay(Duration::from_secs(300))
        .with_factor(2.0)
        .with_jitter()
        .without_max_times()
        .build()
}

/// Run `session` until shutdown or a permanent failure, reconnecting with backoff.
///
/// Sends queued while disconnected are dropped rather than replayed later.
pub async fn supervise<S: Session>(
    client_id: String,
    mut session: S,
    mut outbox: OutboxReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = reconnect_backoff();

    loop {
        if *shutdown.borrow() {
            break;
        }

        match session.run(&mut outbox, &mut shutdown).await {
            Ok(SessionEnd::Shutdown) => {
                info!("[{}] Session closed", client_id);
                break;
            }
            Ok(SessionEnd::Disconnected) => {
                warn!("[{}] Disconnected", client_id);
                backoff = reconnect_backoff();
            }
            Err(e) if e.is_permanent() => {
                error!("[{}] {} - giving up, transport stays disconnected", client_id, e);
                break;
            }
            Err(e) => error!("[{}] Session error: {}", client_id, e),
        }

        let delay = backoff.next().unwrap_or(Duration::from_secs(300));
        info!("[{}] Reconnecting in {:.1} seconds...", client_id, delay.as_secs_f64());

        if !wait_before_reconnect(&client_id, delay, &mut outbox, &mut shutdown).await {
            break;
        }
    }

    debug!("[{}] Transport task ended", client_id);
}

/// Sleep for `delay`, discarding queued sends. Returns false on shutdown.
async fn wait_before_reconnect(
    client_id: &str,
    delay: Duration,
    outbox: &mut OutboxReceiver,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("[{}] Shutdown signal received during backoff", client_id);
                    return false;
                }
            }
            Some(send) = outbox.recv() => {
                warn!(
                    "[{}] Not connected, dropping message for {}",
                    client_id, send.target_channel
                );
            }
        }
    }
}
