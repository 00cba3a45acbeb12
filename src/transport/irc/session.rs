//! IRC session: connect, register, serve.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::bridge::bus::Emitter;
use crate::common::{TransportError, TransportResult};
use crate::transport::irc::codec::IrcCodec;
use crate::transport::irc::message::{is_channel, privmsgs, IrcMessage};
use crate::transport::irc::IrcConfig;
use crate::transport::{OutboxReceiver, Session, SessionEnd};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);
const QUIT_MESSAGE: &str = "Relay shutting down";

const RPL_WELCOME: &str = "001";
const ERR_NICKNAMEINUSE: &str = "433";

type IrcConnection<S> = Framed<S, IrcCodec>;

pub struct IrcSession {
    client_id: String,
    config: Arc<IrcConfig>,
    emitter: Emitter,
}

/// Per-connection registration state.
struct Registration {
    nickname: String,
    welcomed: bool,
}

impl IrcSession {
    pub fn new(client_id: &str, config: Arc<IrcConfig>, emitter: Emitter) -> Self {
        Self {
            client_id: client_id.to_string(),
            config,
            emitter,
        }
    }

    /// Serve an established byte stream until it closes or shutdown is requested.
    pub(crate) async fn serve<S>(
        &self,
        stream: S,
        outbox: &mut OutboxReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> TransportResult<SessionEnd>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut conn = Framed::new(stream, IrcCodec::new());
        let mut state = Registration {
            nickname: self.config.nickname.clone(),
            welcomed: false,
        };

        for msg in self.registration() {
            conn.send(msg).await?;
        }

        let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        if let Err(e) = conn.send(IrcMessage::quit(QUIT_MESSAGE)).await {
                            debug!("[{}] Failed to send QUIT: {}", self.client_id, e);
                        }
                        return Ok(SessionEnd::Shutdown);
                    }
                }

                frame = conn.next() => match frame {
                    Some(Ok(msg)) => {
                        last_seen = Instant::now();
                        self.handle(&mut conn, &mut state, msg).await?;
                    }
                    Some(Err(e)) => return Err(e),
                    None if state.welcomed => return Ok(SessionEnd::Disconnected),
                    None => return Err(TransportError::ConnectionClosed),
                },

                Some(send) = outbox.recv(), if state.welcomed => {
                    for msg in privmsgs(&send.target_channel, &send.rendered_text) {
                        conn.send(msg).await?;
                    }
                }

                _ = keepalive.tick() => {
                    if last_seen.elapsed() > KEEPALIVE_INTERVAL * 2 {
                        return Err(TransportError::Timeout);
                    }
                    conn.send(IrcMessage::ping(&self.config.server)).await?;
                }
            }
        }
    }

    fn registration(&self) -> Vec<IrcMessage> {
        let config = &self.config;
        let mut lines = Vec::with_capacity(3);
        if let Some(ref password) = config.password {
            lines.push(IrcMessage::pass(password));
        }
        lines.push(IrcMessage::nick(&config.nickname));
        lines.push(IrcMessage::user(
            config.ident.as_deref().unwrap_or(&config.nickname),
            config.realname.as_deref().unwrap_or(&config.nickname),
        ));
        lines
    }

    async fn handle<S>(
        &self,
        conn: &mut IrcConnection<S>,
        state: &mut Registration,
        msg: IrcMessage,
    ) -> TransportResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match msg.command.as_str() {
            "PING" => conn.send(IrcMessage::pong(&msg)).await?,
            RPL_WELCOME => {
                if let Some(nick) = msg.params.first() {
                    state.nickname = nick.clone();
                }
                state.welcomed = true;
                self.emitter.set_identity(state.nickname.as_str());
                info!("[{}] Connected as {}", self.client_id, state.nickname);

                if !self.config.channels.is_empty() {
                    info!("[{}] Joining {}", self.client_id, self.config.channels.join(", "));
                    conn.send(IrcMessage::join(&self.config.channels)).await?;
                }
            }
            ERR_NICKNAMEINUSE if !state.welcomed => {
                state.nickname.push('_');
                warn!("[{}] Nickname in use, trying {}", self.client_id, state.nickname);
                conn.send(IrcMessage::nick(&state.nickname)).await?;
            }
            "NICK" => {
                if msg.source_nick() == Some(state.nickname.as_str()) {
                    if let Some(new_nick) = msg.params.first() {
                        state.nickname = new_nick.clone();
                        self.emitter.set_identity(state.nickname.as_str());
                    }
                }
            }
            "PRIVMSG" => self.on_privmsg(&msg),
            "ERROR" => {
                let reason = msg.params.last().cloned().unwrap_or_default();
                return Err(TransportError::Protocol {
                    message: format!("server closed the link: {}", reason),
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn on_privmsg(&self, msg: &IrcMessage) {
        let (Some(target), Some(text), Some(author)) =
            (msg.params.first(), msg.params.get(1), msg.source_nick())
        else {
            return;
        };
        // CTCP requests and private queries are not relayed
        if !is_channel(target) || text.starts_with('\x01') {
            return;
        }
        self.emitter.emit(target, author, text);
    }
}

impl Session for IrcSession {
    async fn run(
        &mut self,
        outbox: &mut OutboxReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> TransportResult<SessionEnd> {
        let host = self.config.server.clone();
        let port = self.config.port;

        let tcp = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|source| TransportError::ConnectFailed {
                host: host.clone(),
                port,
                source,
            })?;
        debug!("[{}] TCP connection established to {}:{}", self.client_id, host, port);

        if self.config.use_ssl {
            let tls = tls_connect(&host, tcp).await?;
            self.serve(tls, outbox, shutdown).await
        } else {
            self.serve(tcp, outbox, shutdown).await
        }
    }
}

async fn tls_connect(
    host: &str,
    tcp: TcpStream,
) -> TransportResult<tokio_rustls::client::TlsStream<TcpStream>> {
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        warn!("Failed to load a native root certificate: {}", e);
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!(added, ignored, "Loaded native root certificates");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls {
            message: e.to_string(),
        })?
        .with_root_certificates(roots)
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string()).map_err(|e| TransportError::Tls {
        message: format!("invalid server name '{}': {}", host, e),
    })?;

    TlsConnector::from(Arc::new(config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| TransportError::Tls {
            message: e.to_string(),
        })
}
