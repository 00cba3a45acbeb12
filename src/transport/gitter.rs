//! Gitter transport.
//!
//! REST calls go to `api_url`; every configured room gets its own task reading
//! the newline-delimited JSON stream at `stream_url`. Sends are REST posts made
//! from the session task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::codec::{Decoder, LinesCodec};
use tracing::{debug, error, info, warn, Instrument};

use crate::bridge::bus::Emitter;
use crate::common::{ConfigError, OutboundSend, TransportError, TransportResult};
use crate::config::schema::{FieldSpec, FieldType};
use crate::transport::{
    reconnect_backoff, OutboxReceiver, Session, SessionConfig, SessionEnd, SessionTransport, Transport,
    TransportFactory,
};

pub const KIND: &str = "gitter";

pub const DEFAULT_TEMPLATE: &str = "*[From %client_id]* **%author** : %msg";

const DEFAULT_API_URL: &str = "https://api.gitter.im/v1";
const DEFAULT_STREAM_URL: &str = "https://stream.gitter.im/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest stream line accepted; longer lines fail the stream.
const MAX_STREAM_LINE: usize = 1 << 20;

const FIELDS: &[FieldSpec] = &[
    FieldSpec::required("transport", FieldType::Enum(&[KIND]), "The transport kind."),
    FieldSpec::required("token", FieldType::String, "The token to use for connection."),
    FieldSpec::optional("channels", FieldType::StringList, "The list of rooms to join and listen to."),
    FieldSpec::optional("api_url", FieldType::String, "Base URL of the REST API."),
    FieldSpec::optional("stream_url", FieldType::String, "Base URL of the streaming API."),
    FieldSpec::optional(
        "msg_template",
        FieldType::String,
        "Template for messages sent to this client. Placeholders: %client_id, %author, %msg.",
    ),
];

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_stream_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

/// Typed Gitter client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GitterConfig {
    pub token: Secret<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
}

impl SessionConfig for GitterConfig {
    type Session = GitterSession;

    fn new_session(config: Arc<Self>, client_id: &str, emitter: Emitter) -> GitterSession {
        GitterSession {
            client_id: client_id.to_string(),
            config,
            emitter,
        }
    }
}

pub struct GitterFactory;

impl TransportFactory for GitterFactory {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn build(&self, client_id: &str, config: &Value) -> Result<Arc<dyn Transport>, ConfigError> {
        let transport =
            SessionTransport::<GitterConfig>::from_value(client_id, KIND, config, DEFAULT_TEMPLATE)?;
        Ok(Arc::new(transport))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitterUser {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitterRoom {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "oneToOne")]
    pub one_to_one: bool,
}

#[derive(Debug, Deserialize)]
struct StreamAuthor {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    text: String,
    #[serde(rename = "fromUser")]
    from_user: Option<StreamAuthor>,
}

/// Decode one stream line into `(author, text)`.
///
/// Heartbeats (blank lines), invalid JSON and authorless events yield `None`.
fn parse_stream_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let message: StreamMessage = match serde_json::from_str(line) {
        Ok(m) => m,
        Err(e) => {
            debug!("Skipping undecodable stream line: {}", e);
            return None;
        }
    };
    let author = message.from_user?.username;
    if author.is_empty() {
        return None;
    }
    Some((author, message.text))
}

/// Thin client for the REST and streaming endpoints.
#[derive(Debug, Clone)]
pub struct GitterApi {
    http: reqwest::Client,
    api_url: String,
    stream_url: String,
    token: Secret<String>,
}

impl GitterApi {
    pub fn new(config: &GitterConfig) -> TransportResult<Self> {
        let http = reqwest::Client::builder().connect_timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            stream_url: config.stream_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn get(&self, path: &str) -> TransportResult<Response> {
        let response = self
            .http
            .get(format!("{}/{}", self.api_url, path))
            .bearer_auth(self.token.expose_secret())
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        check_status(response).await
    }

    async fn post(&self, path: &str, body: &Value) -> TransportResult<Response> {
        let response = self
            .http
            .post(format!("{}/{}", self.api_url, path))
            .bearer_auth(self.token.expose_secret())
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }

    /// The user the token belongs to.
    pub async fn current_user(&self) -> TransportResult<GitterUser> {
        let users: Vec<GitterUser> = self.get("user").await?.json().await?;
        users.into_iter().next().ok_or_else(|| TransportError::Protocol {
            message: "user endpoint returned no user".to_string(),
        })
    }

    /// Rooms the user has joined.
    pub async fn rooms(&self) -> TransportResult<Vec<GitterRoom>> {
        Ok(self.get("rooms").await?.json().await?)
    }

    /// Resolve `uri` to a room and add `user_id` to it.
    pub async fn join_room(&self, user_id: &str, uri: &str) -> TransportResult<GitterRoom> {
        let room: GitterRoom = self.post("rooms", &json!({ "uri": uri })).await?.json().await?;
        self.post(&format!("user/{}/rooms", user_id), &json!({ "id": room.id }))
            .await?;
        Ok(room)
    }

    pub async fn send_message(&self, room_id: &str, text: &str) -> TransportResult<()> {
        self.post(&format!("rooms/{}/chatMessages", room_id), &json!({ "text": text }))
            .await?;
        Ok(())
    }

    /// Open the message stream of a room. The request has no overall timeout.
    pub async fn stream(&self, room_id: &str) -> TransportResult<Response> {
        let response = self
            .http
            .get(format!("{}/rooms/{}/chatMessages", self.stream_url, room_id))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;
        check_status(response).await
    }
}

/// Rejected credentials are permanent; any other failure status is retried.
async fn check_status(response: Response) -> TransportResult<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Api {
            description: format!("{} {}", status, body.trim()),
        });
    }
    Ok(response.error_for_status()?)
}

pub struct GitterSession {
    client_id: String,
    config: Arc<GitterConfig>,
    emitter: Emitter,
}

impl GitterSession {
    /// Room name -> id for every configured room we are (now) a member of.
    async fn join_rooms(&self, api: &GitterApi, user: &GitterUser) -> TransportResult<HashMap<String, String>> {
        let mut joined: HashMap<String, String> = api
            .rooms()
            .await?
            .into_iter()
            .filter(|room| !room.one_to_one)
            .map(|room| (room.name, room.id))
            .collect();
        if !joined.is_empty() {
            let mut names: Vec<&str> = joined.keys().map(String::as_str).collect();
            names.sort_unstable();
            debug!("[{}] Already in rooms: {}", self.client_id, names.join(", "));
        }

        for channel in &self.config.channels {
            if joined.contains_key(channel) {
                continue;
            }
            match api.join_room(&user.id, channel).await {
                Ok(room) => {
                    info!("[{}] Joined {}", self.client_id, channel);
                    joined.insert(channel.clone(), room.id);
                }
                Err(e) if e.is_permanent() => return Err(e),
                Err(e) => warn!("[{}] Failed to join {}: {}", self.client_id, channel, e),
            }
        }

        Ok(self
            .config
            .channels
            .iter()
            .filter_map(|channel| joined.get(channel).map(|id| (channel.clone(), id.clone())))
            .collect())
    }

    async fn deliver(&self, api: &GitterApi, rooms: &HashMap<String, String>, send: OutboundSend) -> TransportResult<()> {
        let Some(room_id) = rooms.get(&send.target_channel) else {
            warn!(
                "[{}] Room '{}' is not joined, dropping message",
                self.client_id, send.target_channel
            );
            return Ok(());
        };
        match api.send_message(room_id, &send.rendered_text).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_permanent() => Err(e),
            Err(e) => {
                warn!("[{}] Failed to send to {}: {}", self.client_id, send.target_channel, e);
                Ok(())
            }
        }
    }
}

impl Session for GitterSession {
    async fn run(
        &mut self,
        outbox: &mut OutboxReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> TransportResult<SessionEnd> {
        let api = GitterApi::new(&self.config)?;

        let user = api.current_user().await?;
        self.emitter.set_identity(user.username.as_str());
        info!("[{}] Connected as {}", self.client_id, user.username);

        let rooms = self.join_rooms(&api, &user).await?;

        let mut streams = JoinSet::new();
        for (name, id) in &rooms {
            streams.spawn(listen_room(
                self.client_id.clone(),
                api.clone(),
                name.clone(),
                id.clone(),
                self.emitter.clone(),
                shutdown.clone(),
            )
            .in_current_span());
        }

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        streams.shutdown().await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }

                send = outbox.recv() => match send {
                    Some(send) => {
                        if let Err(e) = self.deliver(&api, &rooms, send).await {
                            streams.shutdown().await;
                            return Err(e);
                        }
                    }
                    None => {
                        streams.shutdown().await;
                        return Ok(SessionEnd::Shutdown);
                    }
                },

                Some(joined) = streams.join_next(), if !streams.is_empty() => {
                    if let Err(e) = joined {
                        error!("[{}] Room stream task failed: {}", self.client_id, e);
                    }
                }
            }
        }
    }
}

/// Keep one room's stream open until shutdown or a permanent failure.
async fn listen_room(
    client_id: String,
    api: GitterApi,
    room: String,
    room_id: String,
    emitter: Emitter,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = reconnect_backoff();

    loop {
        let result = tokio::select! {
            result = read_stream(&api, &room, &room_id, &emitter) => result,
            _ = shutdown.changed() => return,
        };

        match result {
            Ok(()) => {
                debug!("[{}] Stream for {} ended", client_id, room);
                backoff = reconnect_backoff();
            }
            Err(e) if e.is_permanent() => {
                error!("[{}] Stream for {} rejected: {}", client_id, room, e);
                return;
            }
            Err(e) => warn!("[{}] Stream for {} failed: {}", client_id, room, e),
        }

        let delay = backoff.next().unwrap_or(Duration::from_secs(300));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Read one stream response to its end, emitting every chat message.
async fn read_stream(api: &GitterApi, room: &str, room_id: &str, emitter: &Emitter) -> TransportResult<()> {
    let response = api.stream(room_id).await?;
    debug!("[{}] Listening to {}", emitter.client_id(), room);

    let mut body = response.bytes_stream();
    let mut lines = LinesCodec::new_with_max_length(MAX_STREAM_LINE);
    let mut buffer = BytesMut::new();

    while let Some(chunk) = body.next().await {
        buffer.extend_from_slice(&chunk?);
        while let Some(line) = lines.decode(&mut buffer).map_err(|e| TransportError::Protocol {
            message: format!("bad stream line: {}", e),
        })? {
            if let Some((author, text)) = parse_stream_line(&line) {
                emitter.emit(room, &author, &text);
            }
        }
    }
    if let Ok(Some(line)) = lines.decode_eof(&mut buffer) {
        if let Some((author, text)) = parse_stream_line(&line) {
            emitter.emit(room, &author, &text);
        }
    }
    Ok(())
}
