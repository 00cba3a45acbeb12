//! Telegram bot transport.
//!
//! A single long-poll loop on `getUpdates` feeds the bus; sends go through
//! `sendMessage` from the same task. Chats the bot sees for the first time are
//! learned by title so they can be used as send targets afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::Value;
use teloxide::payloads::{GetUpdatesSetters, SendMessageSetters};
use teloxide::requests::Requester;
use teloxide::types::{ChatId, Message, ParseMode, Recipient, Update, UpdateKind, User};
use teloxide::{ApiError, Bot, RequestError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bridge::bus::Emitter;
use crate::common::{ConfigError, OutboundSend, TransportError, TransportResult};
use crate::config::schema::{FieldSpec, FieldType};
use crate::transport::{
    OutboxReceiver, Session, SessionConfig, SessionEnd, SessionTransport, Transport, TransportFactory,
};

pub const KIND: &str = "telegram";

pub const DEFAULT_TEMPLATE: &str = "_[From %client_id]_ *%author* : %msg";

const DEFAULT_API_URL: &str = "https://api.telegram.org";
const DEFAULT_POLL_TIMEOUT: u32 = 30;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const REDACTED: &str = "[REDACTED]";

const FIELDS: &[FieldSpec] = &[
    FieldSpec::required("transport", FieldType::Enum(&[KIND]), "The transport kind."),
    FieldSpec::required("token", FieldType::String, "The bot token to use for connection."),
    FieldSpec::optional(
        "channels",
        FieldType::StringMap,
        "Mapping of channel names to chat ids. Keys are names, values are ids.",
    ),
    FieldSpec::optional("api_url", FieldType::String, "Base URL of the bot API."),
    // Zero would turn the long poll into a busy loop
    FieldSpec::optional(
        "poll_timeout",
        FieldType::Integer { min: 1, max: 600 },
        "Long-poll timeout in seconds.",
    ),
    FieldSpec::optional(
        "msg_template",
        FieldType::String,
        "Template for messages sent to this client. Placeholders: %client_id, %author, %msg.",
    ),
];

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_poll_timeout() -> u32 {
    DEFAULT_POLL_TIMEOUT
}

/// Typed Telegram client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub token: Secret<String>,
    #[serde(default)]
    pub channels: BTreeMap<String, String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: u32,
}

impl SessionConfig for TelegramConfig {
    type Session = TelegramSession;

    fn new_session(config: Arc<Self>, client_id: &str, emitter: Emitter) -> TelegramSession {
        let channels = config
            .channels
            .iter()
            .map(|(name, id)| (name.clone(), id.clone()))
            .collect();
        TelegramSession {
            client_id: client_id.to_string(),
            config,
            emitter,
            channels,
            offset: None,
        }
    }
}

pub struct TelegramFactory;

impl TransportFactory for TelegramFactory {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn build(&self, client_id: &str, config: &Value) -> Result<Arc<dyn Transport>, ConfigError> {
        let transport =
            SessionTransport::<TelegramConfig>::from_value(client_id, KIND, config, DEFAULT_TEMPLATE)?;
        Ok(Arc::new(transport))
    }
}

/// Bot API client bound to one token. Every error leaving it has the token
/// scrubbed, since request URLs embed it.
pub struct TelegramApi {
    bot: Bot,
    token: Secret<String>,
}

impl TelegramApi {
    pub fn new(config: &TelegramConfig) -> TransportResult<Self> {
        // The client timeout must outlast the long poll
        let http = teloxide::net::default_reqwest_settings()
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(Duration::from_secs(u64::from(config.poll_timeout)) + REQUEST_TIMEOUT)
            .build()?;
        let api_url = reqwest::Url::parse(&config.api_url).map_err(|e| TransportError::Protocol {
            message: format!("invalid api_url '{}': {}", config.api_url, e),
        })?;

        let bot = Bot::with_client(config.token.expose_secret().as_str(), http).set_api_url(api_url);
        Ok(Self {
            bot,
            token: config.token.clone(),
        })
    }

    fn describe(&self, error: &RequestError) -> String {
        let text = error.to_string();
        let token = self.token.expose_secret();
        if token.is_empty() {
            text
        } else {
            text.replace(token.as_str(), REDACTED)
        }
    }

    fn request_error(&self, error: &RequestError) -> TransportError {
        TransportError::Request {
            message: self.describe(error),
        }
    }

    /// Check the token. Any API rejection is a permanent error.
    pub async fn get_me(&self) -> TransportResult<User> {
        match self.bot.get_me().await {
            Ok(me) => Ok(me.user),
            Err(e @ RequestError::Api(_)) => Err(TransportError::Api {
                description: self.describe(&e),
            }),
            Err(e) => Err(self.request_error(&e)),
        }
    }

    /// Long-poll for updates starting at `offset`.
    pub async fn get_updates(&self, offset: Option<i32>, timeout: u32) -> TransportResult<Vec<Update>> {
        let mut request = self.bot.get_updates().timeout(timeout);
        if let Some(offset) = offset {
            request = request.offset(offset);
        }

        match request.await {
            Ok(updates) => Ok(updates),
            Err(e @ RequestError::Api(ApiError::InvalidToken)) => Err(TransportError::Api {
                description: self.describe(&e),
            }),
            Err(RequestError::Api(ApiError::Unknown(description))) if description.contains("Not Found") => {
                Err(TransportError::Api { description })
            }
            Err(e @ RequestError::Api(_)) => Err(TransportError::Protocol {
                message: format!("getUpdates failed: {}", self.describe(&e)),
            }),
            Err(e) => Err(self.request_error(&e)),
        }
    }

    #[allow(deprecated)] // legacy Markdown keeps the default templates readable
    pub async fn send_message(&self, chat_id: &str, text: &str) -> TransportResult<()> {
        self.bot
            .send_message(recipient(chat_id), text)
            .parse_mode(ParseMode::Markdown)
            .await
            .map(|_| ())
            .map_err(|e| self.request_error(&e))
    }
}

/// Numeric ids address chats directly, anything else is a public `@username`.
fn recipient(chat_id: &str) -> Recipient {
    match chat_id.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat_id.to_string()),
    }
}

fn author_name(user: &User) -> Option<String> {
    user.username
        .clone()
        .or_else(|| Some(user.first_name.clone()).filter(|name| !name.is_empty()))
}

pub struct TelegramSession {
    client_id: String,
    config: Arc<TelegramConfig>,
    emitter: Emitter,
    /// Channel name -> chat id, seeded from config and extended by learned chats.
    channels: HashMap<String, String>,
    /// Next update id to request. Kept across reconnects.
    offset: Option<i32>,
}

impl TelegramSession {
    /// Advance the offset past every update and emit the text messages.
    fn handle_updates(&mut self, updates: Vec<Update>) {
        for update in updates {
            let next = update.id.as_offset();
            self.offset = Some(self.offset.map_or(next, |o| o.max(next)));

            match update.kind {
                UpdateKind::Message(message)
                | UpdateKind::EditedMessage(message)
                | UpdateKind::ChannelPost(message)
                | UpdateKind::EditedChannelPost(message) => self.handle_message(&message),
                _ => {}
            }
        }
    }

    fn handle_message(&mut self, message: &Message) {
        let Some(text) = message.text() else {
            return;
        };
        let Some(channel) = message.chat.title().or(message.chat.username()) else {
            return;
        };

        if !self.channels.contains_key(channel) {
            info!(
                "[{}] New chat detected: id={}, name={}",
                self.client_id, message.chat.id.0, channel
            );
            self.channels
                .insert(channel.to_string(), message.chat.id.0.to_string());
        }

        let Some(author) = message.from.as_ref().and_then(author_name) else {
            return;
        };
        self.emitter.emit(channel, &author, text);
    }

    async fn deliver(&self, api: &TelegramApi, send: OutboundSend) {
        let Some(chat_id) = self.channels.get(&send.target_channel) else {
            warn!(
                "[{}] Failed to send message to the unknown channel '{}'",
                self.client_id, send.target_channel
            );
            return;
        };
        if let Err(e) = api.send_message(chat_id, &send.rendered_text).await {
            warn!("[{}] Failed to send message to {}: {}", self.client_id, send.target_channel, e);
        }
    }
}

impl Session for TelegramSession {
    async fn run(
        &mut self,
        outbox: &mut OutboxReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> TransportResult<SessionEnd> {
        let api = TelegramApi::new(&self.config)?;

        let me = api.get_me().await?;
        let identity = author_name(&me).unwrap_or_default();
        info!("[{}] Connected as {}", self.client_id, identity);
        self.emitter.set_identity(identity);

        let timeout = self.config.poll_timeout;
        let mut poll = Box::pin(api.get_updates(self.offset, timeout));

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }

                send = outbox.recv() => match send {
                    Some(send) => self.deliver(&api, send).await,
                    None => return Ok(SessionEnd::Shutdown),
                },

                updates = &mut poll => {
                    let updates = updates?;
                    debug!("[{}] Received {} update(s)", self.client_id, updates.len());
                    self.handle_updates(updates);
                    poll = Box::pin(api.get_updates(self.offset, timeout));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;
    use crate::bridge::bus::MessageBus;

    const ME: &str = r#"{"ok":true,"result":{"id":1,"is_bot":true,"first_name":"Relay","username":"relay_bot",
        "can_join_groups":true,"can_read_all_group_messages":true,"supports_inline_queries":false,
        "can_connect_to_business":false,"has_main_web_app":false}}"#;

    fn config(api_url: &str, channels: &[(&str, &str)]) -> TelegramConfig {
        TelegramConfig {
            token: Secret::new("tok".to_string()),
            channels: channels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            api_url: api_url.to_string(),
            poll_timeout: 1,
        }
    }

    fn updates(raw: Value) -> Vec<Update> {
        serde_json::from_value(raw).unwrap()
    }

    fn text_message(id: i64, chat: Value, from: Option<Value>, text: &str) -> Value {
        let mut message = json!({"message_id": id, "date": 1700000000, "chat": chat, "text": text});
        if let Some(from) = from {
            message["from"] = from;
        }
        message
    }

    #[test]
    fn test_validate_client() {
        let ok = json!({"transport": "telegram", "token": "t", "channels": {"Dev": "-100"}, "poll_timeout": 60});
        assert!(TelegramFactory.validate(&ok).is_ok());

        let bad = json!({"transport": "telegram", "token": "t", "channels": {"Dev": -100}, "poll_timeout": 601});
        let errors = TelegramFactory.validate(&bad).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["channels.Dev", "poll_timeout"]);
    }

    #[test]
    fn test_zero_poll_timeout_is_rejected() {
        let value = json!({"transport": "telegram", "token": "t", "poll_timeout": 0});
        let errors = TelegramFactory.validate(&value).unwrap_err();
        assert_eq!(errors[0].field, "poll_timeout");
    }

    #[test]
    fn test_config_defaults() {
        let config: TelegramConfig = serde_json::from_value(json!({"transport": "telegram", "token": "t"})).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.poll_timeout, DEFAULT_POLL_TIMEOUT);
        assert!(config.channels.is_empty());
    }

    #[test]
    fn test_config_debug_hides_token() {
        let config: TelegramConfig =
            serde_json::from_value(json!({"transport": "telegram", "token": "123456:SECRET-TOKEN"})).unwrap();
        assert_eq!(config.token.expose_secret(), "123456:SECRET-TOKEN");
        assert!(!format!("{:?}", config).contains("SECRET-TOKEN"));
    }

    #[test]
    fn test_recipient() {
        assert_eq!(recipient("-100"), Recipient::Id(ChatId(-100)));
        assert_eq!(recipient("@news"), Recipient::ChannelUsername("@news".to_string()));
    }

    #[tokio::test]
    async fn test_network_errors_hide_token() {
        let mut config = config("http://127.0.0.1:1/", &[]);
        config.token = Secret::new("123456:SECRET-TOKEN".to_string());
        let api = TelegramApi::new(&config).unwrap();

        let err = api.get_me().await.unwrap_err();
        assert!(!err.is_permanent());
        assert!(!err.to_string().contains("SECRET-TOKEN"));
        assert!(!format!("{:?}", err).contains("SECRET-TOKEN"));
    }

    #[tokio::test]
    async fn test_handle_updates() {
        let (bus, mut rx) = MessageBus::new();
        let mut session = TelegramConfig::new_session(
            Arc::new(config(DEFAULT_API_URL, &[("Dev chat", "-100")])),
            "Telegram",
            bus.emitter("Telegram"),
        );

        let dev = json!({"id": -100, "type": "group", "title": "Dev chat"});
        let alice = json!({"id": 5, "is_bot": false, "first_name": "Alice", "username": "alice"});
        let bob = json!({"id": 6, "is_bot": false, "first_name": "Bob"});
        let mut location = text_message(2, dev.clone(), Some(bob.clone()), "");
        location.as_object_mut().unwrap().remove("text");
        location["location"] = json!({"latitude": 1.0, "longitude": 2.0});
        let mut edited = text_message(3, json!({"id": -200, "type": "supergroup", "title": "Ops"}), Some(bob), "edited");
        edited["edit_date"] = json!(1700000100);

        session.handle_updates(updates(json!([
            {"update_id": 7, "message": text_message(1, dev, Some(alice), "hello")},
            {"update_id": 8, "message": location},
            {"update_id": 9, "edited_message": edited},
            {"update_id": 10, "channel_post": text_message(4, json!({"id": -300, "type": "channel", "title": "News"}), None, "anonymous")},
            {"update_id": 11, "poll": {"id": "1"}}
        ])));

        assert_eq!(session.offset, Some(12));
        assert_eq!(session.channels["Ops"], "-200");
        assert_eq!(session.channels["News"], "-300");
        assert_eq!(session.channels["Dev chat"], "-100");

        drop((session, bus));
        let first = rx.recv().await.unwrap();
        assert_eq!(
            (first.origin_channel.as_str(), first.author.as_str(), first.text.as_str()),
            ("Dev chat", "alice", "hello")
        );
        let second = rx.recv().await.unwrap();
        assert_eq!(
            (second.origin_channel.as_str(), second.author.as_str(), second.text.as_str()),
            ("Ops", "Bob", "edited")
        );
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_offset_never_moves_backwards() {
        let (bus, _rx) = MessageBus::new();
        let mut session =
            TelegramConfig::new_session(Arc::new(config(DEFAULT_API_URL, &[])), "Telegram", bus.emitter("Telegram"));

        session.handle_updates(updates(json!([
            {"update_id": 20, "poll": {"id": "1"}},
            {"update_id": 15, "poll": {"id": "2"}}
        ])));
        assert_eq!(session.offset, Some(21));
    }

    #[tokio::test]
    async fn test_rejected_token_is_permanent() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/bottok/getMe")
            .with_status(401)
            .with_body(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let (bus, _rx) = MessageBus::new();
        let mut session =
            TelegramConfig::new_session(Arc::new(config(&server.url(), &[])), "Telegram", bus.emitter("Telegram"));
        let (_out_tx, mut outbox) = tokio::sync::mpsc::unbounded_channel();
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        let err = session.run(&mut outbox, &mut shutdown).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_session_polls_and_sends() {
        let mut server = Server::new_async().await;
        server.mock("POST", "/bottok/getMe").with_body(ME).create_async().await;
        server
            .mock("POST", "/bottok/getUpdates")
            .match_body(Matcher::Json(json!({"timeout": 1})))
            .with_body(
                json!({"ok": true, "result": [{"update_id": 10, "message": text_message(
                    1,
                    json!({"id": -100, "type": "group", "title": "Dev chat"}),
                    Some(json!({"id": 5, "is_bot": false, "first_name": "Alice", "username": "alice"})),
                    "hello",
                )}]})
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("POST", "/bottok/getUpdates")
            .match_body(Matcher::PartialJson(json!({"offset": 11})))
            .with_body(r#"{"ok":true,"result":[]}"#)
            .create_async()
            .await;
        let sent = server
            .mock("POST", "/bottok/sendMessage")
            .match_body(Matcher::PartialJson(json!({
                "chat_id": -100,
                "text": "_[From IRC]_ *bob* : hi",
                "parse_mode": "Markdown",
            })))
            .with_body(
                json!({"ok": true, "result": text_message(
                    2,
                    json!({"id": -100, "type": "group", "title": "Dev chat"}),
                    None,
                    "_[From IRC]_ *bob* : hi",
                )})
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let (bus, mut rx) = MessageBus::new();
        let emitter = bus.emitter("Telegram");
        let mut session = TelegramConfig::new_session(
            Arc::new(config(&server.url(), &[("Dev chat", "-100")])),
            "Telegram",
            emitter.clone(),
        );

        let (out_tx, mut outbox) = tokio::sync::mpsc::unbounded_channel();
        out_tx
            .send(OutboundSend {
                target_client_id: "Telegram".to_string(),
                target_channel: "Dev chat".to_string(),
                rendered_text: "_[From IRC]_ *bob* : hi".to_string(),
            })
            .unwrap();
        let (shutdown_tx, mut shutdown) = watch::channel(false);

        let task = tokio::spawn(async move { session.run(&mut outbox, &mut shutdown).await });

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.origin_client_id, "Telegram");
        assert_eq!(inbound.origin_channel, "Dev chat");
        assert_eq!(inbound.author, "alice");
        assert_eq!(emitter.identity().as_deref(), Some("relay_bot"));

        shutdown_tx.send(true).unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionEnd::Shutdown);
        sent.assert_async().await;
    }
}
