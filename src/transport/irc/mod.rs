//! IRC transport.
//!
//! ## Module Structure
//!
//! - `message`: line parsing, serialization and outbound splitting
//! - `codec`: CRLF framing for `tokio_util::codec::Framed`
//! - `session`: registration, keepalive and the channel message loop

pub mod codec;
pub mod message;
pub mod session;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::bridge::bus::Emitter;
use crate::bridge::template::DEFAULT_TEMPLATE;
use crate::common::ConfigError;
use crate::config::schema::{FieldSpec, FieldType};
use crate::transport::{SessionConfig, SessionTransport, Transport, TransportFactory};

pub use session::IrcSession;

pub const KIND: &str = "irc";

const FIELDS: &[FieldSpec] = &[
    FieldSpec::required("transport", FieldType::Enum(&[KIND]), "The transport kind."),
    FieldSpec::required("server", FieldType::String, "IRC server hostname."),
    FieldSpec::required(
        "port",
        FieldType::Integer { min: 0, max: 65535 },
        "IRC server port.",
    ),
    FieldSpec::required("nickname", FieldType::String, "Nickname to register with."),
    FieldSpec::optional("use_ssl", FieldType::Bool, "Connect over TLS."),
    FieldSpec::optional("password", FieldType::String, "Server password (PASS)."),
    FieldSpec::optional("ident", FieldType::String, "Username sent in USER. Defaults to the nickname."),
    FieldSpec::optional("realname", FieldType::String, "Real name sent in USER. Defaults to the nickname."),
    FieldSpec::optional("channels", FieldType::StringList, "Channels to join after registration."),
    FieldSpec::optional(
        "msg_template",
        FieldType::String,
        "Template for messages sent to this client. Placeholders: %client_id, %author, %msg.",
    ),
];

/// Typed IRC client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IrcConfig {
    pub server: String,
    pub port: u16,
    pub nickname: String,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub ident: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
}

impl SessionConfig for IrcConfig {
    type Session = IrcSession;

    fn new_session(config: Arc<Self>, client_id: &str, emitter: Emitter) -> IrcSession {
        IrcSession::new(client_id, config, emitter)
    }
}

pub struct IrcFactory;

impl TransportFactory for IrcFactory {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn build(&self, client_id: &str, config: &Value) -> Result<Arc<dyn Transport>, ConfigError> {
        let transport = SessionTransport::<IrcConfig>::from_value(client_id, KIND, config, DEFAULT_TEMPLATE)?;
        Ok(Arc::new(transport))
    }
}
