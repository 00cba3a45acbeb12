//! Canonical message types flowing through the relay.
//!
//! Transports produce `InboundMessage`s, the router turns matching ones into
//! `OutboundSend`s which are queued on the destination transport.

use chrono::{DateTime, Utc};

/// A message observed by a transport on one of its channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Client id of the transport that received the message.
    pub origin_client_id: String,
    /// Channel (room) the message was posted in.
    pub origin_channel: String,
    /// Author nickname/username as reported by the network.
    pub author: String,
    /// Message text.
    pub text: String,
    /// When the transport decoded the message.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        origin_client_id: impl Into<String>,
        origin_channel: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            origin_client_id: origin_client_id.into(),
            origin_channel: origin_channel.into(),
            author: author.into(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// A rendered message to deliver on a destination client/channel.
///
/// Fire-and-forget: nobody waits for, or learns about, the delivery result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSend {
    pub target_client_id: String,
    pub target_channel: String,
    pub rendered_text: String,
}
