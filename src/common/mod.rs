//! Common types shared across the application.

pub mod error;
pub mod messages;

pub use error::{ConfigError, FieldError, TransportError, TransportResult};
pub use messages::{InboundMessage, OutboundSend};
