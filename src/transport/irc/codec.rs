//! CRLF line codec for IRC.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::common::TransportError;
use crate::transport::irc::message::IrcMessage;

/// Upper bound on a buffered line. IRCv3 tags may push lines past 512 bytes.
const MAX_BUFFERED_LINE: usize = 8192;

/// Codec framing `IrcMessage`s as `\n`-terminated lines.
///
/// Accepts bare `\n` as well as `\r\n`. Blank lines are skipped and invalid
/// UTF-8 is replaced rather than rejected.
#[derive(Debug, Default)]
pub struct IrcCodec {
    /// How far `src` was already scanned for a newline.
    scanned: usize,
}

impl IrcCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for IrcCodec {
    type Item = IrcMessage;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|&b| b == b'\n') else {
                if src.len() > MAX_BUFFERED_LINE {
                    return Err(TransportError::Protocol {
                        message: format!("line exceeds {} bytes", MAX_BUFFERED_LINE),
                    });
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let end = self.scanned + offset;
            self.scanned = 0;
            let line = src.split_to(end);
            src.advance(1);

            let text = String::from_utf8_lossy(&line);
            if let Some(msg) = IrcMessage::parse(&text) {
                return Ok(Some(msg));
            }
        }
    }
}

impl Encoder<IrcMessage> for IrcCodec {
    type Error = TransportError;

    fn encode(&mut self, item: IrcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_line();
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
