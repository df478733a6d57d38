//! JSON text-frame codec for device channel messages.

use crate::error::{Error, Result};
use crate::protocol::Message;

/// Encodes and decodes [`Message`] frames.
///
/// Frames are single JSON objects carried in WebSocket text messages, so no
/// length prefix is needed.
pub struct Codec;

impl Codec {
    /// Serialize a message into a text frame.
    pub fn encode(msg: &Message) -> Result<String> {
        serde_json::to_string(msg).map_err(|e| Error::Codec {
            message: format!("failed to encode {}: {}", msg.kind(), e),
        })
    }

    /// Parse a text frame.
    pub fn decode(frame: &str) -> Result<Message> {
        serde_json::from_str(frame).map_err(|e| Error::Codec {
            message: e.to_string(),
        })
    }
}
