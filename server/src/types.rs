//! Shared message types for the Chorus server.
//!
//! A [`Frame`] is one unit of payload received from a client. It carries no
//! sender, timestamp, or routing metadata and is re-sent to every registered
//! client byte-for-byte.

use axum::body::Bytes;
use axum::extract::ws::{Message, Utf8Bytes};

/// One opaque message unit.
///
/// Text frames stay text and binary frames stay binary on the way out. Both
/// variants are reference-counted, so cloning a frame for fan-out does not
/// copy the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text message.
    Text(Utf8Bytes),
    /// A binary message.
    Binary(Bytes),
}

impl Frame {
    /// Converts an inbound WebSocket message into a frame.
    ///
    /// Returns `None` for control messages (ping, pong, close).
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(data) => Some(Self::Binary(data)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
        }
    }

    /// Payload size in bytes.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        }
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(text.into())
    }
}
