//! WebSocket frame codec.
//!
//! Server frames are [`Envelope`]s and client frames are
//! [`ControlMessage`]s, both shared with the SDK. Envelopes are serialized
//! once into [`Utf8Bytes`] so a fan-out clones a reference count instead of
//! the JSON text.

use axum::extract::ws::Utf8Bytes;
use panelstream_sdk::{ControlMessage, Envelope, Topic};

use crate::error::StreamError;

pub use panelstream_sdk::MessageKind;

/// Serializes an envelope into a text frame body.
///
/// # Errors
///
/// Returns `Serialization` if the payload cannot be encoded.
pub fn encode(envelope: &Envelope) -> Result<Utf8Bytes, StreamError> {
    Ok(Utf8Bytes::from(serde_json::to_string(envelope)?))
}

/// Parses a client control frame.
///
/// # Errors
///
/// Returns `Serialization` for malformed JSON or unknown message types.
pub fn decode_control(text: &str) -> Result<ControlMessage, StreamError> {
    Ok(serde_json::from_str(text)?)
}

/// Builds the `error` frame for a failure.
#[must_use]
pub fn error_frame(err: &StreamError) -> Envelope {
    Envelope::error(err.code(), err.to_string())
}

/// Checks that a topic built from client input survives a round trip
/// through its wire form.
///
/// Rejects empty ids, ids containing `:` or whitespace, and explicit
/// `broadcast` subscriptions, which are implicit.
///
/// # Errors
///
/// Returns `InvalidTopic` for any topic that does not round-trip.
pub fn validate_topic(topic: &Topic) -> Result<(), StreamError> {
    let wire = topic.to_string();
    match Topic::parse(&wire) {
        Ok(parsed) if &parsed == topic && !parsed.is_broadcast() => Ok(()),
        _ => Err(StreamError::InvalidTopic(wire)),
    }
}
