//! Record-separator framing and the JSON hub protocol.
//!
//! Every JSON hub frame is a UTF-8 JSON object terminated by the single byte
//! `0x1E` (ASCII record separator). A payload may carry zero or more
//! concatenated frames; frames are never split across payloads because the
//! transports preserve message boundaries.

use serde_json::Value;

use crate::error::ProtocolError;
use crate::messages::HubMessage;
use crate::transport::{Payload, TransferFormat};

/// The byte that terminates every JSON hub frame.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Appends the record separator to one serialized frame.
pub fn write_frame(frame: &str) -> String {
    format!("{frame}{RECORD_SEPARATOR}")
}

/// Splits a payload into its frames, in order.
///
/// Empty input yields an empty sequence. The final empty segment produced by
/// the trailing separator is discarded; any other empty segment is passed
/// through and will fail JSON decoding downstream.
///
/// # Errors
///
/// Returns [`ProtocolError::IncompleteFrame`] when a non-empty input does
/// not end with the record separator.
pub fn parse_frames(input: &str) -> Result<Vec<&str>, ProtocolError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    if !input.ends_with(RECORD_SEPARATOR) {
        return Err(ProtocolError::IncompleteFrame);
    }
    let mut frames: Vec<&str> = input.split(RECORD_SEPARATOR).collect();
    frames.pop();
    Ok(frames)
}

/// The JSON variant of the SignalR hub protocol.
///
/// Stateless; all methods take `&self` only for symmetry with future
/// protocol implementations selected at runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHubProtocol;

impl JsonHubProtocol {
    /// Protocol name used during the hub handshake.
    pub const NAME: &'static str = "json";
    /// Protocol version used during the hub handshake.
    pub const VERSION: u32 = 2;

    /// The transfer format this protocol requires from its transport.
    pub fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Text
    }

    /// Parses every hub message out of one inbound payload, preserving
    /// arrival order. Messages with an unknown integer `type` are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ProtocolMismatch`] for binary payloads,
    /// [`ProtocolError::IncompleteFrame`] when the payload does not end with
    /// the record separator, and [`ProtocolError::Malformed`] when a frame
    /// is not a valid hub message object.
    pub fn parse_messages(&self, payload: &Payload) -> Result<Vec<HubMessage>, ProtocolError> {
        let text = match payload {
            Payload::Text(text) => text,
            Payload::Binary(_) => return Err(ProtocolError::ProtocolMismatch),
        };

        let mut messages = Vec::new();
        for frame in parse_frames(text)? {
            let value: Value = serde_json::from_str(frame)
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            if let Some(message) = HubMessage::from_json(value)? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Serializes one hub message into a framed text payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the message cannot be
    /// represented as JSON.
    pub fn write_message(&self, message: &HubMessage) -> Result<Payload, ProtocolError> {
        let value = message
            .to_json()
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let frame = serde_json::to_string(&value)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(Payload::Text(write_frame(&frame)))
    }
}
