//! Hub message types exchanged after the connection handshake.
//!
//! Every SignalR hub message is a JSON object tagged with an integer `type`
//! discriminator. This module defines one struct per message kind plus the
//! [`HubMessage`] sum over all of them, and the discriminator dispatch used
//! by the JSON hub protocol. Message kinds this client does not know are
//! skipped rather than rejected, so newer servers can introduce types
//! without breaking older clients.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// A non-streaming method invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMessage {
    /// Correlator for the invocation. Absent for fire-and-forget calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    /// Name of the method to invoke.
    pub target: String,
    /// Arguments to pass to the method.
    pub arguments: Vec<Value>,
    /// Identifiers of client-to-server streams feeding this invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_ids: Option<Vec<String>>,
    /// Optional per-message metadata headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// A single item produced by an active stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamItemMessage {
    /// Correlator of the streaming invocation this item belongs to.
    pub invocation_id: String,
    /// The streamed value.
    pub item: Value,
}

/// Terminates an invocation, carrying at most one of a result or an error.
///
/// A completion with neither field is a legal void return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    /// Correlator of the invocation being completed.
    pub invocation_id: String,
    /// Result value, if the invocation produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message, if the invocation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optional per-message metadata headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// A method invocation whose results arrive as a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInvocationMessage {
    /// Correlator for the streaming invocation.
    pub invocation_id: String,
    /// Name of the method to invoke.
    pub target: String,
    /// Arguments to pass to the method.
    pub arguments: Vec<Value>,
    /// Identifiers of client-to-server streams feeding this invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_ids: Option<Vec<String>>,
    /// Optional per-message metadata headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// Cancels an active streaming invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInvocationMessage {
    /// Correlator of the streaming invocation to cancel.
    pub invocation_id: String,
}

/// Asks the receiver to close the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseMessage {
    /// Reason for closing, if the sender reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the sender suggests reconnecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_reconnect: Option<bool>,
}

/// Acknowledges receipt of messages up to a sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckMessage {
    /// Highest sequence id the sender has durably received.
    pub sequence_id: u64,
}

/// Announces the sequence number of the next message after a reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceMessage {
    /// Sequence id of the next message on the wire.
    pub sequence_id: u64,
}

/// A SignalR hub message.
///
/// The numeric discriminator of each variant is fixed by the wire protocol;
/// [`HubMessage::message_type`] returns it.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Type 1: non-streaming invocation.
    Invocation(InvocationMessage),
    /// Type 2: stream item.
    StreamItem(StreamItemMessage),
    /// Type 3: invocation completion.
    Completion(CompletionMessage),
    /// Type 4: streaming invocation.
    StreamInvocation(StreamInvocationMessage),
    /// Type 5: stream cancellation.
    CancelInvocation(CancelInvocationMessage),
    /// Type 6: keep-alive ping. Carries no payload.
    Ping,
    /// Type 7: connection close request.
    Close(CloseMessage),
    /// Type 8: receipt acknowledgement.
    Ack(AckMessage),
    /// Type 9: sequence announcement.
    Sequence(SequenceMessage),
}

impl HubMessage {
    /// Returns the wire discriminator for this message kind.
    pub fn message_type(&self) -> u8 {
        match self {
            HubMessage::Invocation(_) => 1,
            HubMessage::StreamItem(_) => 2,
            HubMessage::Completion(_) => 3,
            HubMessage::StreamInvocation(_) => 4,
            HubMessage::CancelInvocation(_) => 5,
            HubMessage::Ping => 6,
            HubMessage::Close(_) => 7,
            HubMessage::Ack(_) => 8,
            HubMessage::Sequence(_) => 9,
        }
    }

    /// Decodes one hub message from its JSON object form.
    ///
    /// Returns `Ok(None)` for well-formed objects whose `type` is an integer
    /// outside the known range; such messages are dropped for forward
    /// compatibility. Unknown fields inside known messages are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the value is not an object,
    /// the `type` field is missing or not an integer, a required field is
    /// absent, or a completion carries both a result and an error.
    pub fn from_json(value: Value) -> Result<Option<HubMessage>, ProtocolError> {
        let message_type = value
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("hub message must be a JSON object".into()))?
            .get("type")
            .ok_or_else(|| ProtocolError::Malformed("missing 'type' field".into()))?
            .as_i64()
            .ok_or_else(|| ProtocolError::Malformed("'type' must be an integer".into()))?;

        let message = match message_type {
            1 => HubMessage::Invocation(decode(value)?),
            2 => HubMessage::StreamItem(decode(value)?),
            3 => {
                let completion: CompletionMessage = decode(value)?;
                if completion.result.is_some() && completion.error.is_some() {
                    return Err(ProtocolError::Malformed(
                        "completion carries both a result and an error".into(),
                    ));
                }
                HubMessage::Completion(completion)
            }
            4 => HubMessage::StreamInvocation(decode(value)?),
            5 => HubMessage::CancelInvocation(decode(value)?),
            6 => HubMessage::Ping,
            7 => HubMessage::Close(decode(value)?),
            8 => HubMessage::Ack(decode(value)?),
            9 => HubMessage::Sequence(decode(value)?),
            unknown => {
                tracing::debug!(message_type = unknown, "dropping unknown hub message type");
                return Ok(None);
            }
        };
        Ok(Some(message))
    }

    /// Encodes this message as a JSON object including the `type` field.
    ///
    /// # Errors
    ///
    /// Returns the underlying serialization error, which only occurs for
    /// values `serde_json` cannot represent.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        let mut value = match self {
            HubMessage::Invocation(m) => serde_json::to_value(m)?,
            HubMessage::StreamItem(m) => serde_json::to_value(m)?,
            HubMessage::Completion(m) => serde_json::to_value(m)?,
            HubMessage::StreamInvocation(m) => serde_json::to_value(m)?,
            HubMessage::CancelInvocation(m) => serde_json::to_value(m)?,
            HubMessage::Ping => Value::Object(serde_json::Map::new()),
            HubMessage::Close(m) => serde_json::to_value(m)?,
            HubMessage::Ack(m) => serde_json::to_value(m)?,
            HubMessage::Sequence(m) => serde_json::to_value(m)?,
        };
        if let Some(object) = value.as_object_mut() {
            object.insert("type".into(), Value::from(self.message_type()));
        }
        Ok(value)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invocation_decodes_with_optional_fields_absent() {
        let value = json!({"type": 1, "target": "echo", "arguments": ["hi"]});
        let message = HubMessage::from_json(value)
            .expect("decode")
            .expect("known type");
        match message {
            HubMessage::Invocation(m) => {
                assert_eq!(m.target, "echo");
                assert_eq!(m.arguments, vec![json!("hi")]);
                assert!(m.invocation_id.is_none());
                assert!(m.stream_ids.is_none());
                assert!(m.headers.is_none());
            }
            other => panic!("expected Invocation, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_dropped_not_rejected() {
        let value = json!({"type": 99});
        assert!(HubMessage::from_json(value).expect("decode").is_none());
    }

    #[test]
    fn missing_type_is_malformed() {
        let value = json!({"target": "echo"});
        assert!(matches!(
            HubMessage::from_json(value),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn non_integer_type_is_malformed() {
        let value = json!({"type": "1"});
        assert!(matches!(
            HubMessage::from_json(value),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn completion_with_result_and_error_is_malformed() {
        let value = json!({"type": 3, "invocationId": "1", "result": 5, "error": "boom"});
        assert!(matches!(
            HubMessage::from_json(value),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn completion_with_neither_result_nor_error_is_void() {
        let value = json!({"type": 3, "invocationId": "1"});
        let message = HubMessage::from_json(value)
            .expect("decode")
            .expect("known type");
        match message {
            HubMessage::Completion(m) => {
                assert!(m.result.is_none());
                assert!(m.error.is_none());
            }
            other => panic!("expected Completion, got {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let value = json!({"type": 6, "whatIsThis": true});
        let message = HubMessage::from_json(value)
            .expect("decode")
            .expect("known type");
        assert_eq!(message, HubMessage::Ping);
    }

    #[test]
    fn ping_encodes_to_bare_type_object() {
        let value = HubMessage::Ping.to_json().expect("encode");
        assert_eq!(value, json!({"type": 6}));
    }

    #[test]
    fn encode_emits_numeric_type_and_camel_case_fields() {
        let message = HubMessage::Ack(AckMessage { sequence_id: 17 });
        let value = message.to_json().expect("encode");
        assert_eq!(value, json!({"type": 8, "sequenceId": 17}));
    }

    #[test]
    fn heterogeneous_arguments_round_trip_as_dynamic_values() {
        let message = HubMessage::Invocation(InvocationMessage {
            invocation_id: Some("42".into()),
            target: "mixed".into(),
            arguments: vec![json!(null), json!(true), json!(1.5), json!({"k": [1, 2]})],
            stream_ids: None,
            headers: None,
        });
        let value = message.to_json().expect("encode");
        let decoded = HubMessage::from_json(value)
            .expect("decode")
            .expect("known type");
        assert_eq!(decoded, message);
    }
}
