//! Error types for the SignalR client core.

use std::fmt;

use thiserror::Error;

/// Errors that can occur when using the SignalR client.
#[derive(Debug, Error)]
pub enum SignalRClientError {
    /// An operation was attempted in a connection state that does not allow it.
    #[error("invalid connection state: {0}")]
    InvalidState(String),

    /// The negotiate handshake failed.
    #[error(transparent)]
    Negotiate(#[from] NegotiateError),

    /// A transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A hub-protocol framing or decoding failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Every transport offered by the server was rejected or failed to start.
    #[error("unable to connect to the server with any of the available transports: {0}")]
    NoTransportAvailable(TransportFailures),

    /// The connection state changed while an operation was in flight.
    #[error("the operation was cancelled")]
    Cancelled,

    /// An HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// A URL could not be parsed.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Failed to serialize or deserialize a JSON value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures raised by the negotiate handshake.
#[derive(Debug, Error)]
pub enum NegotiateError {
    /// The negotiate endpoint returned a non-200 status code.
    #[error("unexpected status code returned from negotiate '{code}'{}", status_hint(.code))]
    Status {
        /// The HTTP status code the server returned.
        code: u16,
    },

    /// The negotiate response body was not a valid negotiate payload.
    #[error("failed to decode the negotiate response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The server rejected the negotiation with an error message.
    #[error("negotiate was rejected by the server: {0}")]
    Rejected(String),

    /// The server enabled stateful reconnect without the client requesting it.
    #[error("the client did not opt in to stateful reconnect but the server attempted to enable it")]
    StatefulReconnectMismatch,

    /// More than the allowed number of negotiate redirects were followed.
    #[error("negotiate redirection limit exceeded")]
    RedirectLimit,
}

/// Failures raised at the transport layer.
///
/// Cloneable so a single failed batch write can fail every waiter in the
/// send queue with the same cause.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The transport handshake with the server failed.
    #[error("transport handshake failed: {0}")]
    Handshake(String),

    /// `send` was called while the transport was not in the open state.
    #[error("cannot send: the transport is not in the open state")]
    NotOpen,

    /// The server closed the transport with a non-clean code.
    #[error("transport closed with status code '{code}'{}", reason_suffix(.reason))]
    Closed {
        /// Close code reported by the remote end.
        code: u16,
        /// Close reason reported by the remote end, possibly empty.
        reason: String,
    },

    /// The transport failed while open (read or write error).
    #[error("transport failure: {0}")]
    Failed(String),
}

/// Failures raised by the hub-protocol parser and writer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The input did not end with the record separator.
    #[error("message is incomplete: missing record separator")]
    IncompleteFrame,

    /// A payload kind the protocol cannot process (e.g. binary data handed
    /// to the JSON protocol).
    #[error("the JSON hub protocol only supports text payloads")]
    ProtocolMismatch,

    /// A frame violated the hub message schema.
    #[error("malformed hub message: {0}")]
    Malformed(String),
}

fn status_hint(code: &u16) -> &'static str {
    if *code == 404 {
        " — either this is not a SignalR endpoint or there is a proxy blocking the connection"
    } else {
        ""
    }
}

fn reason_suffix(reason: &str) -> String {
    if reason.is_empty() {
        String::new()
    } else {
        format!(": {reason}")
    }
}

/// One transport the client could not use, with the reason.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    /// Transport name as advertised by the server (e.g. `WebSockets`).
    pub transport: String,
    /// Human-readable reason the transport was skipped or failed.
    pub reason: String,
}

/// The ordered list of per-transport failures behind
/// [`SignalRClientError::NoTransportAvailable`].
#[derive(Debug, Clone, Default)]
pub struct TransportFailures(pub Vec<TransportFailure>);

impl fmt::Display for TransportFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("the server did not advertise any transports");
        }
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            f.write_str(&failure.reason)?;
        }
        Ok(())
    }
}

/// A specialized [`Result`] type for SignalR client operations.
pub type Result<T> = std::result::Result<T, SignalRClientError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_404_carries_proxy_hint() {
        let err = NegotiateError::Status { code: 404 };
        let text = err.to_string();
        assert!(text.contains("404"));
        assert!(text.contains("proxy"));
    }

    #[test]
    fn negotiate_other_status_has_no_hint() {
        let err = NegotiateError::Status { code: 500 };
        let text = err.to_string();
        assert!(text.contains("500"));
        assert!(!text.contains("proxy"));
    }

    #[test]
    fn transport_failures_joined_in_order() {
        let failures = TransportFailures(vec![
            TransportFailure {
                transport: "WebSockets".into(),
                reason: "'WebSockets' failed: handshake refused".into(),
            },
            TransportFailure {
                transport: "LongPolling".into(),
                reason: "'LongPolling' is disabled by the client".into(),
            },
        ]);
        let text = failures.to_string();
        let ws = text.find("WebSockets").expect("first entry present");
        let lp = text.find("LongPolling").expect("second entry present");
        assert!(ws < lp);
    }

    #[test]
    fn closed_error_omits_empty_reason() {
        let err = TransportError::Closed {
            code: 1006,
            reason: String::new(),
        };
        assert!(!err.to_string().ends_with(": "));
    }
}
