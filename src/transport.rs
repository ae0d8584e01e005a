//! Transport abstraction for the SignalR connection.
//!
//! The [`Transport`] trait defines the uniform capability set the connection
//! state machine drives: connect, send, stop, plus the `on_receive` and
//! `on_close` callback slots a transport dispatches into. Implementations
//! own their socket and must deliver inbound payloads in order — callbacks
//! are never invoked concurrently for a single transport instance.
//!
//! # Close contract
//!
//! `on_close` fires exactly once per transport, whether the remote end went
//! away, an I/O error killed the read loop, or the local side called
//! [`stop`](Transport::stop). Transports hold no reference back to the
//! connection; close propagation happens purely through this callback.
//!
//! # Cancel safety
//!
//! [`stop`](Transport::stop) must return promptly even while a read is in
//! flight, so implementations keep their read loops cancellable (e.g. by
//! selecting on a close signal).

use std::fmt;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

/// One message worth of bytes travelling through a transport.
///
/// Text payloads are complete UTF-8 strings; binary payloads are opaque.
/// Which kind flows over a connection is fixed by the negotiated
/// [`TransferFormat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text payload.
    Text(String),
    /// Opaque binary payload.
    Binary(Vec<u8>),
}

impl Payload {
    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Binary(b) => b.len(),
        }
    }

    /// Returns `true` if the payload carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Declared encoding of payload bytes over a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferFormat {
    /// Payloads are UTF-8 text.
    #[default]
    Text,
    /// Payloads are opaque bytes.
    Binary,
}

impl TransferFormat {
    /// Parses a negotiate-advertised format name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("text") {
            Some(TransferFormat::Text)
        } else if name.eq_ignore_ascii_case("binary") {
            Some(TransferFormat::Binary)
        } else {
            None
        }
    }
}

impl fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferFormat::Text => f.write_str("Text"),
            TransferFormat::Binary => f.write_str("Binary"),
        }
    }
}

/// A single resolved transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Full-duplex WebSocket connection.
    WebSockets,
    /// Server-to-client event stream with separate HTTP sends.
    ServerSentEvents,
    /// Repeated HTTP polling.
    LongPolling,
}

impl TransportKind {
    fn bit(self) -> u8 {
        match self {
            TransportKind::WebSockets => 1,
            TransportKind::ServerSentEvents => 2,
            TransportKind::LongPolling => 4,
        }
    }

    /// Parses a negotiate-advertised transport name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("websockets") {
            Some(TransportKind::WebSockets)
        } else if name.eq_ignore_ascii_case("serversentevents") {
            Some(TransportKind::ServerSentEvents)
        } else if name.eq_ignore_ascii_case("longpolling") {
            Some(TransportKind::LongPolling)
        } else {
            None
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSockets => f.write_str("WebSockets"),
            TransportKind::ServerSentEvents => f.write_str("ServerSentEvents"),
            TransportKind::LongPolling => f.write_str("LongPolling"),
        }
    }
}

/// Bitset of transport kinds the client permits.
///
/// The empty set means "no preference": every transport is acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportTypes(u8);

impl TransportTypes {
    /// No preference — any transport the server offers is acceptable.
    pub const ANY: Self = Self(0);
    /// WebSockets only.
    pub const WEB_SOCKETS: Self = Self(1);
    /// Server-Sent Events only.
    pub const SERVER_SENT_EVENTS: Self = Self(2);
    /// Long polling only.
    pub const LONG_POLLING: Self = Self(4);

    /// Returns `true` if `kind` is permitted by this set.
    pub fn allows(self, kind: TransportKind) -> bool {
        self.0 == 0 || self.0 & kind.bit() != 0
    }
}

impl std::ops::BitOr for TransportTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Callback invoked once per inbound transport message, in arrival order.
pub type OnReceive = Box<dyn Fn(Payload) + Send + Sync>;

/// Callback invoked exactly once when the transport leaves the open state,
/// with the cause if the close was not clean.
pub type OnClose = Box<dyn Fn(Option<TransportError>) + Send + Sync>;

/// A bidirectional message transport for the SignalR connection.
///
/// Implementations move through Connecting → Open → Closing → Closed, or
/// straight from Connecting to Closed when the handshake fails. Callbacks
/// must be installed before [`connect`](Transport::connect) is awaited.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the transport against `url` in the given transfer format.
    ///
    /// Resolves only once the transport is in the open state.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Handshake`] when the connection could not
    /// be established.
    async fn connect(
        &mut self,
        url: &Url,
        transfer_format: TransferFormat,
    ) -> Result<(), TransportError>;

    /// Send one payload to the server.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotOpen`] outside the open state, or the
    /// underlying write failure.
    async fn send(&self, payload: Payload) -> Result<(), TransportError>;

    /// Close the transport.
    ///
    /// Idempotent. Guarantees the `on_close` callback fires exactly once
    /// for a transport that reached the open state.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails; resources are
    /// released regardless.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Install the inbound message callback. Must be called before `connect`.
    fn set_on_receive(&mut self, callback: OnReceive);

    /// Install the close callback. Must be called before `connect`.
    fn set_on_close(&mut self, callback: OnClose);
}
