//! # SignalR Client
//!
//! Async Rust client core for the ASP.NET Core SignalR protocol.
//!
//! This crate implements the connection layer beneath a hub API: the HTTP
//! `negotiate` handshake with redirect and access-token handling, transport
//! selection and fallback (WebSockets first, long polling as a fallback),
//! the JSON hub protocol with its `0x1E` record-separator framing, and an
//! ordered send queue that coalesces outbound frames into batches.
//!
//! ## Features
//!
//! - **Transport-agnostic core** — implement the [`Transport`] trait for any
//!   carrier; WebSocket and long polling ship in [`transports`]
//! - **Pluggable HTTP** — negotiate and long polling go through the
//!   [`HttpClient`] trait, with a `reqwest`-backed default
//! - **Bearer tokens** — an async token factory feeds every HTTP request
//!   and the WebSocket upgrade, with one refresh-and-replay on 401
//! - **Typed hub messages** — the nine hub frame kinds as Rust structs,
//!   with unknown message types skipped for forward compatibility
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use signalr_client::{
//!     ConnectionConfig, HttpConnection, HubMessage, JsonHubProtocol, TransferFormat,
//! };
//!
//! # async fn example() -> Result<(), signalr_client::SignalRClientError> {
//! let connection = HttpConnection::new(ConnectionConfig::new("https://example.com/chat"));
//!
//! let protocol = JsonHubProtocol;
//! connection.set_on_receive(move |payload| {
//!     if let Ok(messages) = protocol.parse_messages(&payload) {
//!         for message in messages {
//!             println!("received: {message:?}");
//!         }
//!     }
//! });
//! connection.set_on_close(|error| {
//!     println!("closed: {error:?}");
//! });
//!
//! connection.start(TransferFormat::Text).await?;
//! connection
//!     .send(JsonHubProtocol.write_message(&HubMessage::Ping)?)
//!     .await?;
//! connection.stop(None).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod http;
pub mod messages;
pub mod negotiate;
pub mod protocol;
pub mod transport;
pub mod transports;

mod send_queue;

// Re-export primary types for ergonomic imports.
pub use connection::{
    ConnectionConfig, ConnectionFeatures, ConnectionStatus, HttpConnection,
};
pub use error::{
    NegotiateError, ProtocolError, SignalRClientError, TransportError, TransportFailure,
    TransportFailures,
};
pub use http::{AccessTokenFactory, DefaultHttpClient, HttpClient, HttpRequest, HttpResponse};
pub use messages::HubMessage;
pub use negotiate::NegotiateResponse;
pub use protocol::{JsonHubProtocol, RECORD_SEPARATOR};
pub use transport::{Payload, TransferFormat, Transport, TransportKind, TransportTypes};
pub use transports::{LongPollingTransport, WebSocketTransport};
