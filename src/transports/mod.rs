//! Concrete [`Transport`](crate::Transport) implementations.
//!
//! | Module         | Transport              | Carrier                  |
//! |----------------|------------------------|--------------------------|
//! | `websocket`    | [`WebSocketTransport`] | `tokio-tungstenite`      |
//! | `long_polling` | [`LongPollingTransport`] | repeated HTTP requests |
//!
//! Server-Sent Events is recognised during transport selection but has no
//! implementation here; servers offering only SSE are reported through
//! `NoTransportAvailable`.

pub mod long_polling;
pub mod websocket;

pub use long_polling::{LongPollingTransport, LongPollingTransportConfig};
pub use websocket::{WebSocketTransport, WebSocketTransportConfig};
