#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Shared test utilities for SignalR client integration tests.
//!
//! Provides a scripted [`HttpClient`] for driving negotiate without a real
//! server, plus a local WebSocket hub server built on `tokio-tungstenite`
//! that records the upgrade URI and inbound messages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;

use signalr_client::{HttpClient, HttpRequest, HttpResponse, SignalRClientError};

// ── Scripted HTTP client ────────────────────────────────────────────

/// One scripted HTTP exchange.
pub struct ScriptedResponse {
    pub status: u16,
    pub body: String,
    /// Optional artificial latency before the response lands.
    pub delay: Option<Duration>,
}

impl ScriptedResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            delay: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Scripted [`HttpClient`]: responses are consumed in order; once the
/// script runs dry requests hang forever (the test is expected to stop the
/// connection first). All requests are recorded.
pub struct ScriptedHttpClient {
    responses: StdMutex<VecDeque<ScriptedResponse>>,
    pub requests: Arc<StdMutex<Vec<HttpRequest>>>,
}

impl ScriptedHttpClient {
    pub fn new(
        responses: Vec<ScriptedResponse>,
    ) -> (Arc<Self>, Arc<StdMutex<Vec<HttpRequest>>>) {
        let requests = Arc::new(StdMutex::new(Vec::new()));
        let client = Arc::new(Self {
            responses: StdMutex::new(responses.into()),
            requests: Arc::clone(&requests),
        });
        (client, requests)
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse, SignalRClientError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(scripted) => {
                if let Some(delay) = scripted.delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(HttpResponse {
                    status: scripted.status,
                    body: scripted.body.into_bytes(),
                })
            }
            None => std::future::pending().await,
        }
    }
}

// ── Negotiate response builders ─────────────────────────────────────

/// Negotiate body offering WebSockets in Text and Binary, version 0 style
/// (no `connectionToken`, so the id doubles as the token).
pub fn negotiate_websockets(connection_id: &str) -> String {
    format!(
        r#"{{"connectionId":"{connection_id}","availableTransports":[{{"transport":"WebSockets","transferFormats":["Text","Binary"]}}]}}"#
    )
}

/// Negotiate body redirecting to another URL.
pub fn negotiate_redirect(url: &str) -> String {
    format!(r#"{{"url":"{url}"}}"#)
}

/// Negotiate body offering long polling only.
pub fn negotiate_long_polling(connection_id: &str) -> String {
    format!(
        r#"{{"connectionId":"{connection_id}","availableTransports":[{{"transport":"LongPolling","transferFormats":["Text"]}}]}}"#
    )
}

// ── Mock WebSocket hub server ───────────────────────────────────────

/// What a [`MockHubServer`] saw.
#[derive(Default)]
pub struct ServerObservations {
    /// Path-and-query of each accepted upgrade request.
    pub request_uris: Vec<String>,
    /// `Authorization` header of each accepted upgrade request.
    pub authorizations: Vec<Option<String>>,
    /// Text messages received from the client, in arrival order.
    pub received: Vec<String>,
}

/// A local WebSocket server accepting connections in a loop, recording the
/// upgrade URI and every inbound text message, until the client closes.
pub struct MockHubServer {
    pub port: u16,
    pub observations: Arc<StdMutex<ServerObservations>>,
}

impl MockHubServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let observations = Arc::new(StdMutex::new(ServerObservations::default()));
        let recorded = Arc::clone(&observations);

        tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else {
                    break;
                };
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let uri_sink = Arc::clone(&recorded);
                    let ws = tokio_tungstenite::accept_hdr_async(
                        tcp,
                        move |request: &Request, response: Response| {
                            let mut seen = uri_sink.lock().unwrap();
                            seen.request_uris.push(request.uri().to_string());
                            seen.authorizations.push(
                                request
                                    .headers()
                                    .get("Authorization")
                                    .and_then(|v| v.to_str().ok())
                                    .map(str::to_string),
                            );
                            Ok(response)
                        },
                    )
                    .await;
                    let Ok(mut ws) = ws else { return };
                    while let Some(Ok(message)) = ws.next().await {
                        match message {
                            Message::Text(text) => {
                                recorded.lock().unwrap().received.push(text.to_string());
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                });
            }
        });

        Self { port, observations }
    }

    /// Base http URL for this server.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Snapshot of the upgrade URIs seen so far.
    pub fn request_uris(&self) -> Vec<String> {
        self.observations.lock().unwrap().request_uris.clone()
    }

    /// Snapshot of the text messages seen so far.
    pub fn received(&self) -> Vec<String> {
        self.observations.lock().unwrap().received.clone()
    }

    /// Snapshot of the `Authorization` headers seen so far.
    pub fn authorizations(&self) -> Vec<Option<String>> {
        self.observations.lock().unwrap().authorizations.clone()
    }
}

/// A WebSocket server that waits for one client message, replies with the
/// given frames, and then closes the socket cleanly. Waiting for the
/// client keeps the close from racing the tail of the connection start.
/// Returns the base http URL.
pub async fn server_that_sends_then_closes(frames: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Text(_)) {
                break;
            }
        }
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        ws.close(None).await.unwrap();
    });
    format!("http://{addr}/")
}
