//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! Promotes the connect URL scheme (`http` → `ws`, `https` → `wss`),
//! attaches per-connection headers plus a bearer token fetched once per
//! connect attempt, and splits the socket into a guarded send half and a
//! spawned read loop. Both `ws://` and `wss://` are supported — TLS is
//! handled transparently via
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::TransportError;
use crate::http::{current_token, TokenFactorySlot};
use crate::transport::{OnClose, OnReceive, Payload, TransferFormat, Transport};

/// Type alias for the underlying WebSocket stream.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration a [`WebSocketTransport`] needs from the connection.
pub struct WebSocketTransportConfig {
    /// Headers attached to the upgrade request.
    pub headers: HashMap<String, String>,
    /// Shared bearer-token provider slot; read once per connect attempt.
    pub token_factory: TokenFactorySlot,
    /// Whether inbound/outbound payload content may appear in trace logs.
    pub log_message_content: bool,
}

/// A [`Transport`] backed by a WebSocket connection.
pub struct WebSocketTransport {
    config: WebSocketTransportConfig,
    on_receive: Option<Arc<OnReceive>>,
    on_close: Option<Arc<OnClose>>,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    /// True only while the socket is open for sending.
    open: Arc<AtomicBool>,
    /// Guard ensuring `on_close` fires at most once.
    close_fired: Arc<AtomicBool>,
    /// Wakes the read loop when a local stop begins.
    close_signal: Arc<Notify>,
}

impl WebSocketTransport {
    /// Creates an unconnected transport.
    pub fn new(config: WebSocketTransportConfig) -> Self {
        Self {
            config,
            on_receive: None,
            on_close: None,
            sink: Mutex::new(None),
            read_task: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            close_fired: Arc::new(AtomicBool::new(false)),
            close_signal: Arc::new(Notify::new()),
        }
    }

    /// Rewrites `http`/`https` into `ws`/`wss`; other schemes pass through
    /// untouched so callers can hand in `ws://` URLs directly.
    fn websocket_url(url: &Url) -> Result<Url, TransportError> {
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            _ => return Ok(url.clone()),
        };
        let mut promoted = url.clone();
        promoted
            .set_scheme(scheme)
            .map_err(|()| TransportError::Handshake(format!("cannot promote scheme of '{url}'")))?;
        Ok(promoted)
    }

    fn spawn_read_loop(&self, stream: SplitStream<WsStream>) -> JoinHandle<()> {
        let on_receive = self.on_receive.clone();
        let on_close = self.on_close.clone();
        let open = Arc::clone(&self.open);
        let close_fired = Arc::clone(&self.close_fired);
        let close_signal = Arc::clone(&self.close_signal);
        let log_message_content = self.config.log_message_content;

        tokio::spawn(async move {
            let mut stream = stream;
            let mut close_error: Option<TransportError> = None;
            loop {
                tokio::select! {
                    biased;
                    _ = close_signal.notified() => {
                        debug!("websocket read loop stopping on local close");
                        break;
                    }
                    message = stream.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            if log_message_content {
                                trace!(content = %text, "websocket text message received");
                            } else {
                                trace!(len = text.len(), "websocket text message received");
                            }
                            if let Some(callback) = &on_receive {
                                callback(Payload::Text(text.to_string()));
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            trace!(len = data.len(), "websocket binary message received");
                            if let Some(callback) = &on_receive {
                                callback(Payload::Binary(data.to_vec()));
                            }
                        }
                        // tungstenite auto-queues Pong replies for Pings.
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "websocket closed by remote");
                            close_error = frame.and_then(|frame| {
                                let code = u16::from(frame.code);
                                if code == 1000 {
                                    None
                                } else {
                                    Some(TransportError::Closed {
                                        code,
                                        reason: frame.reason.to_string(),
                                    })
                                }
                            });
                            break;
                        }
                        // Never produced by the read half; kept for exhaustiveness.
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            close_error = Some(TransportError::Failed(e.to_string()));
                            break;
                        }
                        None => break,
                    }
                }
            }

            open.store(false, Ordering::Release);
            if !close_fired.swap(true, Ordering::AcqRel) {
                if let Some(callback) = &on_close {
                    callback(close_error);
                }
            }
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &mut self,
        url: &Url,
        transfer_format: TransferFormat,
    ) -> Result<(), TransportError> {
        let ws_url = Self::websocket_url(url)?;
        debug!(url = %ws_url, %transfer_format, "connecting websocket transport");

        // One token fetch per connect attempt.
        let token = current_token(&self.config.token_factory)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let mut request = ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        let request_headers = request.headers_mut();
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            request_headers.insert(name, value);
        }
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Handshake(e.to_string()))?;
            request_headers.insert(AUTHORIZATION, value);
        }

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(url = %ws_url, "websocket connection established");

        let (sink, stream) = stream.split();
        *self.sink.lock().await = Some(sink);
        self.open.store(true, Ordering::Release);
        let read_task = self.spawn_read_loop(stream);
        *self.read_task.lock().await = Some(read_task);
        Ok(())
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::NotOpen)?;

        let message = match payload {
            Payload::Text(text) => {
                if self.config.log_message_content {
                    trace!(content = %text, "sending websocket text message");
                } else {
                    trace!(len = text.len(), "sending websocket text message");
                }
                Message::Text(text.into())
            }
            Payload::Binary(data) => {
                trace!(len = data.len(), "sending websocket binary message");
                Message::Binary(data.into())
            }
        };
        sink.send(message)
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::Release);
        self.close_signal.notify_one();

        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                warn!(error = %e, "websocket close handshake failed");
            }
        }

        // The read loop fires on_close (exactly once) on its way out.
        let read_task = self.read_task.lock().await.take();
        if let Some(task) = read_task {
            if let Err(e) = task.await {
                warn!(error = %e, "websocket read loop terminated abnormally");
            }
        }
        Ok(())
    }

    fn set_on_receive(&mut self, callback: OnReceive) {
        self.on_receive = Some(Arc::new(callback));
    }

    fn set_on_close(&mut self, callback: OnClose) {
        self.on_close = Some(Arc::new(callback));
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    fn unconfigured() -> WebSocketTransport {
        WebSocketTransport::new(WebSocketTransportConfig {
            headers: HashMap::new(),
            token_factory: Arc::new(tokio::sync::RwLock::new(None)),
            log_message_content: false,
        })
    }

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the http URL to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("http://{addr}")
    }

    #[test]
    fn http_schemes_are_promoted() {
        let ws = WebSocketTransport::websocket_url(&Url::parse("http://h/hub").unwrap()).unwrap();
        assert_eq!(ws.scheme(), "ws");
        let wss = WebSocketTransport::websocket_url(&Url::parse("https://h/hub").unwrap()).unwrap();
        assert_eq!(wss.scheme(), "wss");
        let passthrough =
            WebSocketTransport::websocket_url(&Url::parse("ws://h/hub").unwrap()).unwrap();
        assert_eq!(passthrough.scheme(), "ws");
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let mut transport = unconfigured();
        let err = transport
            .connect(&Url::parse("ws://127.0.0.1:1").unwrap(), TransferFormat::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Handshake(_)));
    }

    #[tokio::test]
    async fn send_before_connect_is_not_open() {
        let transport = unconfigured();
        let err = transport
            .send(Payload::Text("hello".into()))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotOpen);
    }

    #[tokio::test]
    async fn messages_are_delivered_in_order() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text("first".into())).await.unwrap();
            ws.send(Message::Text("second".into())).await.unwrap();
            ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = unconfigured();
        transport.set_on_receive(Box::new(move |payload| {
            let _ = tx.send(payload);
        }));
        let (close_tx, close_rx) = tokio::sync::oneshot::channel();
        let close_tx = StdMutex::new(Some(close_tx));
        transport.set_on_close(Box::new(move |error| {
            if let Some(tx) = close_tx.lock().unwrap().take() {
                let _ = tx.send(error);
            }
        }));

        transport
            .connect(&Url::parse(&url).unwrap(), TransferFormat::Text)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), Payload::Text("first".into()));
        assert_eq!(rx.recv().await.unwrap(), Payload::Text("second".into()));
        assert_eq!(rx.recv().await.unwrap(), Payload::Binary(vec![1, 2, 3]));

        // Clean remote close surfaces no error.
        assert!(close_rx.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unclean_remote_close_carries_code_and_reason() {
        let url = start_mock_server(|mut ws| async move {
            ws.close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "kicked".into(),
            }))
            .await
            .unwrap();
        })
        .await;

        let (close_tx, close_rx) = tokio::sync::oneshot::channel();
        let close_tx = StdMutex::new(Some(close_tx));
        let mut transport = unconfigured();
        transport.set_on_close(Box::new(move |error| {
            if let Some(tx) = close_tx.lock().unwrap().take() {
                let _ = tx.send(error);
            }
        }));

        transport
            .connect(&Url::parse(&url).unwrap(), TransferFormat::Text)
            .await
            .unwrap();

        let error = close_rx.await.unwrap().unwrap();
        assert_eq!(
            error,
            TransportError::Closed {
                code: 1008,
                reason: "kicked".into(),
            }
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_fires_on_close_once() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let close_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&close_count);
        let mut transport = unconfigured();
        transport.set_on_close(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        transport
            .connect(&Url::parse(&url).unwrap(), TransferFormat::Text)
            .await
            .unwrap();

        transport.stop().await.unwrap();
        transport.stop().await.unwrap();

        assert_eq!(close_count.load(Ordering::SeqCst), 1);

        let err = transport
            .send(Payload::Text("late".into()))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotOpen);
    }

    #[tokio::test]
    async fn bearer_token_is_attached_to_the_upgrade_request() {
        use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (auth_tx, auth_rx) = tokio::sync::oneshot::channel::<Option<String>>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let auth_tx = StdMutex::new(Some(auth_tx));
            let mut ws = tokio_tungstenite::accept_hdr_async(
                tcp,
                move |request: &Request, response: Response| {
                    let auth = request
                        .headers()
                        .get("Authorization")
                        .map(|v| v.to_str().unwrap_or_default().to_string());
                    if let Some(tx) = auth_tx.lock().unwrap().take() {
                        let _ = tx.send(auth);
                    }
                    Ok(response)
                },
            )
            .await
            .unwrap();
            let _ = ws.close(None).await;
        });

        let token_factory: TokenFactorySlot = Arc::new(tokio::sync::RwLock::new(Some(
            crate::http::constant_token_factory("tok-123".into()),
        )));
        let mut transport = WebSocketTransport::new(WebSocketTransportConfig {
            headers: HashMap::new(),
            token_factory,
            log_message_content: false,
        });

        transport
            .connect(
                &Url::parse(&format!("http://{addr}")).unwrap(),
                TransferFormat::Text,
            )
            .await
            .unwrap();

        assert_eq!(auth_rx.await.unwrap().as_deref(), Some("Bearer tok-123"));
    }

    #[tokio::test]
    async fn send_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = unconfigured();
        transport.set_on_receive(Box::new(move |payload| {
            let _ = tx.send(payload);
        }));

        transport
            .connect(&Url::parse(&url).unwrap(), TransferFormat::Text)
            .await
            .unwrap();
        transport.send(Payload::Text("echo".into())).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Payload::Text("echo".into()));
    }
}
