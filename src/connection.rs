//! Connection lifecycle: negotiate, transport selection, steady state, stop.
//!
//! [`HttpConnection`] is a cheap-to-clone handle over shared state guarded
//! by one async mutex. `start` drives the negotiate/redirect loop and the
//! transport fallback cascade inline; a concurrent `stop` flips the state
//! to `Disconnecting` and the start path observes that after every awaited
//! subtask, aborting with `Cancelled`. Transports report their demise
//! through an explicit close callback — they hold no reference back to the
//! connection.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = ConnectionConfig::new("https://example.com/chat")
//!     .with_transports(TransportTypes::WEB_SOCKETS);
//! let connection = HttpConnection::new(config);
//! connection.set_on_receive(|payload| { /* parse hub messages */ });
//! connection.set_on_close(|error| { /* tear down */ });
//! connection.start(TransferFormat::Text).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{
    NegotiateError, Result, SignalRClientError, TransportFailure, TransportFailures,
};
use crate::http::{
    constant_token_factory, AccessTokenFactory, AccessTokenHttpClient, DefaultHttpClient,
    HttpClient, TokenFactorySlot,
};
use crate::negotiate::{self, user_agent, AvailableTransport, NegotiateOptions};
use crate::send_queue::SendQueue;
use crate::transport::{
    Payload, TransferFormat, Transport, TransportKind, TransportTypes,
};
use crate::transports::{
    LongPollingTransport, LongPollingTransportConfig, WebSocketTransport,
    WebSocketTransportConfig,
};

/// Cap on negotiate redirect hops before the attempt is abandoned.
const MAX_NEGOTIATE_REDIRECTS: usize = 100;

/// Default negotiate timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// The observable state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No connection attempt is active.
    #[default]
    Disconnected,
    /// `start` is negotiating or starting a transport.
    Connecting,
    /// A transport is up and payloads flow.
    Connected,
    /// `stop` is tearing the connection down.
    Disconnecting,
}

/// Capabilities negotiated for the active transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionFeatures {
    /// The transport participates in server-assisted stateful reconnect.
    pub reconnect: bool,
    /// The transport's own traffic keeps the connection alive, so no
    /// keep-alive pings are needed on top of it.
    pub inherent_keep_alive: bool,
}

/// Configuration for an [`HttpConnection`].
///
/// Only `url` is required; all other fields have defaults matching the
/// SignalR client conventions.
///
/// # Example
///
/// ```
/// use signalr_client::{ConnectionConfig, TransportTypes};
/// use std::time::Duration;
///
/// let config = ConnectionConfig::new("https://example.com/chat")
///     .with_transports(TransportTypes::WEB_SOCKETS | TransportTypes::LONG_POLLING)
///     .with_timeout(Duration::from_secs(30))
///     .with_header("x-tenant", "blue");
/// assert_eq!(config.url, "https://example.com/chat");
/// ```
pub struct ConnectionConfig {
    /// Base URL of the hub endpoint.
    pub url: String,
    /// Transports the client permits; defaults to any.
    pub transports: TransportTypes,
    /// Connect straight over WebSockets without negotiating. Only valid
    /// when `transports` is exactly [`TransportTypes::WEB_SOCKETS`].
    pub skip_negotiation: bool,
    /// Extra headers for negotiate and transport requests.
    pub headers: HashMap<String, String>,
    /// Negotiate request timeout. Defaults to 100 seconds.
    pub timeout: Duration,
    /// Forwarded to the HTTP client with every request.
    pub with_credentials: bool,
    /// Whether payload content may appear in trace logs.
    pub log_message_content: bool,
    /// Ask the server for stateful reconnect support.
    pub use_stateful_reconnect: bool,
    access_token_factory: Option<AccessTokenFactory>,
    http_client: Option<Arc<dyn HttpClient>>,
}

impl ConnectionConfig {
    /// Creates a configuration for `url` with default values.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transports: TransportTypes::ANY,
            skip_negotiation: false,
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            with_credentials: true,
            log_message_content: false,
            use_stateful_reconnect: false,
            access_token_factory: None,
            http_client: None,
        }
    }

    /// Restricts the transports the client may use.
    #[must_use]
    pub fn with_transports(mut self, transports: TransportTypes) -> Self {
        self.transports = transports;
        self
    }

    /// Skips the negotiate handshake. Requires a WebSockets-only
    /// transport selection.
    #[must_use]
    pub fn with_skip_negotiation(mut self, skip: bool) -> Self {
        self.skip_negotiation = skip;
        self
    }

    /// Adds one request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the negotiate timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Controls whether credentials accompany HTTP requests.
    #[must_use]
    pub fn with_credentials(mut self, with_credentials: bool) -> Self {
        self.with_credentials = with_credentials;
        self
    }

    /// Allows payload content in trace logs.
    #[must_use]
    pub fn with_log_message_content(mut self, log_message_content: bool) -> Self {
        self.log_message_content = log_message_content;
        self
    }

    /// Opts in to server-assisted stateful reconnect.
    #[must_use]
    pub fn with_stateful_reconnect(mut self, use_stateful_reconnect: bool) -> Self {
        self.use_stateful_reconnect = use_stateful_reconnect;
        self
    }

    /// Installs an async bearer-token source.
    #[must_use]
    pub fn with_access_token_factory(mut self, factory: AccessTokenFactory) -> Self {
        self.access_token_factory = Some(factory);
        self
    }

    /// Replaces the default `reqwest`-backed HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("transports", &self.transports)
            .field("skip_negotiation", &self.skip_negotiation)
            .field("timeout", &self.timeout)
            .field("use_stateful_reconnect", &self.use_stateful_reconnect)
            .finish_non_exhaustive()
    }
}

/// Callback receiving every inbound payload, in arrival order.
pub type ReceiveCallback = Arc<dyn Fn(Payload) + Send + Sync>;

/// Callback fired at most once per successful start when the connection
/// returns to disconnected, with the cause if the close was not requested.
pub type CloseCallback = Arc<dyn Fn(Option<SignalRClientError>) + Send + Sync>;

#[derive(Default)]
struct MutableState {
    status: ConnectionStatus,
    transport: Option<Arc<dyn Transport>>,
    send_queue: Option<Arc<SendQueue>>,
    connection_id: Option<String>,
    /// True once this start attempt reached `Connected`; gates `on_close`.
    connection_started: bool,
    stop_error: Option<SignalRClientError>,
    features: ConnectionFeatures,
}

struct ConnectionInner {
    config: ConnectionConfig,
    http_client: Arc<dyn HttpClient>,
    token_factory: TokenFactorySlot,
    state: Mutex<MutableState>,
    /// Woken on every status change so `stop` can await `Disconnected`.
    state_changed: Notify,
    on_receive: std::sync::RwLock<Option<ReceiveCallback>>,
    on_close: std::sync::RwLock<Option<CloseCallback>>,
}

/// A persistent connection to a SignalR endpoint.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct HttpConnection {
    inner: Arc<ConnectionInner>,
}

impl HttpConnection {
    /// Creates a disconnected connection from `config`.
    pub fn new(mut config: ConnectionConfig) -> Self {
        let token_factory: TokenFactorySlot =
            Arc::new(RwLock::new(config.access_token_factory.take()));
        let inner_http: Arc<dyn HttpClient> = config
            .http_client
            .take()
            .unwrap_or_else(|| Arc::new(DefaultHttpClient::new()));
        let http_client: Arc<dyn HttpClient> = Arc::new(AccessTokenHttpClient::new(
            inner_http,
            Arc::clone(&token_factory),
        ));

        Self {
            inner: Arc::new(ConnectionInner {
                config,
                http_client,
                token_factory,
                state: Mutex::new(MutableState::default()),
                state_changed: Notify::new(),
                on_receive: std::sync::RwLock::new(None),
                on_close: std::sync::RwLock::new(None),
            }),
        }
    }

    /// Installs the inbound payload callback. Set this before `start`.
    pub fn set_on_receive(&self, callback: impl Fn(Payload) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.inner.on_receive.write() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Installs the close callback. Set this before `start`.
    pub fn set_on_close(
        &self,
        callback: impl Fn(Option<SignalRClientError>) + Send + Sync + 'static,
    ) {
        if let Ok(mut slot) = self.inner.on_close.write() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Starts the connection with the requested transfer format.
    ///
    /// Performs the negotiate/redirect loop, walks the server-offered
    /// transports in order, and resolves once one of them is open. On any
    /// failure the connection is left `Disconnected` with no transport.
    ///
    /// # Errors
    ///
    /// [`SignalRClientError::InvalidState`] when not `Disconnected`,
    /// [`SignalRClientError::Cancelled`] when `stop` interleaved with the
    /// attempt, negotiate errors, or
    /// [`SignalRClientError::NoTransportAvailable`] when every offered
    /// transport was rejected or failed.
    pub async fn start(&self, transfer_format: TransferFormat) -> Result<()> {
        {
            let mut state = self.inner.state.lock().await;
            if state.status != ConnectionStatus::Disconnected {
                return Err(SignalRClientError::InvalidState(format!(
                    "cannot start a connection in the {:?} state",
                    state.status
                )));
            }
            state.status = ConnectionStatus::Connecting;
            state.connection_started = false;
            state.connection_id = None;
            state.stop_error = None;
            state.features = ConnectionFeatures::default();
        }
        debug!(url = %self.inner.config.url, "starting connection");

        let outcome = self.inner.start_internal(transfer_format).await;

        let mut state = self.inner.state.lock().await;
        match outcome {
            Ok(()) if state.status == ConnectionStatus::Connecting => {
                state.status = ConnectionStatus::Connected;
                state.connection_started = true;
                info!(connection_id = ?state.connection_id, "connection established");
                drop(state);
                self.inner.state_changed.notify_waiters();
                Ok(())
            }
            Ok(()) => {
                // A stop raced the tail of the start: release the transport.
                let transport = state.transport.take();
                let queue = state.send_queue.take();
                state.status = ConnectionStatus::Disconnected;
                drop(state);
                if let Some(queue) = queue {
                    queue.stop().await;
                }
                if let Some(transport) = transport {
                    let _ = transport.stop().await;
                }
                self.inner.state_changed.notify_waiters();
                debug!("connection stopped during start");
                Err(SignalRClientError::Cancelled)
            }
            Err(e) => {
                state.transport = None;
                state.send_queue = None;
                state.status = ConnectionStatus::Disconnected;
                drop(state);
                self.inner.state_changed.notify_waiters();
                debug!(error = %e, "connection failed to start");
                Err(e)
            }
        }
    }

    /// Sends one payload through the ordered send queue, resolving once it
    /// has been flushed to the transport.
    ///
    /// # Errors
    ///
    /// [`SignalRClientError::InvalidState`] outside `Connected`, or the
    /// transport failure that broke the batch this payload belonged to.
    /// Send failures do not themselves terminate the connection.
    pub async fn send(&self, payload: Payload) -> Result<()> {
        let queue = {
            let state = self.inner.state.lock().await;
            if state.status != ConnectionStatus::Connected {
                return Err(SignalRClientError::InvalidState(format!(
                    "cannot send when the connection is in the {:?} state",
                    state.status
                )));
            }
            state.send_queue.clone().ok_or_else(|| {
                SignalRClientError::InvalidState("connected without a send queue".into())
            })?
        };
        queue.send(payload).await
    }

    /// Stops the connection.
    ///
    /// Waits for an in-flight `start` to observe the cancellation, stops the
    /// send queue and the transport, and returns once the connection is
    /// `Disconnected`. `error` is recorded and handed to `on_close` in
    /// preference to any transport-reported cause. A no-op when already
    /// disconnected.
    pub async fn stop(&self, error: Option<SignalRClientError>) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        match state.status {
            ConnectionStatus::Disconnected => {
                debug!("stop ignored: connection already disconnected");
                Ok(())
            }
            ConnectionStatus::Disconnecting => {
                drop(state);
                inner.wait_for_disconnected().await;
                Ok(())
            }
            ConnectionStatus::Connecting => {
                debug!("stopping connection while start is in flight");
                state.stop_error = error;
                state.status = ConnectionStatus::Disconnecting;
                drop(state);
                inner.wait_for_disconnected().await;
                Ok(())
            }
            ConnectionStatus::Connected => {
                state.stop_error = error;
                state.status = ConnectionStatus::Disconnecting;
                let transport = state.transport.clone();
                let queue = state.send_queue.take();
                drop(state);

                if let Some(queue) = queue {
                    queue.stop().await;
                }
                if let Some(transport) = transport {
                    if let Err(e) = transport.stop().await {
                        warn!(error = %e, "transport stop failed");
                        inner.stop_connection(Some(e.into())).await;
                    }
                }
                inner.wait_for_disconnected().await;
                Ok(())
            }
        }
    }

    /// Current state of the connection.
    pub async fn state(&self) -> ConnectionStatus {
        self.inner.state.lock().await.status
    }

    /// Connection id assigned by the most recent negotiate, if any.
    pub async fn connection_id(&self) -> Option<String> {
        self.inner.state.lock().await.connection_id.clone()
    }

    /// Capabilities of the active transport.
    pub async fn features(&self) -> ConnectionFeatures {
        self.inner.state.lock().await.features
    }
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("url", &self.inner.config.url)
            .finish_non_exhaustive()
    }
}

impl ConnectionInner {
    async fn start_internal(self: &Arc<Self>, transfer_format: TransferFormat) -> Result<()> {
        let mut url = Url::parse(&self.config.url)?;

        if self.config.skip_negotiation {
            if self.config.transports != TransportTypes::WEB_SOCKETS {
                return Err(SignalRClientError::InvalidState(
                    "negotiation can only be skipped when WebSockets is the only permitted transport"
                        .into(),
                ));
            }
            debug!("skipping negotiation, connecting directly over WebSockets");
            self.start_transport(TransportKind::WebSockets, &url, transfer_format)
                .await?;
            return Ok(());
        }

        let mut redirects = 0;
        let response = loop {
            let response = negotiate::negotiate(
                self.http_client.as_ref(),
                &url,
                &self.negotiate_options(),
            )
            .await?;
            if self.state.lock().await.status != ConnectionStatus::Connecting {
                return Err(SignalRClientError::Cancelled);
            }
            if let Some(message) = response.error {
                return Err(NegotiateError::Rejected(message).into());
            }
            if let Some(token) = &response.access_token {
                // The server-issued token replaces the configured provider
                // for the rest of this connection's lifetime.
                *self.token_factory.write().await = Some(constant_token_factory(token.clone()));
            }
            match &response.url {
                Some(redirect) => {
                    if redirects >= MAX_NEGOTIATE_REDIRECTS {
                        return Err(NegotiateError::RedirectLimit.into());
                    }
                    redirects += 1;
                    debug!(url = %redirect, "following negotiate redirect");
                    url = Url::parse(redirect)?;
                }
                None => break response,
            }
        };

        let connect_url = negotiate::connect_url(&url, response.connection_token.as_deref());
        let offers = response.available_transports.clone().unwrap_or_default();
        let stateful_reconnect = response.use_stateful_reconnect == Some(true);

        let mut failures = Vec::new();
        for offer in &offers {
            let kind = match self.resolve_transport(offer, transfer_format) {
                Ok(kind) => kind,
                Err(reason) => {
                    debug!(transport = %offer.transport, %reason, "transport rejected");
                    failures.push(TransportFailure {
                        transport: offer.transport.clone(),
                        reason,
                    });
                    continue;
                }
            };

            match self.start_transport(kind, &connect_url, transfer_format).await {
                Ok(()) => {
                    let mut state = self.state.lock().await;
                    state.connection_id = response.connection_id.clone();
                    state.features = ConnectionFeatures {
                        reconnect: kind == TransportKind::WebSockets && stateful_reconnect,
                        inherent_keep_alive: kind == TransportKind::LongPolling,
                    };
                    return Ok(());
                }
                Err(e) => {
                    warn!(transport = %kind, error = %e, "transport failed to start");
                    failures.push(TransportFailure {
                        transport: offer.transport.clone(),
                        reason: format!("'{kind}' failed: {e}"),
                    });
                    if self.state.lock().await.status != ConnectionStatus::Connecting {
                        return Err(SignalRClientError::Cancelled);
                    }
                }
            }
        }

        Err(SignalRClientError::NoTransportAvailable(TransportFailures(
            failures,
        )))
    }

    /// Matches one server offer against the client's transport bitset and
    /// the requested transfer format.
    fn resolve_transport(
        &self,
        offer: &AvailableTransport,
        transfer_format: TransferFormat,
    ) -> std::result::Result<TransportKind, String> {
        let Some(kind) = TransportKind::from_name(&offer.transport) else {
            return Err(format!(
                "skipping transport '{}' because it is not supported by this client",
                offer.transport
            ));
        };
        if !self.config.transports.allows(kind) {
            return Err(format!("'{kind}' is disabled by the client"));
        }
        let format_supported = offer
            .transfer_formats
            .iter()
            .any(|name| TransferFormat::from_name(name) == Some(transfer_format));
        if !format_supported {
            return Err(format!("'{kind}' does not support {transfer_format}"));
        }
        if kind == TransportKind::ServerSentEvents {
            return Err(format!("'{kind}' is not supported by this client"));
        }
        Ok(kind)
    }

    /// Builds the transport, wires the connection callbacks, connects, and
    /// on success records the transport and a fresh send queue.
    async fn start_transport(
        self: &Arc<Self>,
        kind: TransportKind,
        url: &Url,
        transfer_format: TransferFormat,
    ) -> Result<()> {
        let mut transport = self.build_transport(kind)?;

        let receiver = Arc::clone(self);
        transport.set_on_receive(Box::new(move |payload| {
            receiver.forward_receive(payload);
        }));
        let closer = Arc::clone(self);
        transport.set_on_close(Box::new(move |error| {
            let inner = Arc::clone(&closer);
            tokio::spawn(async move {
                inner
                    .stop_connection(error.map(SignalRClientError::from))
                    .await;
            });
        }));

        transport.connect(url, transfer_format).await?;

        let transport: Arc<dyn Transport> = Arc::from(transport);
        let mut state = self.state.lock().await;
        if state.status != ConnectionStatus::Connecting {
            drop(state);
            let _ = transport.stop().await;
            return Err(SignalRClientError::Cancelled);
        }
        state.send_queue = Some(Arc::new(SendQueue::new(Arc::clone(&transport))));
        state.transport = Some(transport);
        debug!(transport = %kind, url = %url, "transport started");
        Ok(())
    }

    fn build_transport(&self, kind: TransportKind) -> Result<Box<dyn Transport>> {
        match kind {
            TransportKind::WebSockets => Ok(Box::new(WebSocketTransport::new(
                WebSocketTransportConfig {
                    headers: self.transport_headers(),
                    token_factory: Arc::clone(&self.token_factory),
                    log_message_content: self.config.log_message_content,
                },
            ))),
            TransportKind::LongPolling => Ok(Box::new(LongPollingTransport::new(
                LongPollingTransportConfig {
                    http_client: Arc::clone(&self.http_client),
                    headers: self.transport_headers(),
                    with_credentials: self.config.with_credentials,
                    log_message_content: self.config.log_message_content,
                },
            ))),
            TransportKind::ServerSentEvents => Err(SignalRClientError::InvalidState(
                "no ServerSentEvents transport is available in this client".into(),
            )),
        }
    }

    /// Tears the connection down after the transport is gone.
    ///
    /// Entry point both for the transport close callback and for stop
    /// failures. Re-entry while already disconnected is a no-op; a close
    /// during `Connecting` is left for the start path to report.
    async fn stop_connection(self: &Arc<Self>, transport_error: Option<SignalRClientError>) {
        let mut state = self.state.lock().await;
        match state.status {
            ConnectionStatus::Disconnected => {
                debug!("stop_connection ignored: already disconnected");
                return;
            }
            ConnectionStatus::Connecting => {
                warn!("transport closed while the connection was connecting; start reports the failure");
                return;
            }
            _ => {}
        }

        let final_error = state.stop_error.take().or(transport_error);
        state.status = ConnectionStatus::Disconnected;
        state.transport = None;
        let queue = state.send_queue.take();
        let started = state.connection_started;
        state.connection_started = false;
        drop(state);

        if let Some(queue) = queue {
            queue.stop().await;
        }
        self.state_changed.notify_waiters();

        if started {
            match &final_error {
                Some(e) => info!(error = %e, "connection closed"),
                None => info!("connection closed"),
            }
            let callback = self
                .on_close
                .read()
                .ok()
                .and_then(|slot| slot.clone());
            if let Some(callback) = callback {
                callback(final_error);
            }
        }
    }

    fn forward_receive(&self, payload: Payload) {
        let callback = self.on_receive.read().ok().and_then(|slot| slot.clone());
        if let Some(callback) = callback {
            callback(payload);
        }
    }

    async fn wait_for_disconnected(&self) {
        loop {
            let notified = self.state_changed.notified();
            if self.state.lock().await.status == ConnectionStatus::Disconnected {
                return;
            }
            notified.await;
        }
    }

    fn negotiate_options(&self) -> NegotiateOptions {
        NegotiateOptions {
            headers: self.config.headers.clone(),
            timeout: Some(self.config.timeout),
            with_credentials: self.config.with_credentials,
            use_stateful_reconnect: self.config.use_stateful_reconnect,
        }
    }

    fn transport_headers(&self) -> HashMap<String, String> {
        let mut headers = self.config.headers.clone();
        headers
            .entry("User-Agent".into())
            .or_insert_with(user_agent);
        headers
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

    fn inner_for(config: ConnectionConfig) -> Arc<ConnectionInner> {
        HttpConnection::new(config).inner
    }

    fn offer(transport: &str, formats: &[&str]) -> AvailableTransport {
        AvailableTransport {
            transport: transport.into(),
            transfer_formats: formats.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn unknown_transport_name_is_rejected() {
        let inner = inner_for(ConnectionConfig::new("http://h/hub"));
        let reason = inner
            .resolve_transport(&offer("CarrierPigeon", &["Text"]), TransferFormat::Text)
            .unwrap_err();
        assert!(reason.contains("not supported by this client"));
    }

    #[test]
    fn transport_outside_the_bitset_is_disabled_by_the_client() {
        let inner = inner_for(
            ConnectionConfig::new("http://h/hub").with_transports(TransportTypes::WEB_SOCKETS),
        );
        let reason = inner
            .resolve_transport(&offer("LongPolling", &["Text"]), TransferFormat::Text)
            .unwrap_err();
        assert_eq!(reason, "'LongPolling' is disabled by the client");
    }

    #[test]
    fn transport_without_the_requested_format_is_rejected() {
        let inner = inner_for(ConnectionConfig::new("http://h/hub"));
        let reason = inner
            .resolve_transport(&offer("WebSockets", &["Binary"]), TransferFormat::Text)
            .unwrap_err();
        assert_eq!(reason, "'WebSockets' does not support Text");
    }

    #[test]
    fn matching_is_case_insensitive() {
        let inner = inner_for(ConnectionConfig::new("http://h/hub"));
        let kind = inner
            .resolve_transport(&offer("webSockets", &["TEXT"]), TransferFormat::Text)
            .unwrap();
        assert_eq!(kind, TransportKind::WebSockets);
    }

    #[test]
    fn server_sent_events_resolves_to_unsupported() {
        let inner = inner_for(ConnectionConfig::new("http://h/hub"));
        let reason = inner
            .resolve_transport(&offer("ServerSentEvents", &["Text"]), TransferFormat::Text)
            .unwrap_err();
        assert_eq!(reason, "'ServerSentEvents' is not supported by this client");
    }

    #[tokio::test]
    async fn send_while_disconnected_is_invalid_state() {
        let connection = HttpConnection::new(ConnectionConfig::new("http://h/hub"));
        let err = connection
            .send(Payload::Text("x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalRClientError::InvalidState(_)));
    }

    #[tokio::test]
    async fn stop_while_disconnected_is_a_noop() {
        let connection = HttpConnection::new(ConnectionConfig::new("http://h/hub"));
        connection.stop(None).await.unwrap();
        assert_eq!(connection.state().await, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn skip_negotiation_requires_websockets_only() {
        let connection = HttpConnection::new(
            ConnectionConfig::new("http://h/hub").with_skip_negotiation(true),
        );
        let err = connection.start(TransferFormat::Text).await.unwrap_err();
        assert!(matches!(err, SignalRClientError::InvalidState(_)));
        assert_eq!(connection.state().await, ConnectionStatus::Disconnected);
    }
}
