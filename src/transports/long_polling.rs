//! Long polling transport over the [`HttpClient`] seam.
//!
//! Receives by issuing repeated GET requests against the connect URL: a 200
//! delivers the body as one message, a 204 means the server terminated the
//! connection, anything else is a transport failure. Sends are POSTs to the
//! same URL, termination is a DELETE. Because every request goes through
//! the shared HTTP client, bearer-token injection applies to each poll.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::TransportError;
use crate::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{OnClose, OnReceive, Payload, TransferFormat, Transport};

/// How long one poll request may stay open before the client gives up on
/// it. Servers complete idle polls well before this.
const POLL_TIMEOUT: Duration = Duration::from_secs(100);

/// Configuration a [`LongPollingTransport`] needs from the connection.
pub struct LongPollingTransportConfig {
    /// HTTP client used for polls, sends, and the closing DELETE. Expected
    /// to be the connection's token-injecting client.
    pub http_client: Arc<dyn HttpClient>,
    /// Headers attached to every request.
    pub headers: HashMap<String, String>,
    /// Forwarded on every request.
    pub with_credentials: bool,
    /// Whether inbound/outbound payload content may appear in trace logs.
    pub log_message_content: bool,
}

/// A [`Transport`] that emulates a duplex channel with HTTP long polling.
pub struct LongPollingTransport {
    config: LongPollingTransportConfig,
    on_receive: Option<Arc<OnReceive>>,
    on_close: Option<Arc<OnClose>>,
    url: Mutex<Option<Url>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    open: Arc<AtomicBool>,
    close_fired: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
}

impl LongPollingTransport {
    /// Creates an unconnected transport.
    pub fn new(config: LongPollingTransportConfig) -> Self {
        Self {
            config,
            on_receive: None,
            on_close: None,
            url: Mutex::new(None),
            poll_task: Mutex::new(None),
            open: Arc::new(AtomicBool::new(false)),
            close_fired: Arc::new(AtomicBool::new(false)),
            close_signal: Arc::new(Notify::new()),
        }
    }

    fn request(&self, method: HttpMethod, url: &Url) -> HttpRequest {
        let mut request = HttpRequest::new(method, url.as_str());
        request.headers = self.config.headers.clone();
        request.with_credentials = self.config.with_credentials;
        request
    }

    fn deliver(
        on_receive: &Option<Arc<OnReceive>>,
        transfer_format: TransferFormat,
        body: Vec<u8>,
        log_message_content: bool,
    ) -> Result<(), TransportError> {
        let payload = match transfer_format {
            TransferFormat::Text => {
                let text = String::from_utf8(body)
                    .map_err(|e| TransportError::Failed(format!("invalid UTF-8 in poll: {e}")))?;
                if log_message_content {
                    trace!(content = %text, "long poll message received");
                } else {
                    trace!(len = text.len(), "long poll message received");
                }
                Payload::Text(text)
            }
            TransferFormat::Binary => {
                trace!(len = body.len(), "long poll message received");
                Payload::Binary(body)
            }
        };
        if let Some(callback) = on_receive {
            callback(payload);
        }
        Ok(())
    }

    fn spawn_poll_loop(&self, url: Url, transfer_format: TransferFormat) -> JoinHandle<()> {
        let http = Arc::clone(&self.config.http_client);
        let on_receive = self.on_receive.clone();
        let on_close = self.on_close.clone();
        let open = Arc::clone(&self.open);
        let close_fired = Arc::clone(&self.close_fired);
        let close_signal = Arc::clone(&self.close_signal);
        let log_message_content = self.config.log_message_content;
        let template = self.request(HttpMethod::Get, &url);

        tokio::spawn(async move {
            let mut close_error: Option<TransportError> = None;
            loop {
                let mut poll = template.clone();
                poll.timeout = Some(POLL_TIMEOUT);
                tokio::select! {
                    biased;
                    _ = close_signal.notified() => {
                        debug!("long poll loop stopping on local close");
                        break;
                    }
                    result = http.send(poll) => match result {
                        Ok(HttpResponse { status: 204, .. }) => {
                            debug!("long poll terminated by server");
                            break;
                        }
                        Ok(HttpResponse { status: 200, body }) => {
                            if body.is_empty() {
                                // Poll window expired with nothing to deliver.
                                continue;
                            }
                            if let Err(e) = Self::deliver(
                                &on_receive,
                                transfer_format,
                                body,
                                log_message_content,
                            ) {
                                close_error = Some(e);
                                break;
                            }
                        }
                        Ok(HttpResponse { status, .. }) => {
                            close_error = Some(TransportError::Failed(format!(
                                "unexpected status code '{status}' from poll request"
                            )));
                            break;
                        }
                        Err(e) => {
                            close_error = Some(TransportError::Failed(e.to_string()));
                            break;
                        }
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
impl Transport for LongPollingTransport {
    async fn connect(
        &mut self,
        url: &Url,
        transfer_format: TransferFormat,
    ) -> Result<(), TransportError> {
        debug!(url = %url, %transfer_format, "connecting long polling transport");

        // The opening poll validates the connect URL before any loop runs.
        let response = self
            .config
            .http_client
            .send(self.request(HttpMethod::Get, url))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        if response.status != 200 {
            return Err(TransportError::Handshake(format!(
                "unexpected status code '{}' from initial poll",
                response.status
            )));
        }

        *self.url.lock().await = Some(url.clone());
        self.open.store(true, Ordering::Release);
        let poll_task = self.spawn_poll_loop(url.clone(), transfer_format);
        *self.poll_task.lock().await = Some(poll_task);
        Ok(())
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        let url = self
            .url
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotOpen)?;

        let mut request = self.request(HttpMethod::Post, &url);
        request.body = Some(match payload {
            Payload::Text(text) => text.into_bytes(),
            Payload::Binary(data) => data,
        });

        let response = self
            .config
            .http_client
            .send(request)
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        if !response.is_success() {
            return Err(TransportError::Failed(format!(
                "unexpected status code '{}' from send request",
                response.status
            )));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::Release);
        self.close_signal.notify_one();

        let poll_task = self.poll_task.lock().await.take();
        if let Some(task) = poll_task {
            if let Err(e) = task.await {
                warn!(error = %e, "long poll loop terminated abnormally");
            }
        }

        // Tell the server this connection is done; best effort.
        let url = self.url.lock().await.take();
        if let Some(url) = url {
            match self
                .config
                .http_client
                .send(self.request(HttpMethod::Delete, &url))
                .await
            {
                Ok(response) => {
                    debug!(status = response.status, "long poll connection terminated")
                }
                Err(e) => warn!(error = %e, "failed to terminate long poll connection"),
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
    use crate::error::Result;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    /// Scripted HTTP client: GETs consume queued poll responses (hanging
    /// forever once the script runs dry), other methods answer 200 and are
    /// recorded.
    struct ScriptedHttpClient {
        polls: StdMutex<VecDeque<HttpResponse>>,
        requests: Arc<StdMutex<Vec<(HttpMethod, String)>>>,
    }

    impl ScriptedHttpClient {
        fn new(
            polls: Vec<HttpResponse>,
        ) -> (Arc<Self>, Arc<StdMutex<Vec<(HttpMethod, String)>>>) {
            let requests = Arc::new(StdMutex::new(Vec::new()));
            let client = Arc::new(Self {
                polls: StdMutex::new(polls.into()),
                requests: Arc::clone(&requests),
            });
            (client, requests)
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedHttpClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((request.method, request.url.clone()));
            if request.method != HttpMethod::Get {
                return Ok(HttpResponse {
                    status: 200,
                    body: Vec::new(),
                });
            }
            let next = self.polls.lock().unwrap().pop_front();
            match next {
                Some(response) => Ok(response),
                None => std::future::pending().await,
            }
        }
    }

    fn ok(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: body.as_bytes().to_vec(),
        }
    }

    fn transport_over(client: Arc<dyn HttpClient>) -> LongPollingTransport {
        LongPollingTransport::new(LongPollingTransportConfig {
            http_client: client,
            headers: HashMap::new(),
            with_credentials: true,
            log_message_content: false,
        })
    }

    #[tokio::test]
    async fn polled_messages_are_delivered_then_204_closes_cleanly() {
        let (client, _requests) = ScriptedHttpClient::new(vec![
            ok(""), // opening poll
            ok("msg1"),
            ok("msg2"),
            HttpResponse {
                status: 204,
                body: Vec::new(),
            },
        ]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = tokio::sync::oneshot::channel();
        let close_tx = StdMutex::new(Some(close_tx));

        let mut transport = transport_over(client);
        transport.set_on_receive(Box::new(move |payload| {
            let _ = tx.send(payload);
        }));
        transport.set_on_close(Box::new(move |error| {
            if let Some(tx) = close_tx.lock().unwrap().take() {
                let _ = tx.send(error);
            }
        }));

        transport
            .connect(
                &Url::parse("http://example/hub?id=abc").unwrap(),
                TransferFormat::Text,
            )
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), Payload::Text("msg1".into()));
        assert_eq!(rx.recv().await.unwrap(), Payload::Text("msg2".into()));
        assert!(close_rx.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_initial_poll_is_a_handshake_error() {
        let (client, _requests) = ScriptedHttpClient::new(vec![HttpResponse {
            status: 500,
            body: Vec::new(),
        }]);
        let mut transport = transport_over(client);
        let err = transport
            .connect(
                &Url::parse("http://example/hub?id=abc").unwrap(),
                TransferFormat::Text,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Handshake(_)));
    }

    #[tokio::test]
    async fn poll_error_closes_with_cause() {
        let (client, _requests) = ScriptedHttpClient::new(vec![
            ok(""),
            HttpResponse {
                status: 500,
                body: Vec::new(),
            },
        ]);

        let (close_tx, close_rx) = tokio::sync::oneshot::channel();
        let close_tx = StdMutex::new(Some(close_tx));
        let mut transport = transport_over(client);
        transport.set_on_close(Box::new(move |error| {
            if let Some(tx) = close_tx.lock().unwrap().take() {
                let _ = tx.send(error);
            }
        }));

        transport
            .connect(
                &Url::parse("http://example/hub?id=abc").unwrap(),
                TransferFormat::Text,
            )
            .await
            .unwrap();

        let error = close_rx.await.unwrap().unwrap();
        assert!(matches!(error, TransportError::Failed(_)));
    }

    #[tokio::test]
    async fn send_posts_to_the_connect_url_and_stop_deletes_it() {
        let (client, requests) = ScriptedHttpClient::new(vec![ok("")]);
        let mut transport = transport_over(client);
        transport.set_on_close(Box::new(|_| {}));

        let url = Url::parse("http://example/hub?id=abc").unwrap();
        transport.connect(&url, TransferFormat::Text).await.unwrap();
        transport
            .send(Payload::Text("outbound".into()))
            .await
            .unwrap();
        transport.stop().await.unwrap();

        let seen = requests.lock().unwrap();
        assert!(seen
            .iter()
            .any(|(method, u)| *method == HttpMethod::Post && u == url.as_str()));
        assert_eq!(
            seen.last().unwrap(),
            &(HttpMethod::Delete, url.as_str().to_string())
        );

        drop(seen);
        let err = transport
            .send(Payload::Text("late".into()))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotOpen);
    }
}
