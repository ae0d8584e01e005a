//! HTTP client seam and the bearer-token injector.
//!
//! Negotiate and the long polling transport go through the object-safe
//! [`HttpClient`] trait so both can be driven by scripted mock clients in
//! tests. [`DefaultHttpClient`] is a thin adapter over `reqwest`;
//! [`AccessTokenHttpClient`] wraps any inner client and injects
//! `Authorization: Bearer` headers from an async token provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, SignalRClientError};

/// HTTP methods the client core issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET — long polling reads.
    Get,
    /// POST — negotiate and long polling sends.
    Post,
    /// DELETE — long polling termination.
    Delete,
}

/// One outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute request URL.
    pub url: String,
    /// Request headers; later writers win on duplicate names.
    pub headers: HashMap<String, String>,
    /// Request body, if any.
    pub body: Option<Vec<u8>>,
    /// Per-request timeout, if any.
    pub timeout: Option<Duration>,
    /// Whether credentials (cookies, client certs) should accompany the
    /// request. Honored by credential-aware [`HttpClient`] implementations;
    /// the default `reqwest` client has no browser credential model.
    pub with_credentials: bool,
}

impl HttpRequest {
    /// Creates a request with no headers, body, or timeout.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
            with_credentials: true,
        }
    }
}

/// One received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An HTTP client capable of carrying the SignalR control traffic.
///
/// Object-safe so connections can share one `Arc<dyn HttpClient>` across
/// negotiate, token injection, and the long polling transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issue one request and await the full response.
    ///
    /// # Errors
    ///
    /// Returns [`SignalRClientError::Http`] when no response was received
    /// (connection failure, timeout). Non-2xx responses are returned as
    /// values, not errors; status policy belongs to the caller.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Default [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct DefaultHttpClient {
    client: reqwest::Client,
}

impl DefaultHttpClient {
    /// Creates a client with `reqwest`'s default configuration.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpClient for DefaultHttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SignalRClientError::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| SignalRClientError::Http(e.to_string()))?
            .to_vec();
        Ok(HttpResponse { status, body })
    }
}

/// Async source of bearer tokens.
///
/// Invoked before each authenticated request; an empty string means "no
/// token right now" and suppresses the `Authorization` header.
pub type AccessTokenFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Shared, swappable token-provider slot.
///
/// Negotiate replaces the provider mid-handshake when the server hands out
/// an `accessToken`, and every consumer (HTTP wrapper, WebSocket transport)
/// observes the swap through this slot.
pub type TokenFactorySlot = Arc<RwLock<Option<AccessTokenFactory>>>;

/// Builds a factory that always yields the same token.
pub fn constant_token_factory(token: String) -> AccessTokenFactory {
    Arc::new(move || {
        let token = token.clone();
        let future: BoxFuture<'static, Result<String>> = Box::pin(async move { Ok(token) });
        future
    })
}

/// Reads the current token, if a provider is installed and yields one.
pub(crate) async fn current_token(slot: &TokenFactorySlot) -> Result<Option<String>> {
    let factory = slot.read().await.clone();
    match factory {
        Some(factory) => {
            let token = factory().await?;
            Ok(if token.is_empty() { None } else { Some(token) })
        }
        None => Ok(None),
    }
}

/// Wraps an inner [`HttpClient`] and injects bearer tokens.
///
/// On a 401 the provider is re-invoked once and the request replayed with
/// the fresh token; a second 401 is returned to the caller.
pub struct AccessTokenHttpClient {
    inner: Arc<dyn HttpClient>,
    token_factory: TokenFactorySlot,
}

impl AccessTokenHttpClient {
    /// Wraps `inner`, sourcing tokens from the shared `token_factory` slot.
    pub fn new(inner: Arc<dyn HttpClient>, token_factory: TokenFactorySlot) -> Self {
        Self {
            inner,
            token_factory,
        }
    }

    fn apply_token(request: &mut HttpRequest, token: Option<&str>) {
        match token {
            Some(token) => {
                request
                    .headers
                    .insert("Authorization".into(), format!("Bearer {token}"));
            }
            None => {
                request.headers.remove("Authorization");
            }
        }
    }
}

#[async_trait]
impl HttpClient for AccessTokenHttpClient {
    async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        let has_factory = self.token_factory.read().await.is_some();
        let token = current_token(&self.token_factory).await?;
        Self::apply_token(&mut request, token.as_deref());

        let response = self.inner.send(request.clone()).await?;
        if response.status != 401 || !has_factory {
            return Ok(response);
        }

        debug!(url = %request.url, "request rejected with 401, refreshing access token");
        let token = current_token(&self.token_factory).await?;
        Self::apply_token(&mut request, token.as_deref());
        self.inner.send(request).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Scripted inner client: records requests, replays queued responses.
    struct ScriptedClient {
        requests: Arc<StdMutex<Vec<HttpRequest>>>,
        responses: StdMutex<Vec<HttpResponse>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<HttpResponse>) -> (Arc<Self>, Arc<StdMutex<Vec<HttpRequest>>>) {
            let requests = Arc::new(StdMutex::new(Vec::new()));
            let client = Arc::new(Self {
                requests: Arc::clone(&requests),
                responses: StdMutex::new(responses),
            });
            (client, requests)
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(HttpResponse {
                    status: 200,
                    body: Vec::new(),
                });
            }
            Ok(responses.remove(0))
        }
    }

    fn slot_with(token: &str) -> TokenFactorySlot {
        Arc::new(RwLock::new(Some(constant_token_factory(token.to_string()))))
    }

    #[tokio::test]
    async fn token_is_attached_as_bearer_header() {
        let (inner, requests) = ScriptedClient::new(vec![]);
        let client = AccessTokenHttpClient::new(inner, slot_with("secret"));

        client
            .send(HttpRequest::new(HttpMethod::Post, "http://example/negotiate"))
            .await
            .unwrap();

        let seen = requests.lock().unwrap();
        assert_eq!(
            seen[0].headers.get("Authorization").map(String::as_str),
            Some("Bearer secret")
        );
    }

    #[tokio::test]
    async fn empty_token_sends_no_header() {
        let (inner, requests) = ScriptedClient::new(vec![]);
        let client = AccessTokenHttpClient::new(inner, slot_with(""));

        client
            .send(HttpRequest::new(HttpMethod::Get, "http://example/poll"))
            .await
            .unwrap();

        let seen = requests.lock().unwrap();
        assert!(!seen[0].headers.contains_key("Authorization"));
    }

    #[tokio::test]
    async fn unauthorized_response_is_replayed_once() {
        let (inner, requests) = ScriptedClient::new(vec![
            HttpResponse {
                status: 401,
                body: Vec::new(),
            },
            HttpResponse {
                status: 200,
                body: b"ok".to_vec(),
            },
        ]);
        let client = AccessTokenHttpClient::new(inner, slot_with("secret"));

        let response = client
            .send(HttpRequest::new(HttpMethod::Post, "http://example/negotiate"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_unauthorized_response_is_propagated() {
        let (inner, requests) = ScriptedClient::new(vec![
            HttpResponse {
                status: 401,
                body: Vec::new(),
            },
            HttpResponse {
                status: 401,
                body: Vec::new(),
            },
        ]);
        let client = AccessTokenHttpClient::new(inner, slot_with("secret"));

        let response = client
            .send(HttpRequest::new(HttpMethod::Post, "http://example/negotiate"))
            .await
            .unwrap();

        assert_eq!(response.status, 401);
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn no_factory_means_no_retry() {
        let (inner, requests) = ScriptedClient::new(vec![HttpResponse {
            status: 401,
            body: Vec::new(),
        }]);
        let slot: TokenFactorySlot = Arc::new(RwLock::new(None));
        let client = AccessTokenHttpClient::new(inner, slot);

        let response = client
            .send(HttpRequest::new(HttpMethod::Get, "http://example/poll"))
            .await
            .unwrap();

        assert_eq!(response.status, 401);
        assert_eq!(requests.lock().unwrap().len(), 1);
    }
}
