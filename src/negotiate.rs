//! Negotiation with the SignalR server.
//!
//! Before a transport is started the client POSTs to the `/negotiate`
//! endpoint to learn the connection token and the set of transports the
//! server will accept. This module builds the negotiate and connect URLs
//! from structured components, issues the request, and decodes and
//! normalises the response. Redirect-following and access-token rules live
//! in the connection state machine, which calls [`negotiate`] per hop.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{NegotiateError, Result};
use crate::http::{HttpClient, HttpMethod, HttpRequest};

/// Default `User-Agent` sent with negotiate requests; caller headers with
/// the same name win.
pub(crate) fn user_agent() -> String {
    format!("SignalR-Client-Rust/{}", env!("CARGO_PKG_VERSION"))
}

/// One transport offer inside a negotiate response.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    /// Transport name, e.g. `"WebSockets"`.
    pub transport: String,
    /// Transfer formats the server supports on this transport.
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// Decoded response of the `/negotiate` endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    /// Identifier the server assigned to this connection.
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Token echoed back as the `id` query parameter on the connect URL.
    /// Servers speaking negotiate version 0 omit it; see
    /// [`NegotiateResponse::normalize`].
    #[serde(default)]
    pub connection_token: Option<String>,
    /// Negotiate protocol version the server speaks.
    #[serde(default)]
    pub negotiate_version: Option<i32>,
    /// Transports the server will accept, in preference order.
    #[serde(default)]
    pub available_transports: Option<Vec<AvailableTransport>>,
    /// Redirect target; the client must renegotiate against this URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Replacement bearer token for the remainder of the connection.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Server-reported negotiation failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Whether the server enabled stateful reconnect.
    #[serde(default)]
    pub use_stateful_reconnect: Option<bool>,
}

impl NegotiateResponse {
    /// Applies the version-compatibility rule: servers that do not report
    /// `negotiateVersion >= 1` never send a `connectionToken`, so the
    /// `connectionId` doubles as the token.
    pub fn normalize(mut self) -> Self {
        if self.negotiate_version.unwrap_or(0) < 1 {
            self.connection_token = self.connection_id.clone();
        }
        self
    }
}

/// Options the negotiate request needs from the connection configuration.
#[derive(Debug, Clone, Default)]
pub(crate) struct NegotiateOptions {
    /// Extra request headers; override the default `User-Agent`.
    pub headers: HashMap<String, String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
    /// Forwarded to the HTTP client.
    pub with_credentials: bool,
    /// Whether the client asked for stateful reconnect.
    pub use_stateful_reconnect: bool,
}

/// Builds the negotiate URL for `base`: path gains a single `/negotiate`
/// segment, the existing query is preserved, and the protocol version (plus
/// the stateful-reconnect opt-in) is appended.
pub(crate) fn negotiate_url(base: &Url, use_stateful_reconnect: bool) -> Url {
    let mut url = base.clone();
    let mut path = url.path().trim_end_matches('/').to_string();
    path.push_str("/negotiate");
    url.set_path(&path);
    url.set_fragment(None);
    url.query_pairs_mut().append_pair("negotiateVersion", "1");
    if use_stateful_reconnect {
        url.query_pairs_mut()
            .append_pair("useStatefulReconnect", "true");
    }
    url
}

/// Builds the connect URL: `base` with `id=<connection token>` appended,
/// preserving any existing query parameters.
pub(crate) fn connect_url(base: &Url, connection_token: Option<&str>) -> Url {
    let mut url = base.clone();
    if let Some(token) = connection_token {
        url.query_pairs_mut().append_pair("id", token);
    }
    url
}

/// Performs one negotiate request against `base` and returns the decoded,
/// normalised response.
///
/// # Errors
///
/// Returns [`NegotiateError::Status`] for non-200 responses,
/// [`NegotiateError::Decode`] for unparseable bodies, and
/// [`NegotiateError::StatefulReconnectMismatch`] when the server enables
/// stateful reconnect without the client having requested it.
pub(crate) async fn negotiate(
    http: &dyn HttpClient,
    base: &Url,
    options: &NegotiateOptions,
) -> Result<NegotiateResponse> {
    let url = negotiate_url(base, options.use_stateful_reconnect);
    debug!(url = %url, "negotiating");

    let mut request = HttpRequest::new(HttpMethod::Post, url.as_str());
    request
        .headers
        .insert("User-Agent".into(), user_agent());
    for (name, value) in &options.headers {
        request.headers.insert(name.clone(), value.clone());
    }
    request.timeout = options.timeout;
    request.with_credentials = options.with_credentials;

    let response = http.send(request).await?;
    if response.status != 200 {
        return Err(NegotiateError::Status {
            code: response.status,
        }
        .into());
    }

    let decoded: NegotiateResponse =
        serde_json::from_slice(&response.body).map_err(NegotiateError::Decode)?;
    let decoded = decoded.normalize();

    if decoded.use_stateful_reconnect == Some(true) && !options.use_stateful_reconnect {
        return Err(NegotiateError::StatefulReconnectMismatch.into());
    }

    Ok(decoded)
}
