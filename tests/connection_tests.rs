#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Connection lifecycle tests driven by a scripted negotiate client and
//! local WebSocket servers: redirects, cancellation, transport fallback,
//! close propagation, and send ordering.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use common::{
    negotiate_long_polling, negotiate_redirect, negotiate_websockets, MockHubServer,
    ScriptedHttpClient, ScriptedResponse,
};
use signalr_client::{
    ConnectionConfig, ConnectionStatus, HttpConnection, NegotiateError, Payload,
    SignalRClientError, TransferFormat, TransportTypes,
};

fn connection_with(
    url: impl Into<String>,
    responses: Vec<ScriptedResponse>,
) -> (HttpConnection, Arc<StdMutex<Vec<signalr_client::HttpRequest>>>) {
    let (http, requests) = ScriptedHttpClient::new(responses);
    let config = ConnectionConfig::new(url).with_http_client(http);
    (HttpConnection::new(config), requests)
}

// ════════════════════════════════════════════════════════════════════
// Negotiate redirects and connect URL synthesis
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn negotiate_redirect_is_followed_and_id_reaches_the_websocket_url() {
    let server = MockHubServer::start().await;
    let (connection, requests) = connection_with(
        "http://first.example/chat",
        vec![
            ScriptedResponse::ok(negotiate_redirect(&server.url())),
            ScriptedResponse::ok(negotiate_websockets("C")),
        ],
    );

    connection.start(TransferFormat::Text).await.unwrap();

    {
        let seen = requests.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0].url,
            "http://first.example/chat/negotiate?negotiateVersion=1"
        );
        assert_eq!(
            seen[1].url,
            format!(
                "http://127.0.0.1:{}/negotiate?negotiateVersion=1",
                server.port
            )
        );
    }

    // The ws upgrade carries the connection token from the second hop.
    assert_eq!(server.request_uris(), vec!["/?id=C".to_string()]);
    assert_eq!(connection.connection_id().await.as_deref(), Some("C"));

    connection.stop(None).await.unwrap();
    assert_eq!(connection.state().await, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn negotiate_access_token_is_used_for_the_websocket_upgrade() {
    let server = MockHubServer::start().await;
    let negotiate_body = r#"{"connectionId":"C","accessToken":"issued-token","availableTransports":[{"transport":"WebSockets","transferFormats":["Text"]}]}"#;
    let (connection, _requests) =
        connection_with(server.url(), vec![ScriptedResponse::ok(negotiate_body)]);

    connection.start(TransferFormat::Text).await.unwrap();

    assert_eq!(
        server.authorizations(),
        vec![Some("Bearer issued-token".to_string())]
    );
    connection.stop(None).await.unwrap();
}

#[tokio::test]
async fn negotiate_rejection_is_surfaced() {
    let (connection, _requests) = connection_with(
        "http://h/hub",
        vec![ScriptedResponse::ok(r#"{"error":"denied by policy"}"#)],
    );
    let err = connection.start(TransferFormat::Text).await.unwrap_err();
    assert!(matches!(
        err,
        SignalRClientError::Negotiate(NegotiateError::Rejected(_))
    ));
    assert_eq!(connection.state().await, ConnectionStatus::Disconnected);
}

// ════════════════════════════════════════════════════════════════════
// Cancellation
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn stop_during_negotiate_cancels_start_without_firing_on_close() {
    let (connection, _requests) = connection_with(
        "http://h/hub",
        vec![ScriptedResponse::ok(negotiate_websockets("C"))
            .delayed(Duration::from_millis(200))],
    );

    let close_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&close_count);
    connection.set_on_close(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let starter = connection.clone();
    let start_task =
        tokio::spawn(async move { starter.start(TransferFormat::Text).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    connection.stop(None).await.unwrap();

    let outcome = start_task.await.unwrap();
    assert!(matches!(outcome, Err(SignalRClientError::Cancelled)));
    assert_eq!(connection.state().await, ConnectionStatus::Disconnected);
    assert_eq!(close_count.load(Ordering::SeqCst), 0);
}

// ════════════════════════════════════════════════════════════════════
// Transport selection
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn transport_disabled_by_the_client_yields_no_transport_available() {
    let (http, _requests) = ScriptedHttpClient::new(vec![ScriptedResponse::ok(
        negotiate_long_polling("C"),
    )]);
    let config = ConnectionConfig::new("http://h/hub")
        .with_http_client(http)
        .with_transports(TransportTypes::WEB_SOCKETS);
    let connection = HttpConnection::new(config);

    let err = connection.start(TransferFormat::Text).await.unwrap_err();
    match &err {
        SignalRClientError::NoTransportAvailable(failures) => {
            assert_eq!(failures.0.len(), 1);
            assert_eq!(failures.0[0].transport, "LongPolling");
            assert_eq!(failures.0[0].reason, "'LongPolling' is disabled by the client");
        }
        other => panic!("expected NoTransportAvailable, got {other:?}"),
    }
    assert_eq!(connection.state().await, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn failing_transport_is_collected_into_the_composite_error() {
    // Offer WebSockets against a port nothing listens on.
    let (connection, _requests) = connection_with(
        "http://127.0.0.1:9/hub",
        vec![ScriptedResponse::ok(negotiate_websockets("C"))],
    );
    let err = connection.start(TransferFormat::Text).await.unwrap_err();
    match &err {
        SignalRClientError::NoTransportAvailable(failures) => {
            assert_eq!(failures.0.len(), 1);
            assert!(failures.0[0].reason.starts_with("'WebSockets' failed"));
        }
        other => panic!("expected NoTransportAvailable, got {other:?}"),
    }
}

#[tokio::test]
async fn unrequested_stateful_reconnect_fails_the_start() {
    let (connection, _requests) = connection_with(
        "http://h/hub",
        vec![ScriptedResponse::ok(
            r#"{"connectionId":"C","negotiateVersion":1,"connectionToken":"C","useStatefulReconnect":true}"#,
        )],
    );
    let err = connection.start(TransferFormat::Text).await.unwrap_err();
    assert!(matches!(
        err,
        SignalRClientError::Negotiate(NegotiateError::StatefulReconnectMismatch)
    ));
}

// ════════════════════════════════════════════════════════════════════
// Steady state: receive order, send order, close propagation
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn inbound_payloads_arrive_in_order_and_remote_close_fires_on_close_once() {
    let url = common::server_that_sends_then_closes(vec![
        "f1".to_string(),
        "f2".to_string(),
        "f3".to_string(),
    ])
    .await;

    let (connection, _requests) =
        connection_with(url, vec![ScriptedResponse::ok(negotiate_websockets("C"))]);

    let received = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    connection.set_on_receive(move |payload| {
        if let Payload::Text(text) = payload {
            sink.lock().unwrap().push(text);
        }
    });

    let close_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&close_count);
    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    let closed_tx = StdMutex::new(Some(closed_tx));
    connection.set_on_close(move |error| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = closed_tx.lock().unwrap().take() {
            let _ = tx.send(error);
        }
    });

    connection.start(TransferFormat::Text).await.unwrap();
    // The server replies to the first message and then closes.
    connection
        .send(Payload::Text("go\u{1e}".into()))
        .await
        .unwrap();

    // Clean remote close: no error, exactly one callback.
    let close_error = closed_rx.await.unwrap();
    assert!(close_error.is_none());
    assert_eq!(close_count.load(Ordering::SeqCst), 1);
    assert_eq!(connection.state().await, ConnectionStatus::Disconnected);
    assert_eq!(
        *received.lock().unwrap(),
        vec!["f1".to_string(), "f2".to_string(), "f3".to_string()]
    );

    // Stopping after the fact stays a no-op.
    connection.stop(None).await.unwrap();
    assert_eq!(close_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sends_reach_the_server_in_program_order() {
    let server = MockHubServer::start().await;
    let (connection, _requests) = connection_with(
        server.url(),
        vec![ScriptedResponse::ok(negotiate_websockets("C"))],
    );

    connection.start(TransferFormat::Text).await.unwrap();

    for i in 0..5 {
        connection
            .send(Payload::Text(format!("payload-{i}\u{1e}")))
            .await
            .unwrap();
    }

    // Flushed does not mean read on the other side yet; give the server a
    // bounded window to drain the socket.
    let mut received = server.received();
    for _ in 0..100 {
        if received.concat().matches('\u{1e}').count() >= 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        received = server.received();
    }
    let all: String = received.concat();
    assert_eq!(
        all,
        "payload-0\u{1e}payload-1\u{1e}payload-2\u{1e}payload-3\u{1e}payload-4\u{1e}"
    );

    connection.stop(None).await.unwrap();
}

#[tokio::test]
async fn caller_supplied_stop_error_reaches_on_close() {
    let server = MockHubServer::start().await;
    let (connection, _requests) = connection_with(
        server.url(),
        vec![ScriptedResponse::ok(negotiate_websockets("C"))],
    );

    let (closed_tx, closed_rx) = tokio::sync::oneshot::channel();
    let closed_tx = StdMutex::new(Some(closed_tx));
    connection.set_on_close(move |error| {
        if let Some(tx) = closed_tx.lock().unwrap().take() {
            let _ = tx.send(error);
        }
    });

    connection.start(TransferFormat::Text).await.unwrap();
    connection
        .stop(Some(SignalRClientError::Http("giving up".into())))
        .await
        .unwrap();

    let close_error = closed_rx.await.unwrap();
    match close_error {
        Some(SignalRClientError::Http(reason)) => assert_eq!(reason, "giving up"),
        other => panic!("expected the stop error, got {other:?}"),
    }
}

// ════════════════════════════════════════════════════════════════════
// State machine edges
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn start_while_connected_is_invalid_state() {
    let server = MockHubServer::start().await;
    let (connection, _requests) = connection_with(
        server.url(),
        vec![ScriptedResponse::ok(negotiate_websockets("C"))],
    );

    connection.start(TransferFormat::Text).await.unwrap();
    let err = connection.start(TransferFormat::Text).await.unwrap_err();
    assert!(matches!(err, SignalRClientError::InvalidState(_)));

    connection.stop(None).await.unwrap();
}

#[tokio::test]
async fn connection_can_be_restarted_after_stop() {
    let server = MockHubServer::start().await;
    let (http, _requests) = ScriptedHttpClient::new(vec![
        ScriptedResponse::ok(negotiate_websockets("C1")),
        ScriptedResponse::ok(negotiate_websockets("C2")),
    ]);
    let connection =
        HttpConnection::new(ConnectionConfig::new(server.url()).with_http_client(http));

    connection.start(TransferFormat::Text).await.unwrap();
    assert_eq!(connection.connection_id().await.as_deref(), Some("C1"));
    connection.stop(None).await.unwrap();

    connection.start(TransferFormat::Text).await.unwrap();
    assert_eq!(connection.connection_id().await.as_deref(), Some("C2"));
    connection.stop(None).await.unwrap();

    assert_eq!(
        server.request_uris(),
        vec!["/?id=C1".to_string(), "/?id=C2".to_string()]
    );
}

#[tokio::test]
async fn send_after_stop_is_invalid_state() {
    let server = MockHubServer::start().await;
    let (connection, _requests) = connection_with(
        server.url(),
        vec![ScriptedResponse::ok(negotiate_websockets("C"))],
    );

    connection.start(TransferFormat::Text).await.unwrap();
    connection.stop(None).await.unwrap();

    let err = connection
        .send(Payload::Text("late\u{1e}".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, SignalRClientError::InvalidState(_)));
}
