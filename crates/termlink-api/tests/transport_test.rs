// Integration tests for the local and relay adapters: wiremock for the
// one-shot paths, an in-process tokio-tungstenite server for the channel.

#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use termlink_api::{
    ChannelEvent, CredentialStore, Error, LocalTransport, Method, OneShotPath, RemoteTransport,
    StaticToken, TerminalId, Transport, TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

/// Hands out `stale` first and `fresh` after one refresh.
struct RotatingToken {
    refreshed: AtomicUsize,
}

impl CredentialStore for RotatingToken {
    fn access_token(&self) -> Option<SecretString> {
        let token = if self.refreshed.load(Ordering::SeqCst) == 0 {
            "stale"
        } else {
            "fresh"
        };
        Some(SecretString::from(token.to_owned()))
    }

    fn refresh(&self) -> BoxFuture<'_, Result<SecretString, Error>> {
        Box::pin(async {
            self.refreshed.fetch_add(1, Ordering::SeqCst);
            Ok(SecretString::from("fresh".to_owned()))
        })
    }
}

fn local(endpoint: &str, credentials: Arc<dyn CredentialStore>) -> LocalTransport {
    LocalTransport::new(endpoint, credentials, &TransportConfig::default()).unwrap()
}

fn remote(relay: &str, id: u32) -> RemoteTransport {
    RemoteTransport::new(
        &Url::parse(relay).unwrap(),
        TerminalId::new(id).unwrap(),
        Arc::new(StaticToken::new(SecretString::from("relay-token".to_owned()))),
        &TransportConfig::default(),
    )
    .unwrap()
}

type ServerSocket = WebSocketStream<TcpStream>;

/// Accept one WebSocket connection and hand it, with the upgrade request's
/// path and `Authorization` header, to `handler`.
async fn ws_server<F, Fut>(handler: F) -> SocketAddr
where
    F: FnOnce(ServerSocket, String, Option<String>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (meta_tx, meta_rx) = oneshot::channel();
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let auth = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let _ = meta_tx.send((req.uri().path().to_owned(), auth));
            Ok(resp)
        };
        let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();
        let (path, auth) = meta_rx.await.unwrap();
        handler(ws, path, auth).await;
    });

    addr
}

async fn next_json(ws: &mut ServerSocket) -> Value {
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(_) => panic!("client closed before sending"),
            _ => {}
        }
    }
}

async fn send_text(ws: &mut ServerSocket, text: &str) {
    ws.send(Message::Text(text.to_owned().into())).await.unwrap();
}

// ── One-shot calls ──────────────────────────────────────────────────

#[tokio::test]
async fn local_control_action_posts_without_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/control"))
        .and(body_json(json!({"action": "start", "mode": "push"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = local(&server.uri(), Arc::new(StaticToken::anonymous()));
    let reply = transport
        .send_one_shot(
            OneShotPath::Control,
            Method::POST,
            Some(json!({"action": "start", "mode": "push"})),
        )
        .await
        .unwrap();

    assert_eq!(reply, json!({"success": true}));
}

#[tokio::test]
async fn bearer_is_attached_to_relay_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/terminals/7/status/"))
        .and(header("authorization", "Bearer relay-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"cpu_usage": 3})))
        .expect(1)
        .mount(&server)
        .await;

    let transport = remote(&server.uri(), 7);
    let status = transport
        .send_one_shot(OneShotPath::Status, Method::GET, None)
        .await
        .unwrap();

    assert_eq!(status["cpu_usage"], 3);
}

#[tokio::test]
async fn unauthorized_refreshes_once_and_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"model_loaded": true})))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(RotatingToken {
        refreshed: AtomicUsize::new(0),
    });
    let transport = local(&server.uri(), store.clone());
    let status = transport
        .send_one_shot(OneShotPath::Status, Method::GET, None)
        .await
        .unwrap();

    assert_eq!(status["model_loaded"], true);
    assert_eq!(store.refreshed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_unauthorized_is_auth_required() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/logs"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let store = Arc::new(RotatingToken {
        refreshed: AtomicUsize::new(0),
    });
    let transport = local(&server.uri(), store);
    let err = transport
        .send_one_shot(OneShotPath::Logs, Method::GET, None)
        .await
        .unwrap_err();

    assert!(err.is_auth_required(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn missing_relay_endpoint_reports_endpoint_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/terminals/7/logs/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = remote(&server.uri(), 7)
        .send_one_shot(OneShotPath::Logs, Method::GET, None)
        .await
        .unwrap_err();

    assert!(err.is_endpoint_missing());
}

#[tokio::test]
async fn unreachable_endpoint_is_unreachable() {
    // Port 9 (discard) is closed on test hosts.
    let transport = local("127.0.0.1:9", Arc::new(StaticToken::anonymous()));
    let err = transport
        .send_one_shot(OneShotPath::Status, Method::GET, None)
        .await
        .unwrap_err();
    assert!(err.is_unreachable(), "unexpected error: {err:?}");

    let open_err = transport.open().await.err().unwrap();
    assert!(open_err.is_unreachable());
}

// ── Channel ─────────────────────────────────────────────────────────

#[tokio::test]
async fn local_channel_greets_maps_events_and_drops_garbage() {
    let (greeting_tx, greeting_rx) = oneshot::channel();

    let addr = ws_server(|mut ws, path, _auth| async move {
        assert_eq!(path, "/ws");
        let greeting = next_json(&mut ws).await;
        let _ = greeting_tx.send(greeting);

        send_text(
            &mut ws,
            r#"{"event":"system_status","data":{"cpu_usage":41.5,"model_loaded":true}}"#,
        )
        .await;
        send_text(&mut ws, "this is not json").await;
        send_text(&mut ws, "[1, 2]").await;
        send_text(&mut ws, r#"{"event":"new_log","data":{"message":"started"}}"#).await;
        ws.close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: Utf8Bytes::from_static("rebooting"),
        }))
        .await
        .unwrap();
    })
    .await;

    let transport = local(&addr.to_string(), Arc::new(StaticToken::anonymous()));
    let mut channel = transport.open().await.unwrap();

    let greeting = greeting_rx.await.unwrap();
    assert_eq!(greeting["type"], "client_connected");
    assert_eq!(greeting["client_id"], "web_client");

    let Some(ChannelEvent::Frame(status)) = channel.next().await else {
        panic!("expected status frame");
    };
    assert_eq!(status["type"], "status");
    assert_eq!(status["data"]["cpu_usage"], 41.5);

    let Some(ChannelEvent::Frame(log)) = channel.next().await else {
        panic!("expected log frame");
    };
    assert_eq!(log["type"], "log");

    let Some(ChannelEvent::Closed(reason)) = channel.next().await else {
        panic!("expected close");
    };
    assert_eq!(reason.code, Some(1001));
    assert_eq!(reason.reason, "rebooting");
}

#[tokio::test]
async fn relay_channel_authenticates_first_and_carries_outbound_frames() {
    let (seen_tx, seen_rx) = oneshot::channel();

    let addr = ws_server(|mut ws, path, auth| async move {
        let first = next_json(&mut ws).await;
        let second = next_json(&mut ws).await;
        let _ = seen_tx.send((path, auth, first, second));
        send_text(
            &mut ws,
            r#"{"type":"status","timestamp":"2026-01-01T00:00:00Z","data":{"cpu_usage":5}}"#,
        )
        .await;
        // Hold the socket open until the client hangs up.
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;

    let transport = remote(&format!("http://{addr}"), 7);
    let mut channel = transport.open().await.unwrap();
    channel
        .sender()
        .send(transport.status_request_frame())
        .await
        .unwrap();

    let (path, auth, first, second) = seen_rx.await.unwrap();
    assert_eq!(path, "/ws/terminal/7/");
    assert_eq!(auth.as_deref(), Some("Bearer relay-token"));
    assert_eq!(first, json!({"type": "authenticate", "terminal_id": 7}));
    assert_eq!(second["request"], "get_status");

    let Some(ChannelEvent::Frame(frame)) = channel.next().await else {
        panic!("expected relay frame");
    };
    assert_eq!(frame["data"]["cpu_usage"], 5);

    transport.close();
    assert!(channel.close_token().is_cancelled());
}
