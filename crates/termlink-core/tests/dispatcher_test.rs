// Command dispatcher routing. Real adapters against wiremock for the
// one-shot conventions; fake transports where an open channel is needed.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use serde_json::{Map, Value, json};
use termlink_api::{OneShotPath, StaticToken, TransportConfig};
use termlink_core::{
    CaptureMode, CommandDispatcher, ConnectionManager, ConnectionMode, CoreError,
    DefaultTransportFactory, DispatcherConfig, Endpoint, EnvironmentKind, LogLevel, ManagerConfig,
    SpecialRoute, TerminalId,
};
use url::Url;
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{Harness, next_event, next_outbound, next_peer, push_frame, recorder};

// ── Helpers ─────────────────────────────────────────────────────────

fn dispatcher(mode: ConnectionMode, relay: Option<Url>) -> CommandDispatcher {
    let factory = Arc::new(DefaultTransportFactory::new(
        relay.clone(),
        Arc::new(StaticToken::anonymous()),
        TransportConfig::default(),
    ));
    let config = ManagerConfig {
        mode,
        relay_url: relay,
        ..ManagerConfig::default()
    };
    CommandDispatcher::new(
        ConnectionManager::new(config, factory),
        DispatcherConfig::default(),
    )
}

fn endpoint_of(server: &MockServer) -> Endpoint {
    server.address().to_string().parse().unwrap()
}

fn local_on(server: &MockServer) -> CommandDispatcher {
    dispatcher(ConnectionMode::local(endpoint_of(server)), None)
}

fn relay_on(server: &MockServer, id: u32) -> CommandDispatcher {
    dispatcher(
        ConnectionMode::remote(TerminalId::new(id).unwrap()),
        Some(Url::parse(&server.uri()).unwrap()),
    )
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn local_command_posts_a_control_action_without_a_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/control"))
        .and(body_json(json!({"action": "start", "mode": "push"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = local_on(&server);
    let reply = dispatcher
        .send_command("start", params(json!({"mode": "push"})))
        .await
        .unwrap();

    assert_eq!(reply, json!({"success": true}));
    assert!(!dispatcher.manager().is_open());
}

#[tokio::test]
async fn action_name_wins_over_an_action_param() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/control"))
        .and(body_json(json!({"action": "stop"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    local_on(&server)
        .send_command("stop", params(json!({"action": "start"})))
        .await
        .unwrap();
}

#[tokio::test]
async fn update_config_posts_params_to_the_config_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/config"))
        .and(body_json(json!({"interval": 10, "mode": "pull"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    local_on(&server)
        .save_config(params(json!({"interval": 10, "mode": "pull"})))
        .await
        .unwrap();
}

#[tokio::test]
async fn special_routes_are_configurable() {
    let h = Harness::new(ConnectionMode::local(Endpoint::default()));
    let mut special_routes = IndexMap::new();
    special_routes.insert("set_cameras".to_owned(), SpecialRoute::Config);
    let dispatcher = CommandDispatcher::new(
        h.manager.clone(),
        DispatcherConfig {
            special_routes,
            ..DispatcherConfig::default()
        },
    );

    dispatcher
        .send_command("set_cameras", params(json!({"cameras": {"1": "gate"}})))
        .await
        .unwrap();
    dispatcher
        .send_command("update_config", params(json!({"interval": 2})))
        .await
        .unwrap();

    assert_eq!(
        h.local.calls_to(OneShotPath::Config),
        vec![Some(json!({"cameras": {"1": "gate"}}))]
    );
    assert_eq!(
        h.local.calls_to(OneShotPath::Control),
        vec![Some(json!({"interval": 2, "action": "update_config"}))]
    );
}

#[tokio::test]
async fn relay_commands_use_the_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/terminals/7/command/"))
        .and(body_partial_json(json!({
            "command": "start",
            "params": {"mode": "push"},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let reply = relay_on(&server, 7)
        .send_command("start", params(json!({"mode": "push"})))
        .await
        .unwrap();
    assert_eq!(reply["success"], true);

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body["timestamp"].is_string());
}

// ── Reads ───────────────────────────────────────────────────────────

#[tokio::test]
async fn relay_status_falls_back_to_a_request_when_the_endpoint_is_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/terminals/7/status/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/terminals/7/command/"))
        .and(body_partial_json(json!({"command": "get_status"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"cpu": "33.5", "push_running": true},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let status = relay_on(&server, 7).get_status().await.unwrap();
    assert_eq!(status.cpu_usage, 33.5);
    assert!(status.push_running);
}

#[tokio::test]
async fn relay_status_failures_other_than_missing_are_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/terminals/7/status/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = relay_on(&server, 7).get_status().await.unwrap_err();
    assert!(matches!(err, CoreError::Http { status: 500, .. }));
}

#[tokio::test]
async fn relay_config_without_a_channel_is_a_one_shot_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/terminals/7/command/"))
        .and(body_partial_json(json!({"command": "get_config"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {"mode": "pull", "interval": 3}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = relay_on(&server, 7).get_config().await.unwrap();
    assert_eq!(config.mode, CaptureMode::Pull);
    assert_eq!(config.interval, 3);
    assert!(config.save_image);
}

#[tokio::test]
async fn relay_config_uses_the_open_channel() {
    let mut h = Harness::new(ConnectionMode::remote(TerminalId::new(7).unwrap()));
    let dispatcher = Arc::new(CommandDispatcher::new(
        h.manager.clone(),
        DispatcherConfig::default(),
    ));
    let (callback, mut rx) = recorder();
    h.manager.connect(callback);
    let mut peer = next_peer(&mut h.remote_peers).await;
    next_event(&mut rx).await;
    next_outbound(&mut peer).await;

    let reader = Arc::clone(&dispatcher);
    let config = tokio::spawn(async move { reader.get_config().await });

    let frame = next_outbound(&mut peer).await;
    assert_eq!(frame["request"], "get_config");
    push_frame(
        &peer,
        json!({
            "type": "response",
            "request_id": frame["request_id"],
            "data": {"mode": "push", "interval": 7},
        }),
    )
    .await;

    let config = config.await.unwrap().unwrap();
    assert_eq!(config.mode, CaptureMode::Push);
    assert_eq!(config.interval, 7);
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn local_logs_are_normalized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "logs": [
                {
                    "timestamp": "2024-05-01T08:00:00Z",
                    "level": "error",
                    "message": "camera offline",
                    "source": "camera",
                },
                "plain line",
            ]
        })))
        .mount(&server)
        .await;

    let logs = local_on(&server).get_logs().await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].level, LogLevel::Error);
    assert_eq!(logs[0].source, "camera");
    assert_eq!(logs[1].message, "plain line");
    assert_eq!(logs[1].level, LogLevel::Info);
}

#[tokio::test]
async fn log_failures_are_not_an_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/logs"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert!(local_on(&server).get_logs().await.is_err());
}

// ── Probing and details ─────────────────────────────────────────────

#[tokio::test]
async fn local_availability_follows_the_status_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let dispatcher = local_on(&server);
    assert!(dispatcher.is_local_available(&endpoint_of(&server)).await);
    assert!(
        !dispatcher
            .is_local_available(&"127.0.0.1:9".parse().unwrap())
            .await
    );
}

#[tokio::test]
async fn local_details_combine_info_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": 3, "name": "Gate A", "version": "1.4.0"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"cpu_usage": 20, "memory_usage": 40})),
        )
        .mount(&server)
        .await;

    let details = local_on(&server).get_terminal_details().await;
    assert_eq!(details.id, 3);
    assert_eq!(details.name, "Gate A");
    assert!(details.online);
    assert_eq!(details.cpu_usage, 20.0);
    assert_eq!(details.memory_usage, 40.0);
    assert_eq!(details.version.as_deref(), Some("1.4.0"));
}

#[tokio::test]
async fn relay_details_fall_back_to_an_offline_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/terminals/7/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": true,
            "cpu_usage": 5,
            "last_active": "2024-05-01T08:00:00Z",
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    let dispatcher = relay_on(&server, 7);
    let details = dispatcher.get_terminal_details().await;
    assert_eq!(details.name, "Terminal #7");
    assert!(details.online);
    assert_eq!(details.last_active.as_deref(), Some("2024-05-01T08:00:00Z"));

    // Second lookup hits wiremock's default 404.
    let details = dispatcher.get_terminal_details().await;
    assert_eq!(details.id, 7);
    assert_eq!(details.name, "Terminal #7");
    assert!(!details.online);
}

// ── Environment detection ───────────────────────────────────────────

#[tokio::test]
async fn detection_follows_a_local_terminal_into_remote_mode() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/environment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "detector",
            "id": 3,
            "name": "Gate A",
            "version": "1.4.0",
            "terminal_mode": "remote",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = local_on(&server);
    let env = dispatcher.detect_environment().await;
    assert_eq!(env.kind, EnvironmentKind::Detector);
    assert_eq!(env.id, 3);
    assert_eq!(
        dispatcher.manager().mode(),
        ConnectionMode::remote(TerminalId::new(3).unwrap())
    );

    // Cached: no second environment lookup.
    assert_eq!(dispatcher.detect_environment().await, env);
}

#[tokio::test]
async fn detection_uses_the_relay_when_no_local_terminal_answers() {
    let relay = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/environment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "server",
            "id": 4,
            "name": "Campus relay",
            "version": "2.0",
        })))
        .mount(&relay)
        .await;

    let dispatcher = dispatcher(
        ConnectionMode::local("127.0.0.1:9".parse().unwrap()),
        Some(Url::parse(&relay.uri()).unwrap()),
    );
    let env = dispatcher.detect_environment().await;
    assert_eq!(env.kind, EnvironmentKind::Server);
    assert_eq!(env.name, "Campus relay");
    assert_eq!(
        dispatcher.manager().mode(),
        ConnectionMode::remote(TerminalId::new(4).unwrap())
    );
}

#[tokio::test]
async fn detection_defaults_to_the_server_profile() {
    let relay = MockServer::start().await;

    let dispatcher = dispatcher(
        ConnectionMode::local("127.0.0.1:9".parse().unwrap()),
        Some(Url::parse(&relay.uri()).unwrap()),
    );
    let env = dispatcher.detect_environment().await;
    assert_eq!(env.kind, EnvironmentKind::Server);
    assert_eq!(env.id, 1);
    assert!(!env.features.local_detection);
    assert!(env.features.websocket);
    assert_eq!(
        dispatcher.manager().mode(),
        ConnectionMode::remote(TerminalId::FIRST)
    );
}
