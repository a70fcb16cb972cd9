// Local direct-link transport
//
// Talks to a terminal on the same network. The persistent channel lives at
// `ws://{endpoint}/ws` and speaks Socket.IO-style `{event, data}` frames,
// which are rewritten here into the canonical `{type, data, timestamp}`
// shape. One-shot calls use the terminal's `/api/*` paths.

use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::auth::CredentialStore;
use crate::channel::{self, Channel};
use crate::error::Error;
use crate::http::OneShotClient;
use crate::transport::{
    CommandStyle, Conventions, Method, ModeKind, OneShotPath, ReadRoute, Transport,
    TransportConfig,
};

/// Identifier the terminal shows for this client in its connection list.
pub const LOCAL_CLIENT_ID: &str = "web_client";

/// Port the terminal's web service listens on by default.
pub const DEFAULT_LOCAL_PORT: u16 = 5000;

/// Socket.IO event name → canonical frame type.
const EVENT_TYPES: &[(&str, &str)] = &[
    ("system_status", "status"),
    ("system_resources", "status"),
    ("system_update", "update"),
    ("system_message", "message"),
    ("system_error", "error"),
    ("new_log", "log"),
    ("detection_result", "detection"),
    ("stats_update", "stats"),
    ("camera_status", "camera_status"),
];

/// Direct link to a terminal at `host:port`.
pub struct LocalTransport {
    endpoint: String,
    ws_url: Url,
    client: OneShotClient,
    active: Mutex<Option<CancellationToken>>,
}

impl LocalTransport {
    /// Create an adapter for `endpoint` (`host:port`, optionally with an
    /// `http://` or `https://` prefix).
    pub fn new(
        endpoint: &str,
        credentials: Arc<dyn CredentialStore>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let base = endpoint_url(endpoint)?;
        let ws_url = websocket_url(&base)?;
        let client = OneShotClient::new(base, credentials, transport)?;
        Ok(Self {
            endpoint: strip_scheme(endpoint).to_owned(),
            ws_url,
            client,
            active: Mutex::new(None),
        })
    }

    /// URL of the persistent channel.
    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    async fn open_channel(&self) -> Result<Channel, Error> {
        let token = self.client_token();
        let greeting = vec![json!({
            "type": "client_connected",
            "client_id": LOCAL_CLIENT_ID,
            "timestamp": now(),
        })];

        let channel =
            channel::open_websocket(&self.ws_url, token.as_ref(), greeting, map_local_frame)
                .await?;

        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(channel.close_token());
        if let Some(previous) = previous {
            previous.cancel();
        }
        Ok(channel)
    }

    fn client_token(&self) -> Option<secrecy::SecretString> {
        self.client.credentials().access_token()
    }
}

impl Transport for LocalTransport {
    fn mode_kind(&self) -> ModeKind {
        ModeKind::Local
    }

    fn conventions(&self) -> Conventions {
        Conventions {
            commands: CommandStyle::ControlAction,
            status: ReadRoute::Endpoint,
            config: ReadRoute::Endpoint,
            logs: ReadRoute::Endpoint,
        }
    }

    fn open(&self) -> BoxFuture<'_, Result<Channel, Error>> {
        Box::pin(self.open_channel())
    }

    fn send_one_shot(
        &self,
        path: OneShotPath,
        method: Method,
        body: Option<Value>,
    ) -> BoxFuture<'_, Result<Value, Error>> {
        Box::pin(async move {
            let path = path_for(path)?;
            self.client.request(method, path, body.as_ref()).await
        })
    }

    fn status_request_frame(&self) -> Value {
        json!({
            "type": "request_status",
            "client_id": LOCAL_CLIENT_ID,
            "timestamp": now(),
        })
    }

    fn close(&self) {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = active {
            debug!(endpoint = %self.endpoint, "closing local channel");
            token.cancel();
        }
    }
}

fn path_for(path: OneShotPath) -> Result<&'static str, Error> {
    match path {
        OneShotPath::Status => Ok("api/status"),
        OneShotPath::Config => Ok("api/config"),
        OneShotPath::Logs => Ok("api/logs"),
        OneShotPath::Control => Ok("api/control"),
        OneShotPath::Details => Ok("api/info"),
        OneShotPath::Environment => Ok("api/environment"),
        OneShotPath::SwitchMode => Ok("api/switch_mode"),
        OneShotPath::Command => Err(Error::UnsupportedOperation(
            "command envelopes are a relay convention",
        )),
    }
}

// ── Addressing ───────────────────────────────────────────────────────

fn strip_scheme(endpoint: &str) -> &str {
    endpoint
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/')
}

/// Parse a local endpoint into the HTTP base URL of the terminal.
///
/// A bare host gets the default port.
pub fn endpoint_url(endpoint: &str) -> Result<Url, Error> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let mut url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Url::parse(trimmed)?
    } else {
        Url::parse(&format!("http://{trimmed}"))?
    };
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidUrl(url::ParseError::EmptyHost));
    }
    if url.port().is_none() && url.scheme() == "http" {
        let _ = url.set_port(Some(DEFAULT_LOCAL_PORT));
    }
    Ok(url)
}

fn websocket_url(base: &Url) -> Result<Url, Error> {
    let mut url = base.join("/ws")?;
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot derive {scheme} URL from {base}")))?;
    Ok(url)
}

// ── Frame mapping ────────────────────────────────────────────────────

/// Rewrite a Socket.IO-style `{event, data}` frame into `{type, data, timestamp}`.
///
/// Frames that already carry a `type` pass through untouched. Unknown event
/// names keep their name as the type.
pub fn map_local_frame(frame: Value) -> Option<Value> {
    if frame.get("type").is_some_and(Value::is_string) {
        return Some(frame);
    }

    let Some(event) = frame.get("event").and_then(Value::as_str) else {
        debug!(%frame, "local frame without event name");
        return None;
    };

    let kind = EVENT_TYPES
        .iter()
        .find(|(name, _)| *name == event)
        .map_or(event, |(_, kind)| *kind)
        .to_owned();

    let data = frame.get("data").cloned().unwrap_or(Value::Null);
    let timestamp = data
        .get("timestamp")
        .or_else(|| frame.get("timestamp"))
        .cloned()
        .unwrap_or_else(|| Value::String(now()));

    Some(json!({
        "type": kind,
        "event": event,
        "data": data,
        "timestamp": timestamp,
    }))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn endpoint_accepts_bare_and_prefixed_addresses() {
        assert_eq!(
            endpoint_url("192.168.1.20:5000").unwrap().as_str(),
            "http://192.168.1.20:5000/"
        );
        assert_eq!(
            endpoint_url("http://localhost:8080/").unwrap().as_str(),
            "http://localhost:8080/"
        );
        assert_eq!(
            endpoint_url("terminal.lan").unwrap().as_str(),
            "http://terminal.lan:5000/"
        );
        assert_eq!(strip_scheme("http://localhost:5000/"), "localhost:5000");
    }

    #[test]
    fn websocket_url_follows_http_scheme() {
        let plain = websocket_url(&endpoint_url("localhost:5000").unwrap()).unwrap();
        assert_eq!(plain.as_str(), "ws://localhost:5000/ws");

        let secure = websocket_url(&Url::parse("https://terminal.lan:8443").unwrap()).unwrap();
        assert_eq!(secure.as_str(), "wss://terminal.lan:8443/ws");
    }

    #[test]
    fn socketio_events_map_to_canonical_types() {
        let mapped = map_local_frame(json!({
            "event": "system_resources",
            "data": {"cpu_usage": 12.5, "timestamp": "2026-01-01T00:00:00Z"}
        }))
        .unwrap();
        assert_eq!(mapped["type"], "status");
        assert_eq!(mapped["data"]["cpu_usage"], 12.5);
        assert_eq!(mapped["timestamp"], "2026-01-01T00:00:00Z");

        let log = map_local_frame(json!({"event": "new_log", "data": {"message": "hi"}})).unwrap();
        assert_eq!(log["type"], "log");
        assert!(log["timestamp"].is_string());
    }

    #[test]
    fn unknown_events_keep_their_name() {
        let mapped = map_local_frame(json!({"event": "fan_speed", "data": 3})).unwrap();
        assert_eq!(mapped["type"], "fan_speed");
    }

    #[test]
    fn typed_frames_pass_through_and_nameless_frames_drop() {
        let typed = json!({"type": "heartbeat", "timestamp": "t"});
        assert_eq!(map_local_frame(typed.clone()), Some(typed));
        assert_eq!(map_local_frame(json!({"data": {}})), None);
    }

    #[test]
    fn command_envelopes_are_not_a_local_route() {
        assert!(matches!(
            path_for(OneShotPath::Command),
            Err(Error::UnsupportedOperation(_))
        ));
        assert_eq!(path_for(OneShotPath::Details).unwrap(), "api/info");
    }
}
