// Relay link transport
//
// Reaches a terminal through the backend relay. The channel is
// `{relay}/ws/terminal/{id}/` and must be opened with an `authenticate`
// frame naming the terminal. One-shot calls go to the relay's
// per-terminal REST resources.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
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

// ── TerminalId ───────────────────────────────────────────────────────

/// Relay-side identifier of a terminal. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerminalId(NonZeroU32);

impl TerminalId {
    /// The lowest valid id, used when nothing better is known.
    pub const FIRST: Self = Self(NonZeroU32::MIN);

    /// `None` for zero.
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TerminalId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<NonZeroU32>()
            .map(Self)
            .map_err(|_| format!("terminal id must be a positive integer, got '{s}'"))
    }
}

// ── RemoteTransport ──────────────────────────────────────────────────

/// Link to terminal `id` through the relay at `relay`.
pub struct RemoteTransport {
    terminal_id: TerminalId,
    ws_url: Url,
    client: OneShotClient,
    active: Mutex<Option<CancellationToken>>,
}

impl RemoteTransport {
    pub fn new(
        relay: &Url,
        terminal_id: TerminalId,
        credentials: Arc<dyn CredentialStore>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let client = OneShotClient::new(relay.clone(), credentials, transport)?;
        let ws_url = relay_websocket_url(client.base_url(), terminal_id)?;
        Ok(Self {
            terminal_id,
            ws_url,
            client,
            active: Mutex::new(None),
        })
    }

    /// URL of the persistent channel.
    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    fn path_for(&self, path: OneShotPath) -> Result<String, Error> {
        let id = self.terminal_id;
        match path {
            OneShotPath::Status => Ok(format!("api/terminals/{id}/status/")),
            OneShotPath::Logs => Ok(format!("api/terminals/{id}/logs/")),
            OneShotPath::Command => Ok(format!("api/terminals/{id}/command/")),
            OneShotPath::Details => Ok(format!("api/terminals/{id}/")),
            OneShotPath::Environment => Ok("api/environment".to_owned()),
            OneShotPath::Control => Err(Error::UnsupportedOperation(
                "control actions are a local convention",
            )),
            OneShotPath::Config => Err(Error::UnsupportedOperation(
                "the relay has no config resource",
            )),
            OneShotPath::SwitchMode => Err(Error::UnsupportedOperation(
                "mode switching is addressed to the local terminal",
            )),
        }
    }

    async fn open_channel(&self) -> Result<Channel, Error> {
        let token = self.client.credentials().access_token();
        let greeting = vec![json!({
            "type": "authenticate",
            "terminal_id": self.terminal_id.get(),
        })];

        let channel =
            channel::open_websocket(&self.ws_url, token.as_ref(), greeting, map_remote_frame)
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
}

impl Transport for RemoteTransport {
    fn mode_kind(&self) -> ModeKind {
        ModeKind::Remote
    }

    fn conventions(&self) -> Conventions {
        Conventions {
            commands: CommandStyle::CommandEnvelope,
            status: ReadRoute::EndpointOrRequest,
            config: ReadRoute::Request,
            logs: ReadRoute::EndpointOrRequest,
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
            let path = self.path_for(path)?;
            self.client.request(method, &path, body.as_ref()).await
        })
    }

    fn status_request_frame(&self) -> Value {
        json!({
            "type": "request",
            "request": "get_status",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }

    fn close(&self) {
        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = active {
            debug!(terminal_id = %self.terminal_id, "closing relay channel");
            token.cancel();
        }
    }
}

/// `{relay}/ws/terminal/{id}/` with the relay's scheme mapped to ws/wss.
fn relay_websocket_url(relay: &Url, terminal_id: TerminalId) -> Result<Url, Error> {
    let mut url = relay.join(&format!("ws/terminal/{terminal_id}/"))?;
    let scheme = match relay.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::WebSocketConnect(format!("cannot derive {scheme} URL from {relay}")))?;
    Ok(url)
}

/// Relay frames are already canonical; anything without a `type` is dropped.
pub fn map_remote_frame(frame: Value) -> Option<Value> {
    if frame.get("type").is_some_and(Value::is_string) {
        Some(frame)
    } else {
        debug!(%frame, "relay frame without type");
        None
    }
}
