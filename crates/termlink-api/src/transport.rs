// Transport capability interface and shared HTTP client configuration.
//
// Both adapters (local direct link, relay link) implement `Transport`.
// Callers never branch on the concrete adapter: path and payload
// conventions are reported through `Conventions` and resolved inside the
// adapter's `send_one_shot`.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::error::Error;

pub use reqwest::Method;

// ── Mode tag ─────────────────────────────────────────────────────────

/// Which kind of adapter carries the traffic. Data-free; attached to
/// every event so consumers can render a status badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    Local,
    Remote,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

// ── Logical one-shot paths ───────────────────────────────────────────

/// Logical endpoints a one-shot call can target. Each adapter maps these
/// onto its own URL convention, or rejects the ones it does not serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OneShotPath {
    Status,
    Config,
    Logs,
    /// `{action, ...params}` control actions (local convention).
    Control,
    /// `{command, params, timestamp}` envelopes (relay convention).
    Command,
    Details,
    Environment,
    SwitchMode,
}

/// How commands are shaped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStyle {
    /// `POST control {action, ...params}`; special routes post params as the body.
    ControlAction,
    /// `POST command {command, params, timestamp}`.
    CommandEnvelope,
}

/// How a read (status, config, logs) is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRoute {
    /// A dedicated GET endpoint.
    Endpoint,
    /// A dedicated GET endpoint that may be absent; fall back to a request command.
    EndpointOrRequest,
    /// Only reachable as a request command.
    Request,
}

/// Wire conventions an adapter follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conventions {
    pub commands: CommandStyle,
    pub status: ReadRoute,
    pub config: ReadRoute,
    pub logs: ReadRoute,
}

// ── Transport trait ──────────────────────────────────────────────────

/// Capability interface shared by the local and relay adapters.
pub trait Transport: Send + Sync {
    /// The adapter kind, for event context.
    fn mode_kind(&self) -> ModeKind;

    /// Path and payload conventions this adapter follows.
    fn conventions(&self) -> Conventions;

    /// Open the persistent channel. Identification frames are sent before
    /// this resolves.
    fn open(&self) -> BoxFuture<'_, Result<Channel, Error>>;

    /// Issue a single request/response call. Does not require an open channel.
    fn send_one_shot(
        &self,
        path: OneShotPath,
        method: Method,
        body: Option<serde_json::Value>,
    ) -> BoxFuture<'_, Result<serde_json::Value, Error>>;

    /// Frame asking the terminal to push a fresh status snapshot.
    fn status_request_frame(&self) -> serde_json::Value;

    /// Close the channel most recently opened by this adapter, if any.
    fn close(&self);
}

// ── HTTP client configuration ────────────────────────────────────────

/// TLS verification mode.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-signed relays in lab setups).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("termlink/", env!("CARGO_PKG_VERSION")));

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}
