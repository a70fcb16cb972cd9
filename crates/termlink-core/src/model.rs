// ── Canonical domain types ──
//
// Every payload a subscriber or caller sees is one of these. Transport
// specific shapes never leave `normalize`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use termlink_api::{ModeKind, TerminalId};

// ── Addressing ───────────────────────────────────────────────────────

/// Network address of a directly reachable terminal, `host:port`.
///
/// An `http://` prefix and trailing slashes are stripped on construction so
/// equal addresses compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint(String);

impl Endpoint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self("localhost:5000".into())
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s
            .trim()
            .trim_start_matches("http://")
            .trim_end_matches('/');
        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
            return Err(format!("invalid terminal endpoint '{s}'"));
        }
        Ok(Self(trimmed.to_owned()))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which terminal to talk to, and how.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ConnectionMode {
    Local { endpoint: Endpoint },
    Remote { terminal_id: TerminalId },
}

impl ConnectionMode {
    pub fn local(endpoint: Endpoint) -> Self {
        Self::Local { endpoint }
    }

    pub fn remote(terminal_id: TerminalId) -> Self {
        Self::Remote { terminal_id }
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            Self::Local { .. } => ModeKind::Local,
            Self::Remote { .. } => ModeKind::Remote,
        }
    }

    pub fn terminal_id(&self) -> Option<TerminalId> {
        match self {
            Self::Remote { terminal_id } => Some(*terminal_id),
            Self::Local { .. } => None,
        }
    }
}

impl Default for ConnectionMode {
    fn default() -> Self {
        Self::local(Endpoint::default())
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { endpoint } => write!(f, "local ({endpoint})"),
            Self::Remote { terminal_id } => write!(f, "remote (terminal #{terminal_id})"),
        }
    }
}

// ── Subscriptions / state ────────────────────────────────────────────

/// Opaque handle returned by `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of the persistent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            Self::Closing => f.write_str("closing"),
        }
    }
}

// ── Status / config / logs ───────────────────────────────────────────

/// Resource snapshot of a terminal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalStatus {
    pub cameras: Map<String, Value>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub push_running: bool,
    pub pull_running: bool,
    pub model_loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Vendor fields with no canonical slot.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How the terminal acquires frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Pull,
    Push,
    #[default]
    Both,
}

impl CaptureMode {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pull" => Some(Self::Pull),
            "push" => Some(Self::Push),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Detection configuration of a terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalConfig {
    pub mode: CaptureMode,
    /// Capture interval in seconds.
    pub interval: u64,
    pub cameras: Map<String, Value>,
    pub save_image: bool,
    pub preload_model: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Both,
            interval: 5,
            cameras: Map::new(),
            save_image: true,
            preload_model: true,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
    Detection,
}

impl LogLevel {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "detection" => Some(Self::Detection),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Detection => "detection",
        })
    }
}

pub const PLACEHOLDER_LOG_MESSAGE: &str = "unknown message";
pub const DEFAULT_LOG_SOURCE: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
}

// ── Events ───────────────────────────────────────────────────────────

/// Category of an error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransportUnreachable,
    Protocol,
    AuthRequired,
    ReconnectExhausted,
    Config,
    /// Reported by the terminal itself.
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
    pub mode: ModeKind,
    /// No further automatic recovery follows a fatal error.
    pub fatal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Connection {
        connected: bool,
        mode: ModeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Status(TerminalStatus),
    Update(Map<String, Value>),
    Log(LogEntry),
    Detection(Value),
    Message(String),
    Error(ErrorEvent),
    Heartbeat,
    Other {
        kind: String,
        data: Value,
    },
}

/// One event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl TerminalEvent {
    pub fn now(payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    /// `true` for error events after which nothing retries.
    pub fn is_fatal(&self) -> bool {
        matches!(&self.payload, EventPayload::Error(e) if e.fatal)
    }
}

// ── Details / environment ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalDetails {
    pub id: u32,
    pub name: String,
    pub online: bool,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    Detector,
    #[default]
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentFeatures {
    pub local_detection: bool,
    pub websocket: bool,
    pub push_mode: bool,
    pub pull_mode: bool,
}

impl Default for EnvironmentFeatures {
    fn default() -> Self {
        Self {
            local_detection: false,
            websocket: true,
            push_mode: true,
            pull_mode: true,
        }
    }
}

/// What answered environment detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentInfo {
    #[serde(rename = "type")]
    pub kind: EnvironmentKind,
    pub version: String,
    pub name: String,
    pub id: u32,
    pub features: EnvironmentFeatures,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_mode: Option<ModeKind>,
}

impl Default for EnvironmentInfo {
    /// The profile assumed when neither the local terminal nor the relay answers.
    fn default() -> Self {
        Self {
            kind: EnvironmentKind::Server,
            version: "unknown".into(),
            name: "Unknown environment".into(),
            id: 1,
            features: EnvironmentFeatures::default(),
            terminal_mode: None,
        }
    }
}
