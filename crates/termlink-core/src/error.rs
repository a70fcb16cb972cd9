// ── Core error types ──
//
// The connectivity taxonomy callers and subscribers see. Wire-level
// `termlink_api::Error`s are translated here; raw reqwest or tungstenite
// errors never cross this boundary.

use thiserror::Error;

use crate::model::{ErrorKind, ModeKind};

fn mode_label(mode: Option<&ModeKind>) -> &'static str {
    match mode {
        Some(ModeKind::Local) => "local terminal",
        Some(ModeKind::Remote) => "relay",
        None => "terminal",
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connectivity ─────────────────────────────────────────────────
    /// Open or one-shot call could not reach the endpoint.
    #[error("Cannot reach {}: {message}", mode_label(.mode.as_ref()))]
    TransportUnreachable {
        mode: Option<ModeKind>,
        message: String,
    },

    /// A payload could not be understood.
    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    /// 401 survived a credential refresh.
    #[error("Authentication required: {message}")]
    AuthRequired { message: String },

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    // ── Calls ────────────────────────────────────────────────────────
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The operation needs an open channel.
    #[error("No channel is open")]
    NotConnected,

    #[error("No reply within {timeout_ms} ms")]
    RequestTimeout { timeout_ms: u64 },

    /// The terminal answered, but refused.
    #[error("Rejected by terminal: {message}")]
    Rejected { message: String },

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Translate a wire error, attaching the mode it happened in.
    pub fn from_api(mode: ModeKind, err: termlink_api::Error) -> Self {
        match Self::from(err) {
            Self::TransportUnreachable { message, .. } => Self::TransportUnreachable {
                mode: Some(mode),
                message,
            },
            other => other,
        }
    }

    pub fn is_auth_required(&self) -> bool {
        matches!(self, Self::AuthRequired { .. })
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::TransportUnreachable { .. })
    }

    /// Event category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthRequired { .. } => ErrorKind::AuthRequired,
            Self::ReconnectExhausted { .. } => ErrorKind::ReconnectExhausted,
            Self::ProtocolError { .. } | Self::Rejected { .. } => ErrorKind::Protocol,
            Self::Config { .. } | Self::Unsupported { .. } => ErrorKind::Config,
            Self::TransportUnreachable { .. }
            | Self::Http { .. }
            | Self::NotConnected
            | Self::RequestTimeout { .. } => ErrorKind::TransportUnreachable,
        }
    }
}

// ── Conversion from wire-level errors ────────────────────────────────

impl From<termlink_api::Error> for CoreError {
    fn from(err: termlink_api::Error) -> Self {
        use termlink_api::Error as Api;

        match err {
            Api::AuthRequired { message } | Api::RefreshFailed { message } => {
                CoreError::AuthRequired { message }
            }
            Api::Http { status, body } => CoreError::Http {
                status,
                message: body,
            },
            Api::Transport(ref e) if e.is_decode() => CoreError::ProtocolError {
                message: e.to_string(),
            },
            Api::Transport(e) => CoreError::TransportUnreachable {
                mode: None,
                message: e.to_string(),
            },
            Api::Tls(message) | Api::WebSocketConnect(message) => {
                CoreError::TransportUnreachable {
                    mode: None,
                    message,
                }
            }
            Api::ChannelClosed => CoreError::NotConnected,
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Deserialization { message, body: _ } => CoreError::ProtocolError { message },
            Api::UnsupportedOperation(op) => CoreError::Unsupported {
                operation: op.to_owned(),
            },
        }
    }
}
