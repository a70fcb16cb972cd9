use thiserror::Error;

/// Top-level error type for the `termlink-api` crate.
///
/// Covers every failure mode of the wire layer: credentials, HTTP one-shot
/// calls, the persistent WebSocket channel, and payload decoding.
/// `termlink-core` maps these into its connectivity taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The endpoint answered 401 and a credential refresh did not help.
    #[error("Authentication required: {message}")]
    AuthRequired { message: String },

    /// The credential store could not produce a fresh token.
    #[error("Credential refresh failed: {message}")]
    RefreshFailed { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS configuration or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Non-success HTTP status other than 401.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket handshake or I/O failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The channel has already been closed.
    #[error("Channel is closed")]
    ChannelClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Adapter ─────────────────────────────────────────────────────
    /// The adapter has no wire route for this operation.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),
}

impl Error {
    /// Returns `true` if the caller must re-authenticate.
    pub fn is_auth_required(&self) -> bool {
        matches!(self, Self::AuthRequired { .. } | Self::RefreshFailed { .. })
    }

    /// Returns `true` if the endpoint could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::WebSocketConnect(_) | Self::ChannelClosed | Self::Tls(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if the endpoint does not exist on this server (404/405).
    ///
    /// Relays without a dedicated REST shortcut answer this way.
    pub fn is_endpoint_missing(&self) -> bool {
        matches!(self, Self::Http { status: 404 | 405, .. })
    }

    /// HTTP status code, if the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::AuthRequired { .. } => Some(401),
            _ => None,
        }
    }
}
