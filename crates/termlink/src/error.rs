//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a stable exit code per category.

use miette::Diagnostic;
use thiserror::Error;

use termlink_config::ConfigError;
use termlink_core::{CoreError, ErrorKind};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const TRANSPORT: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Usage / configuration ────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(termlink::usage))]
    Usage { field: String, reason: String },

    #[error("{source}")]
    #[diagnostic(
        code(termlink::config),
        help(
            "Check the profile in {path}\n\
             or pass --local HOST:PORT / --remote ID --relay URL."
        )
    )]
    Config {
        #[source]
        source: ConfigError,
        path: String,
    },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication required: {message}")]
    #[diagnostic(
        code(termlink::auth),
        help(
            "Pass --token, set TERMLINK_TOKEN, or store one with:\n\
             termlink profile set-token <profile>"
        )
    )]
    Auth { message: String },

    // ── Transport ────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(
        code(termlink::unreachable),
        help("Check that the terminal (or relay) is running and reachable.")
    )]
    Unreachable { message: String },

    // ── Terminal answered with an error ──────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(termlink::terminal))]
    Terminal { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(termlink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage { .. } | Self::Config { .. } => exit_code::USAGE,
            Self::Auth { .. } => exit_code::AUTH,
            Self::Unreachable { .. } => exit_code::TRANSPORT,
            Self::Terminal { .. } | Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }

    pub fn usage(field: &str, reason: impl Into<String>) -> Self {
        Self::Usage {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// A fatal event seen while watching.
    pub fn from_event(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::AuthRequired => Self::Auth { message },
            ErrorKind::Config => Self::Usage {
                field: "connection".into(),
                reason: message,
            },
            ErrorKind::TransportUnreachable | ErrorKind::ReconnectExhausted => {
                Self::Unreachable { message }
            }
            ErrorKind::Protocol | ErrorKind::Terminal => Self::Terminal { message },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(source: ConfigError) -> Self {
        Self::Config {
            source,
            path: termlink_config::config_path().display().to_string(),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let text = err.to_string();
        match err {
            CoreError::AuthRequired { message } => Self::Auth { message },
            CoreError::Config { message } => Self::Usage {
                field: "connection".into(),
                reason: message,
            },
            CoreError::TransportUnreachable { .. }
            | CoreError::ReconnectExhausted { .. }
            | CoreError::NotConnected
            | CoreError::RequestTimeout { .. } => Self::Unreachable { message: text },
            CoreError::Http { .. }
            | CoreError::ProtocolError { .. }
            | CoreError::Rejected { .. }
            | CoreError::Unsupported { .. } => Self::Terminal { message: text },
        }
    }
}
