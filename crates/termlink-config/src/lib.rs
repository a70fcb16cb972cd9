//! Shared configuration for termlink front ends.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `termlink_core::ManagerConfig`. Core never reads files;
//! it receives a pre-built config from here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use termlink_api::{CredentialStore, JwtCredentials, StaticToken, TlsMode, TransportConfig};
use termlink_core::{
    ConnectionMode, DispatcherConfig, Endpoint, ManagerConfig, ReconnectPolicy, TerminalId,
};

/// Service name for keyring entries (`{profile}/token`, `{profile}/refresh-token`).
pub const KEYRING_SERVICE: &str = "termlink";

/// Environment prefix. Nested keys use `__`: `TERMLINK_DEFAULTS__TIMEOUT=5`.
pub const ENV_PREFIX: &str = "TERMLINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found (available: {available})")]
    ProfileNotFound { name: String, available: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("cannot set up credentials: {0}")]
    Credentials(#[from] termlink_api::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is requested.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named terminal profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// `requested`, else the configured default, else `"default"`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: if self.profiles.is_empty() {
                    "none".into()
                } else {
                    self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
                },
            })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    /// One-shot request timeout, seconds.
    pub timeout: u64,
    /// Local availability probe timeout, milliseconds.
    pub probe_timeout_ms: u64,
    /// Relay environment lookup timeout, milliseconds.
    pub environment_timeout_ms: u64,
    pub insecure: bool,
    pub reconnect: ReconnectSettings,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: 10,
            probe_timeout_ms: 2000,
            environment_timeout_ms: 5000,
            insecure: false,
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Reconnect backoff as written in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl From<ReconnectSettings> for ReconnectPolicy {
    fn from(s: ReconnectSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            max_attempts: s.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileMode {
    #[default]
    Local,
    Remote,
}

/// A named terminal profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    #[serde(default)]
    pub mode: ProfileMode,

    /// Local terminal address, `host:port`. Defaults to `localhost:5000`.
    pub endpoint: Option<String>,

    /// Terminal id on the relay. Required for remote mode.
    pub terminal_id: Option<u32>,

    /// Relay base URL (e.g. "https://relay.example").
    pub relay: Option<String>,

    /// Access token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable holding the access token.
    pub token_env: Option<String>,

    /// Refresh token (plaintext; prefer keyring).
    pub refresh_token: Option<String>,

    /// Path to a custom CA certificate for the relay.
    pub ca_cert: Option<PathBuf>,

    pub insecure: Option<bool>,

    /// Request timeout override, seconds.
    pub timeout: Option<u64>,

    /// Backoff override for this profile.
    pub reconnect: Option<ReconnectSettings>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "termlink", "termlink").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("termlink");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Loading / saving ────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` (missing file is fine) + environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    Ok(config)
}

/// Serialize config to TOML at the canonical path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_secret(profile_name: &str, key: &str) -> Option<SecretString> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{key}")).ok()?;
    entry.get_password().ok().map(SecretString::from)
}

/// Access token from the profile's env var, the keyring, then plaintext.
/// `None` means anonymous, which local terminals accept.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    if let Some(value) = profile
        .token_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok())
    {
        return Some(SecretString::from(value));
    }
    if let Some(secret) = keyring_secret(profile_name, "token") {
        return Some(secret);
    }
    profile.token.clone().map(SecretString::from)
}

/// Refresh token from the keyring, then plaintext.
pub fn resolve_refresh_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    keyring_secret(profile_name, "refresh-token")
        .or_else(|| profile.refresh_token.clone().map(SecretString::from))
}

/// Credential store for a profile. A refresh token plus a relay gives
/// refreshing JWT credentials; otherwise the access token is used as is.
pub fn credentials(
    profile: &Profile,
    profile_name: &str,
    access_override: Option<SecretString>,
    transport: &TransportConfig,
) -> Result<Arc<dyn CredentialStore>, ConfigError> {
    let access = access_override.or_else(|| resolve_token(profile, profile_name));
    let refresh = resolve_refresh_token(profile, profile_name);

    match (refresh, relay_url(profile)?) {
        (Some(refresh), Some(relay)) => {
            debug!(profile = profile_name, "using refreshing credentials");
            Ok(Arc::new(JwtCredentials::new(
                &relay,
                access,
                Some(refresh),
                transport,
            )?))
        }
        _ => Ok(Arc::new(access.map_or_else(StaticToken::anonymous, StaticToken::new))),
    }
}

// ── Translation into core config ────────────────────────────────────

/// The relay URL, if the profile names one.
pub fn relay_url(profile: &Profile) -> Result<Option<Url>, ConfigError> {
    profile
        .relay
        .as_deref()
        .map(|raw| {
            Url::parse(raw).map_err(|e| invalid("relay", format!("invalid URL '{raw}': {e}")))
        })
        .transpose()
}

pub fn local_endpoint(profile: &Profile) -> Result<Endpoint, ConfigError> {
    profile
        .endpoint
        .as_deref()
        .map_or_else(|| Ok(Endpoint::default()), |raw| {
            raw.parse().map_err(|e: String| invalid("endpoint", e))
        })
}

/// The mode a profile selects.
pub fn connection_mode(profile: &Profile) -> Result<ConnectionMode, ConfigError> {
    match profile.mode {
        ProfileMode::Local => Ok(ConnectionMode::local(local_endpoint(profile)?)),
        ProfileMode::Remote => {
            let raw = profile
                .terminal_id
                .ok_or_else(|| invalid("terminal_id", "remote mode needs a terminal id"))?;
            let id = TerminalId::new(raw)
                .ok_or_else(|| invalid("terminal_id", "must be a positive integer"))?;
            Ok(ConnectionMode::remote(id))
        }
    }
}

pub fn transport_config(profile: &Profile, defaults: &Defaults) -> TransportConfig {
    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };
    TransportConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    }
}

/// Build a `ManagerConfig` from a profile, without front-end overrides.
pub fn profile_to_manager_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ManagerConfig, ConfigError> {
    let relay_url = relay_url(profile)?;
    let mode = connection_mode(profile)?;
    if matches!(mode, ConnectionMode::Remote { .. }) && relay_url.is_none() {
        return Err(invalid("relay", "remote mode needs a relay URL"));
    }

    let reconnect = profile.reconnect.unwrap_or(defaults.reconnect);
    if reconnect.base_delay_ms == 0 {
        return Err(invalid("reconnect.base_delay_ms", "must be positive"));
    }

    Ok(ManagerConfig {
        mode,
        relay_url,
        local_endpoint: local_endpoint(profile)?,
        reconnect: reconnect.into(),
        request_timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
    })
}

pub fn dispatcher_config(defaults: &Defaults) -> DispatcherConfig {
    DispatcherConfig {
        probe_timeout: Duration::from_millis(defaults.probe_timeout_ms),
        environment_timeout: Duration::from_millis(defaults.environment_timeout_ms),
        ..DispatcherConfig::default()
    }
}
