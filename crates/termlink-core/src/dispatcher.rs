// ── Command Dispatcher ──
//
// Turns logical operations (a command name and params, "get status",
// "get logs", ...) into the wire call the active adapter expects. The
// adapter is captured once per call, so a mode switch mid-call lets that
// call finish against the old adapter; its result goes to the caller only.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value, json};
use termlink_api::{CommandStyle, Method, OneShotPath, ReadRoute, Transport};
use tracing::{debug, info, warn};

use crate::config::{DispatcherConfig, SpecialRoute};
use crate::error::CoreError;
use crate::manager::ConnectionManager;
use crate::model::{
    ConnectionMode, Endpoint, EnvironmentInfo, LogEntry, ModeKind, TerminalConfig,
    TerminalDetails, TerminalId, TerminalStatus,
};
use crate::normalize::{normalize_config, normalize_logs, normalize_status, now_rfc3339};

/// Routes commands and reads for a [`ConnectionManager`]'s current mode.
///
/// Exactly one attempt per call. Falling back from a missing relay endpoint
/// to a request command is a route choice, not a retry.
pub struct CommandDispatcher {
    manager: ConnectionManager,
    config: DispatcherConfig,
    environment: Mutex<Option<EnvironmentInfo>>,
}

impl CommandDispatcher {
    pub fn new(manager: ConnectionManager, config: DispatcherConfig) -> Self {
        Self {
            manager,
            config,
            environment: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Send `name` with `params` using the current adapter's convention.
    pub async fn send_command(
        &self,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<Value, CoreError> {
        let transport = self.manager.transport()?;
        self.command_via(&transport, name, params).await
    }

    /// Apply a partial config change.
    pub async fn save_config(&self, patch: Map<String, Value>) -> Result<Value, CoreError> {
        self.send_command("update_config", patch).await
    }

    async fn command_via(
        &self,
        transport: &Arc<dyn Transport>,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<Value, CoreError> {
        let mode = transport.mode_kind();
        let (path, body) = match transport.conventions().commands {
            CommandStyle::ControlAction => match self.config.special_routes.get(name) {
                Some(SpecialRoute::Config) => (OneShotPath::Config, Value::Object(params)),
                None => {
                    let mut body = params;
                    body.insert("action".into(), Value::String(name.to_owned()));
                    (OneShotPath::Control, Value::Object(body))
                }
            },
            CommandStyle::CommandEnvelope => (
                OneShotPath::Command,
                json!({
                    "command": name,
                    "params": params,
                    "timestamp": now_rfc3339(),
                }),
            ),
        };

        debug!(command = name, %mode, ?path, "dispatching command");
        transport
            .send_one_shot(path, Method::POST, Some(body))
            .await
            .map_err(|e| CoreError::from_api(mode, e))
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn get_status(&self) -> Result<TerminalStatus, CoreError> {
        let transport = self.manager.transport()?;
        let route = transport.conventions().status;
        let raw = self
            .read(&transport, route, OneShotPath::Status, "get_status")
            .await?;
        Ok(normalize_status(&raw))
    }

    pub async fn get_config(&self) -> Result<TerminalConfig, CoreError> {
        let transport = self.manager.transport()?;
        let route = transport.conventions().config;
        let raw = self
            .read(&transport, route, OneShotPath::Config, "get_config")
            .await?;
        Ok(normalize_config(&raw))
    }

    /// Recent log lines. Errors are surfaced, not turned into an empty list.
    pub async fn get_logs(&self) -> Result<Vec<LogEntry>, CoreError> {
        let transport = self.manager.transport()?;
        let route = transport.conventions().logs;
        let raw = self
            .read(&transport, route, OneShotPath::Logs, "get_logs")
            .await?;
        Ok(normalize_logs(log_list(&raw)))
    }

    async fn read(
        &self,
        transport: &Arc<dyn Transport>,
        route: ReadRoute,
        path: OneShotPath,
        request: &str,
    ) -> Result<Value, CoreError> {
        let mode = transport.mode_kind();
        match route {
            ReadRoute::Endpoint => transport
                .send_one_shot(path, Method::GET, None)
                .await
                .map_err(|e| CoreError::from_api(mode, e)),
            ReadRoute::EndpointOrRequest => {
                match transport.send_one_shot(path, Method::GET, None).await {
                    Err(e) if e.is_endpoint_missing() => {
                        debug!(?path, request, "endpoint missing, using request command");
                        self.request(transport, request).await
                    }
                    other => other.map_err(|e| CoreError::from_api(mode, e)),
                }
            }
            ReadRoute::Request => self.request(transport, request).await,
        }
    }

    /// A structured request: over the open channel when this adapter has
    /// one, otherwise as a one-shot command.
    async fn request(
        &self,
        transport: &Arc<dyn Transport>,
        name: &str,
    ) -> Result<Value, CoreError> {
        if self.manager.is_open_on(transport) {
            self.manager
                .channel_request(name, Value::Object(Map::new()), None)
                .await
        } else {
            self.command_via(transport, name, Map::new()).await
        }
    }

    // ── Probing / discovery ──────────────────────────────────────────

    /// `true` if a terminal answers its status endpoint at `endpoint`
    /// within the probe timeout.
    pub async fn is_local_available(&self, endpoint: &Endpoint) -> bool {
        let transport = match self
            .manager
            .factory()
            .build(&ConnectionMode::local(endpoint.clone()))
        {
            Ok(transport) => transport,
            Err(e) => {
                debug!(error = %e, %endpoint, "cannot build local adapter");
                return false;
            }
        };
        let probe = transport.send_one_shot(OneShotPath::Status, Method::GET, None);
        matches!(
            tokio::time::timeout(self.config.probe_timeout, probe).await,
            Ok(Ok(_))
        )
    }

    /// Identity and load of the current terminal. Falls back to a minimal
    /// offline record when the lookup fails.
    pub async fn get_terminal_details(&self) -> TerminalDetails {
        let mode = self.manager.mode();
        match self.fetch_details(&mode).await {
            Ok(details) => details,
            Err(e) => {
                warn!(error = %e, %mode, "terminal details unavailable");
                fallback_details(&mode)
            }
        }
    }

    async fn fetch_details(&self, mode: &ConnectionMode) -> Result<TerminalDetails, CoreError> {
        let transport = self.manager.transport()?;
        let kind = transport.mode_kind();
        let get = |path: OneShotPath| {
            let transport = Arc::clone(&transport);
            async move {
                transport
                    .send_one_shot(path, Method::GET, None)
                    .await
                    .map_err(|e| CoreError::from_api(kind, e))
            }
        };

        match mode {
            ConnectionMode::Local { .. } => {
                let info = get(OneShotPath::Details).await?;
                let status = normalize_status(&get(OneShotPath::Status).await?);
                Ok(TerminalDetails {
                    id: id_of(&info).unwrap_or(0),
                    name: text_of(&info, "name").unwrap_or_else(|| "Local terminal".into()),
                    online: true,
                    cpu_usage: status.cpu_usage,
                    memory_usage: status.memory_usage,
                    version: Some(text_of(&info, "version").unwrap_or_else(|| "unknown".into())),
                    last_active: None,
                })
            }
            ConnectionMode::Remote { terminal_id } => {
                let raw = get(OneShotPath::Details).await?;
                let status = normalize_status(&raw);
                let id = id_of(&raw).unwrap_or(terminal_id.get());
                Ok(TerminalDetails {
                    id,
                    name: text_of(&raw, "name").unwrap_or_else(|| format!("Terminal #{id}")),
                    online: ["status", "online"]
                        .iter()
                        .find_map(|k| raw.get(*k).and_then(Value::as_bool))
                        .unwrap_or(false),
                    cpu_usage: status.cpu_usage,
                    memory_usage: status.memory_usage,
                    version: text_of(&raw, "version"),
                    last_active: text_of(&raw, "last_active"),
                })
            }
        }
    }

    /// Work out where this client runs and switch the manager to match:
    /// a reachable local terminal wins (following it into remote mode if it
    /// reports one), then the relay, then a default server profile.
    ///
    /// The first answer is cached for the dispatcher's lifetime.
    pub async fn detect_environment(&self) -> EnvironmentInfo {
        if let Some(cached) = self
            .environment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return cached;
        }

        let mode = self.manager.mode();
        let current_id = mode.terminal_id();
        let local_endpoint = match &mode {
            ConnectionMode::Local { endpoint } => endpoint.clone(),
            ConnectionMode::Remote { .. } => self.manager.config().local_endpoint.clone(),
        };

        if self.is_local_available(&local_endpoint).await {
            let local = ConnectionMode::local(local_endpoint);
            match self
                .environment_from(&local, self.config.probe_timeout)
                .await
            {
                Ok(env) => {
                    let next = match env.terminal_mode {
                        Some(ModeKind::Remote) => TerminalId::new(env.id)
                            .or(current_id)
                            .map_or(local, ConnectionMode::remote),
                        _ => local,
                    };
                    info!(mode = %next, "local terminal detected");
                    self.manager.set_mode(next);
                    return self.remember(env);
                }
                Err(e) => warn!(error = %e, "local environment lookup failed"),
            }
        }

        let relay = ConnectionMode::remote(current_id.unwrap_or(TerminalId::FIRST));
        match self
            .environment_from(&relay, self.config.environment_timeout)
            .await
        {
            Ok(env) => {
                let id = current_id
                    .or_else(|| TerminalId::new(env.id))
                    .unwrap_or(TerminalId::FIRST);
                info!(terminal_id = %id, "relay environment detected");
                self.manager.set_mode(ConnectionMode::remote(id));
                self.remember(env)
            }
            Err(e) => {
                warn!(error = %e, "relay environment lookup failed, assuming server profile");
                let env = EnvironmentInfo::default();
                self.manager.set_mode(ConnectionMode::remote(
                    current_id.unwrap_or(TerminalId::FIRST),
                ));
                self.remember(env)
            }
        }
    }

    async fn environment_from(
        &self,
        mode: &ConnectionMode,
        timeout: Duration,
    ) -> Result<EnvironmentInfo, CoreError> {
        let transport = if *mode == self.manager.mode() {
            self.manager.transport()?
        } else {
            self.manager.factory().build(mode)?
        };
        let kind = transport.mode_kind();
        let raw = tokio::time::timeout(
            timeout,
            transport.send_one_shot(OneShotPath::Environment, Method::GET, None),
        )
        .await
        .map_err(|_| CoreError::TransportUnreachable {
            mode: Some(kind),
            message: format!("no environment answer within {} ms", timeout.as_millis()),
        })?
        .map_err(|e| CoreError::from_api(kind, e))?;

        serde_json::from_value(raw).map_err(|e| CoreError::ProtocolError {
            message: format!("unreadable environment: {e}"),
        })
    }

    fn remember(&self, env: EnvironmentInfo) -> EnvironmentInfo {
        *self
            .environment
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(env.clone());
        env
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Log collections arrive bare or wrapped in `logs`/`data`.
fn log_list(raw: &Value) -> &Value {
    ["logs", "data"]
        .iter()
        .find_map(|k| raw.get(*k).filter(|v| v.is_array()))
        .unwrap_or(raw)
}

fn id_of(raw: &Value) -> Option<u32> {
    match raw.get("id")? {
        Value::Number(n) => n.as_u64().and_then(|id| u32::try_from(id).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text_of(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn fallback_details(mode: &ConnectionMode) -> TerminalDetails {
    let (id, name) = match mode {
        ConnectionMode::Local { .. } => (0, "Local terminal".to_owned()),
        ConnectionMode::Remote { terminal_id } => {
            (terminal_id.get(), format!("Terminal #{terminal_id}"))
        }
    };
    TerminalDetails {
        id,
        name,
        online: false,
        cpu_usage: 0.0,
        memory_usage: 0.0,
        version: None,
        last_active: None,
    }
}
