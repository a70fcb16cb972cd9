// termlink-core: connection management, command dispatch and payload normalization
// between termlink-api and consumers (CLI, dashboards).

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod manager;
pub mod model;
pub mod normalize;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DispatcherConfig, ManagerConfig, ReconnectPolicy, SpecialRoute};
pub use dispatcher::CommandDispatcher;
pub use error::CoreError;
pub use factory::{DefaultTransportFactory, TransportFactory};
pub use manager::{Callback, ConnectionManager};
pub use normalize::{normalize_config, normalize_event, normalize_logs, normalize_status};

pub use model::{
    CaptureMode, ConnectionMode, ConnectionState, Endpoint, EnvironmentFeatures, EnvironmentInfo,
    EnvironmentKind, ErrorEvent, ErrorKind, EventPayload, LogEntry, LogLevel, ModeKind,
    SubscriptionId, TerminalConfig, TerminalDetails, TerminalEvent, TerminalId, TerminalStatus,
};
