// ── Runtime connectivity configuration ──
//
// These types describe how the manager and dispatcher behave. They never
// touch disk: `termlink-config` (or a test) builds them and hands them in.

use std::time::Duration;

use indexmap::IndexMap;
use url::Url;

use crate::model::{ConnectionMode, Endpoint};

/// Backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based): `min(max, base × 1.5^(attempt−1))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.base_delay.as_secs_f64() * 1000.0 * 1.5_f64.powi(exponent);
        let cap = self.max_delay.as_secs_f64() * 1000.0;
        if !millis.is_finite() || millis >= cap {
            return self.max_delay;
        }
        Duration::from_secs_f64(millis / 1000.0)
    }
}

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Mode active before the first `set_mode`.
    pub mode: ConnectionMode,
    /// Relay root for remote mode.
    pub relay_url: Option<Url>,
    /// Local terminal probed by environment detection while in remote mode.
    pub local_endpoint: Endpoint,
    pub reconnect: ReconnectPolicy,
    /// How long `channel_request` waits for the matching reply.
    pub request_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::default(),
            relay_url: None,
            local_endpoint: Endpoint::default(),
            reconnect: ReconnectPolicy::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Where a special command goes instead of the generic control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialRoute {
    /// `POST` the command's params, unwrapped, to the config endpoint.
    Config,
}

/// Configuration for a [`CommandDispatcher`](crate::CommandDispatcher).
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Command names routed outside the control endpoint on local terminals.
    pub special_routes: IndexMap<String, SpecialRoute>,
    /// Timeout of the local availability probe.
    pub probe_timeout: Duration,
    /// Timeout of the relay environment lookup.
    pub environment_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let mut special_routes = IndexMap::new();
        special_routes.insert("update_config".to_owned(), SpecialRoute::Config);
        Self {
            special_routes,
            probe_timeout: Duration::from_secs(2),
            environment_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_by_half_and_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2250));
        assert_eq!(policy.delay_for(4), Duration::from_millis(3375));
        assert_eq!(policy.delay_for(5), Duration::from_micros(5_062_500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn custom_cap_applies() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(250),
            max_attempts: 3,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(250));
    }
}
