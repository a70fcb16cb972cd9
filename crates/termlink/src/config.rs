//! Profile resolution with CLI overrides, and construction of the
//! manager + dispatcher pair every terminal-bound command runs against.
//!
//! This is the composition root: the only place concrete adapters,
//! credentials and configuration meet.

use std::sync::Arc;

use secrecy::SecretString;
use tracing::debug;

use termlink_config::{Config, Profile, ProfileMode};
use termlink_core::{CommandDispatcher, ConnectionManager, DefaultTransportFactory};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The resolved profile after applying flag overrides.
pub struct Resolved {
    pub name: String,
    pub profile: Profile,
    pub config: Config,
}

/// Load the config file and pick the active profile.
///
/// An explicitly requested profile must exist. Without one, a missing
/// default profile is fine: flags alone can describe the terminal.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let config = termlink_config::load_config()?;
    let name = config.active_profile_name(global.profile.as_deref());

    let mut profile = if global.profile.is_some() {
        config.profile(&name)?.clone()
    } else {
        config.profiles.get(&name).cloned().unwrap_or_default()
    };
    apply_overrides(&mut profile, global);

    Ok(Resolved {
        name,
        profile,
        config,
    })
}

/// Flags win over the profile.
pub fn apply_overrides(profile: &mut Profile, global: &GlobalOpts) {
    if let Some(ref endpoint) = global.local {
        profile.mode = ProfileMode::Local;
        profile.endpoint = Some(endpoint.clone());
    }
    if let Some(id) = global.remote {
        profile.mode = ProfileMode::Remote;
        profile.terminal_id = Some(id);
    }
    if let Some(ref relay) = global.relay {
        profile.relay = Some(relay.clone());
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }
}

/// Build the manager and dispatcher for the resolved profile.
pub fn build_dispatcher(
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<CommandDispatcher, CliError> {
    let Resolved {
        name,
        profile,
        config,
    } = resolved;

    let manager_config = termlink_config::profile_to_manager_config(profile, &config.defaults)?;
    let transport = termlink_config::transport_config(profile, &config.defaults);
    let credentials = termlink_config::credentials(
        profile,
        name,
        global.token.clone().map(SecretString::from),
        &transport,
    )?;

    debug!(profile = %name, mode = %manager_config.mode, "connection configured");

    let factory = DefaultTransportFactory::new(
        manager_config.relay_url.clone(),
        credentials,
        transport,
    );
    let manager = ConnectionManager::new(manager_config, Arc::new(factory));
    Ok(CommandDispatcher::new(
        manager,
        termlink_config::dispatcher_config(&config.defaults),
    ))
}
