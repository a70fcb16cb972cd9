//! Profile management. Works on the config file only; never connects.

use tabled::Tabled;

use termlink_config::{Profile, ProfileMode};

use crate::cli::{GlobalOpts, ProfileCommand};
use crate::config::apply_overrides;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Default")]
    default: String,
}

/// Listing view. Never carries token material.
#[derive(serde::Serialize)]
struct ProfileEntry<'a> {
    name: &'a str,
    default: bool,
    mode: ProfileMode,
    target: String,
    has_token: bool,
}

fn target_of(profile: &Profile) -> String {
    match profile.mode {
        ProfileMode::Local => profile
            .endpoint
            .clone()
            .unwrap_or_else(|| "localhost:5000".into()),
        ProfileMode::Remote => format!(
            "#{} via {}",
            profile
                .terminal_id
                .map_or_else(|| "?".into(), |id| id.to_string()),
            profile.relay.as_deref().unwrap_or("?")
        ),
    }
}

pub fn handle(command: ProfileCommand, global: &GlobalOpts) -> Result<(), CliError> {
    match command {
        ProfileCommand::List => list(global),
        ProfileCommand::Add { name, default } => add(&name, default, global),
        ProfileCommand::SetToken { name } => set_token(&name, global),
        ProfileCommand::Path => {
            output::print_output(&termlink_config::config_path().display().to_string());
            Ok(())
        }
    }
}

fn list(global: &GlobalOpts) -> Result<(), CliError> {
    let config = termlink_config::load_config()?;
    let default = config.active_profile_name(None);
    let entries: Vec<ProfileEntry<'_>> = config
        .profiles
        .iter()
        .map(|(name, profile)| ProfileEntry {
            name,
            default: *name == default,
            mode: profile.mode,
            target: target_of(profile),
            has_token: profile.token.is_some() || profile.token_env.is_some(),
        })
        .collect();

    let out = output::render_list(global.output, &entries, |entry| ProfileRow {
        name: entry.name.to_owned(),
        mode: match entry.mode {
            ProfileMode::Local => "local".into(),
            ProfileMode::Remote => "remote".into(),
        },
        target: entry.target.clone(),
        default: if entry.default { "*".into() } else { String::new() },
    })?;
    output::print_output(&out);
    Ok(())
}

fn add(name: &str, make_default: bool, global: &GlobalOpts) -> Result<(), CliError> {
    if global.local.is_none() && global.remote.is_none() {
        return Err(CliError::usage(
            "profile",
            "pass --local HOST:PORT or --remote ID (with --relay URL)",
        ));
    }

    let mut config = termlink_config::load_config()?;
    let mut profile = config.profiles.get(name).cloned().unwrap_or_default();
    apply_overrides(&mut profile, global);

    // Validate before writing.
    let defaults = config.defaults.clone();
    termlink_config::profile_to_manager_config(&profile, &defaults)?;

    config.profiles.insert(name.to_owned(), profile);
    if make_default || config.profiles.len() == 1 {
        config.default_profile = Some(name.to_owned());
    }
    let path = termlink_config::save_config(&config)?;
    eprintln!("Saved profile '{name}' to {}", path.display());
    Ok(())
}

fn set_token(name: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let token = match &global.token {
        Some(token) => token.clone(),
        None => rpassword::prompt_password(format!("Access token for '{name}': "))?,
    };
    if token.trim().is_empty() {
        return Err(CliError::usage("token", "token must not be empty"));
    }

    let entry = keyring::Entry::new(termlink_config::KEYRING_SERVICE, &format!("{name}/token"))
        .and_then(|entry| entry.set_password(token.trim()).map(|()| entry));
    match entry {
        Ok(_) => {
            eprintln!("Token for '{name}' stored in the system keyring");
            Ok(())
        }
        Err(e) => Err(CliError::Io(std::io::Error::other(e))),
    }
}
