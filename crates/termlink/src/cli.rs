//! Clap derive structures for the `termlink` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// termlink -- talk to occupancy terminals directly or through the relay
#[derive(Debug, Parser)]
#[command(
    name = "termlink",
    version,
    about = "Query, command and watch occupancy terminals",
    long_about = "Connects to a detection terminal either directly on the local network\n\
        or through the backend relay, sends commands and streams its events.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Profile to use
    #[arg(long, short = 'p', env = "TERMLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Talk to a local terminal at host:port (overrides profile)
    #[arg(long, value_name = "HOST:PORT", global = true, conflicts_with = "remote")]
    pub local: Option<String>,

    /// Talk to terminal ID through the relay (overrides profile)
    #[arg(
        long,
        value_name = "ID",
        global = true,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub remote: Option<u32>,

    /// Relay base URL (overrides profile)
    #[arg(long, env = "TERMLINK_RELAY", global = true)]
    pub relay: Option<String>,

    /// Access token for the relay
    #[arg(long, env = "TERMLINK_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(long, short = 'o', env = "TERMLINK_OUTPUT", default_value = "json", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON (default)
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Human-readable table
    Table,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the terminal's current status
    #[command(alias = "st")]
    Status,

    /// Show or change the terminal's capture configuration
    Config(ConfigArgs),

    /// Show recent log lines
    Logs(LogsArgs),

    /// Send a command, e.g. `termlink send start mode=push`
    Send(SendArgs),

    /// Show identity and load of the terminal
    Details,

    /// Detect whether a local terminal or the relay is reachable
    Detect,

    /// Stream events until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Manage saved profiles
    Profile(ProfileArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the terminal's configuration
    Show,

    /// Change configuration values
    Set {
        /// key=value pairs; values are parsed as JSON when possible
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
}

#[derive(Debug, Args)]
pub struct LogsArgs {
    /// Only show the last N entries
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Command name (start, stop, update_config, ...)
    pub command: String,

    /// key=value parameters; values are parsed as JSON when possible
    #[arg(value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Ask for a fresh status snapshot every N seconds
    #[arg(long, value_name = "SECS")]
    pub refresh: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ProfileArgs {
    #[command(subcommand)]
    pub command: ProfileCommand,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    /// List saved profiles
    List,

    /// Save a profile from --local / --remote / --relay
    Add {
        name: String,

        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Store the profile's access token in the system keyring
    SetToken { name: String },

    /// Print the config file location
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
