//! One-shot terminal commands: status, config, logs, send, details, detect.

use serde::Serialize;
use tabled::Tabled;

use termlink_core::{CommandDispatcher, ConnectionMode, EnvironmentInfo, LogEntry};

use crate::cli::{ConfigCommand, GlobalOpts, LogsArgs, SendArgs};
use crate::commands::util::parse_pairs;
use crate::error::CliError;
use crate::output::{self, fields_of};

pub async fn status(dispatcher: &CommandDispatcher, global: &GlobalOpts) -> Result<(), CliError> {
    let status = dispatcher.get_status().await?;
    let out = output::render_single(global.output, &status, fields_of)?;
    output::print_output(&out);
    Ok(())
}

pub async fn config(
    dispatcher: &CommandDispatcher,
    command: ConfigCommand,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match command {
        ConfigCommand::Show => {
            let config = dispatcher.get_config().await?;
            let out = output::render_single(global.output, &config, fields_of)?;
            output::print_output(&out);
        }
        ConfigCommand::Set { pairs } => {
            let patch = parse_pairs(&pairs)?;
            let reply = dispatcher.save_config(patch).await?;
            let out = output::render_single(global.output, &reply, fields_of)?;
            output::print_output(&out);
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&LogEntry> for LogRow {
    fn from(entry: &LogEntry) -> Self {
        Self {
            timestamp: entry.timestamp.clone(),
            level: entry.level.to_string(),
            source: entry.source.clone(),
            message: entry.message.clone(),
        }
    }
}

pub async fn logs(
    dispatcher: &CommandDispatcher,
    args: &LogsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let logs = dispatcher.get_logs().await?;
    let shown = match args.limit {
        Some(limit) => &logs[logs.len().saturating_sub(limit)..],
        None => &logs[..],
    };
    let out = output::render_list(global.output, shown, |entry| LogRow::from(entry))?;
    output::print_output(&out);
    Ok(())
}

pub async fn send(
    dispatcher: &CommandDispatcher,
    args: SendArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let params = parse_pairs(&args.params)?;
    let reply = dispatcher.send_command(&args.command, params).await?;
    let out = output::render_single(global.output, &reply, fields_of)?;
    output::print_output(&out);
    Ok(())
}

pub async fn details(dispatcher: &CommandDispatcher, global: &GlobalOpts) -> Result<(), CliError> {
    let details = dispatcher.get_terminal_details().await;
    let out = output::render_single(global.output, &details, fields_of)?;
    output::print_output(&out);
    Ok(())
}

#[derive(Serialize)]
struct Detection {
    environment: EnvironmentInfo,
    mode: ConnectionMode,
}

pub async fn detect(dispatcher: &CommandDispatcher, global: &GlobalOpts) -> Result<(), CliError> {
    let environment = dispatcher.detect_environment().await;
    let detection = Detection {
        environment,
        mode: dispatcher.manager().mode(),
    };
    let out = output::render_single(global.output, &detection, fields_of)?;
    output::print_output(&out);
    Ok(())
}
