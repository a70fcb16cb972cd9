//! `termlink watch`: subscribe and print events until Ctrl-C or a fatal error.

use std::time::Duration;

use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tracing::info;

use termlink_core::{
    CommandDispatcher, ErrorEvent, EventPayload, LogEntry, LogLevel, TerminalEvent,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output::{self, should_color};

pub async fn handle(
    dispatcher: &CommandDispatcher,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let manager = dispatcher.manager();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = manager.connect(move |event: &TerminalEvent| {
        let _ = tx.send(event.clone());
    });
    info!(mode = %manager.mode(), "watching terminal events");

    let color = should_color(global.color);
    let mut refresh = args
        .refresh
        .filter(|secs| *secs > 0)
        .map(|secs| tokio::time::interval(Duration::from_secs(secs)));

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let result = loop {
        tokio::select! {
            _ = &mut interrupt => break Ok(()),
            () = tick(refresh.as_mut()) => {
                manager.request_status_update();
            }
            event = rx.recv() => {
                let Some(event) = event else { break Ok(()) };
                if let Err(e) = print_event(&event, global.output, color) {
                    break Err(e);
                }
                if let EventPayload::Error(ErrorEvent { fatal: true, kind, message, .. }) =
                    &event.payload
                {
                    break Err(CliError::from_event(*kind, message.clone()));
                }
            }
        }
    };

    manager.disconnect(Some(subscription));
    result
}

/// Next refresh tick, or never.
async fn tick(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_event(event: &TerminalEvent, format: OutputFormat, color: bool) -> Result<(), CliError> {
    let line = match format {
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(event)?,
        OutputFormat::Table => human_line(event, color),
    };
    output::print_output(&line);
    Ok(())
}

fn human_line(event: &TerminalEvent, color: bool) -> String {
    let time = event.timestamp.format("%H:%M:%S").to_string();
    let (tag, text) = match &event.payload {
        EventPayload::Connection {
            connected,
            mode,
            reason,
        } => (
            "conn",
            match (connected, reason) {
                (true, _) => format!("connected ({mode})"),
                (false, Some(reason)) => format!("disconnected ({mode}): {reason}"),
                (false, None) => format!("disconnected ({mode})"),
            },
        ),
        EventPayload::Status(status) => (
            "status",
            format!(
                "cpu {:.1}%  mem {:.1}%  push {}  pull {}  cameras {}",
                status.cpu_usage,
                status.memory_usage,
                status.push_running,
                status.pull_running,
                status.cameras.len()
            ),
        ),
        EventPayload::Log(entry) => ("log", format!("[{}] {}", entry.source, entry.message)),
        EventPayload::Error(err) => ("error", err.message.clone()),
        EventPayload::Update(_) => ("update", "configuration changed".into()),
        EventPayload::Detection(data) => ("detect", data.to_string()),
        EventPayload::Message(text) => ("message", text.clone()),
        EventPayload::Heartbeat => ("beat", String::new()),
        EventPayload::Other { kind, data } => ("other", format!("{kind}: {data}")),
    };

    if !color {
        return format!("{time} {tag:>7} {text}");
    }
    let tag = format!("{tag:>7}");
    let tag = match &event.payload {
        EventPayload::Error(_)
        | EventPayload::Log(LogEntry {
            level: LogLevel::Error,
            ..
        }) => tag.red().to_string(),
        EventPayload::Log(LogEntry {
            level: LogLevel::Warning,
            ..
        }) => tag.yellow().to_string(),
        EventPayload::Connection { .. } => tag.cyan().to_string(),
        EventPayload::Detection(_) => tag.green().to_string(),
        _ => tag.dimmed().to_string(),
    };
    format!("{} {tag} {text}", time.dimmed())
}
