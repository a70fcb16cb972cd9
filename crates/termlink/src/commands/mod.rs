//! Command dispatch: bridges CLI args -> dispatcher calls -> output.

pub mod profile;
pub mod terminal;
pub mod util;
pub mod watch;

use termlink_core::CommandDispatcher;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Run a terminal-bound command.
pub async fn dispatch(
    cmd: Command,
    dispatcher: &CommandDispatcher,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Status => terminal::status(dispatcher, global).await,
        Command::Config(args) => terminal::config(dispatcher, args.command, global).await,
        Command::Logs(args) => terminal::logs(dispatcher, &args, global).await,
        Command::Send(args) => terminal::send(dispatcher, args, global).await,
        Command::Details => terminal::details(dispatcher, global).await,
        Command::Detect => terminal::detect(dispatcher, global).await,
        Command::Watch(args) => watch::handle(dispatcher, &args, global).await,
        Command::Profile(_) | Command::Completions(_) => Err(CliError::usage(
            "command",
            "profile and completions do not talk to a terminal",
        )),
    }
}
