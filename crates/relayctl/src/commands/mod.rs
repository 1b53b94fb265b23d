//! Command dispatch: bridges CLI args -> controller calls -> output formatting.

pub mod auth;
pub mod config_cmd;
pub mod connect;
pub mod diagnostic;
pub mod discover;
pub mod log;
pub mod relay;
pub mod status;
pub mod util;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    let result = match cmd {
        Command::Discover => discover::handle(global).await,
        Command::Connect(args) => connect::handle_connect(args, global).await,
        Command::Forget => connect::handle_forget(global).await,
        Command::Status => status::handle(global).await,
        Command::Relay(args) => relay::handle(args, global).await,
        Command::Diagnostic => diagnostic::handle(global).await,
        Command::Watch(args) => watch::handle(args, global).await,
        Command::Log(args) => log::handle(args, global).await,
        Command::Config(args) => config_cmd::handle(args, global),
        Command::Auth(args) => auth::handle(args, global),
        // Completions is handled before dispatch
        Command::Completions(_) => Ok(()),
    };

    if matches!(result, Err(CliError::AuthFailed)) {
        util::drop_rejected_token();
    }
    result
}
