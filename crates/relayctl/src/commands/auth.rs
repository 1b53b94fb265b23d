//! `relayctl auth login|logout`: bearer token for legacy firmware.

use std::io::{BufRead, IsTerminal};

use secrecy::SecretString;

use crate::cli::{AuthArgs, AuthCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

fn read_token(from_stdin: bool) -> Result<String, CliError> {
    if from_stdin || !std::io::stdin().is_terminal() {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        return Ok(line.trim().to_owned());
    }
    Ok(rpassword::prompt_password("Bearer token: ")?)
}

pub fn handle(args: AuthArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        AuthCommand::Login { stdin } => {
            let token = read_token(stdin)?;
            if token.is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "token cannot be empty".into(),
                });
            }
            relayctl_config::store_token(&SecretString::from(token))?;
            output::print_output("✓ Token stored in system keyring", global.quiet);
            Ok(())
        }
        AuthCommand::Logout => {
            let message = if relayctl_config::delete_token()? {
                "✓ Token removed"
            } else {
                "No stored token"
            };
            output::print_output(message, global.quiet);
            Ok(())
        }
    }
}
