//! `relayctl log`: error log entries gathered during a session.

use tabled::Tabled;

use relayctl_core::ErrorLogEntry;

use crate::cli::{GlobalOpts, LogArgs, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
pub(crate) struct LogRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&ErrorLogEntry> for LogRow {
    fn from(e: &ErrorLogEntry) -> Self {
        Self {
            time: e.timestamp.format("%H:%M:%S").to_string(),
            code: e.code.to_string(),
            message: e.message.clone(),
        }
    }
}

pub async fn handle(args: LogArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let controller = util::open_session(global, false).await?;
    if args.diagnose {
        controller.run_diagnostic().await?;
    }
    let state = controller.snapshot();
    controller.disconnect().await;

    // Newest first.
    let entries: Vec<ErrorLogEntry> = state.error_log.iter().rev().cloned().collect();
    if entries.is_empty() && matches!(global.output, OutputFormat::Table) {
        output::print_output("No errors recorded", global.quiet);
        return Ok(());
    }
    let out = output::render_list(&global.output, &entries, |e| LogRow::from(e), |e| {
        format!("{} {}", e.code, e.message)
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
