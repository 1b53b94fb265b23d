//! `relayctl diagnostic`: output vs. feedback for both relays.

use tabled::Tabled;

use relayctl_core::{DiagnosticReport, DiagnosticSource, RelayId};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct DiagnosticRow {
    #[tabled(rename = "Relay")]
    relay: String,
    #[tabled(rename = "Output")]
    output: String,
    #[tabled(rename = "Feedback")]
    feedback: String,
    #[tabled(rename = "Result")]
    result: String,
}

fn rows(report: &DiagnosticReport, color: bool) -> Vec<DiagnosticRow> {
    RelayId::ALL
        .iter()
        .map(|&relay| {
            let d = report.relay(relay);
            DiagnosticRow {
                relay: relay.to_string(),
                output: output::on_off(d.output, color),
                feedback: output::on_off(d.feedback, color),
                result: output::verdict(d.matched, color),
            }
        })
        .collect()
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let controller = util::open_session(global, false).await?;
    let result = controller.run_diagnostic().await;
    controller.disconnect().await;
    let report = result?;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &report,
        |r| {
            let mut text = output::render_table(&rows(r, color));
            if r.source == DiagnosticSource::Cached {
                text.push_str("\n(device unreachable; compared last known state)");
            }
            text
        },
        |r| {
            r.mismatches()
                .map(|relay| format!("relay{relay}"))
                .collect::<Vec<_>>()
                .join("\n")
        },
    );
    output::print_output(&out, global.quiet);

    if !global.quiet && matches!(global.output, OutputFormat::Table) {
        let count = report.mismatches().count();
        if count > 0 {
            eprintln!("{count} relay(s) disagree with their feedback contact");
        }
    }
    Ok(())
}
