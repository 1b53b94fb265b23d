//! `relayctl relay <1|2> <on|off>`.

use std::time::Duration;

use serde::Serialize;

use relayctl_core::{RelayId, TransportKind};

use crate::cli::{GlobalOpts, RelayArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct RelayResult {
    relay: RelayId,
    on: bool,
    via: TransportKind,
    feedback: bool,
}

pub async fn handle(args: RelayArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let relay = RelayId::try_from(args.relay)?;
    let on = args.state.is_on();

    let controller = util::open_session(global, args.realtime).await?;
    if args.realtime {
        match controller.wait_for_push(controller.config().connect_timeout).await {
            Some(kind) => tracing::debug!(transport = %kind, "push channel up"),
            None => tracing::warn!("no push channel came up, falling back to HTTP"),
        }
    }

    let result = controller.control_relay(relay, on).await;
    if result.is_ok() {
        // Give the re-fetch or the device echo a moment to land.
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let snapshot = controller.snapshot();
    controller.disconnect().await;
    let via = result?;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &RelayResult {
            relay,
            on,
            via,
            feedback: snapshot.relay(relay).feedback,
        },
        |r| {
            format!(
                "Relay {} {} via {} (feedback {})",
                r.relay,
                output::on_off(r.on, color),
                r.via,
                output::on_off(r.feedback, color)
            )
        },
        |r| r.via.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
