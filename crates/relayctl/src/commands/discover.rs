//! `relayctl discover`: scan without connecting.

use serde::Serialize;

use relayctl_core::DeviceAddress;

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct Found {
    address: DeviceAddress,
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let controller = util::controller(config::device_config(global, false)?);
    let discovery = controller.discovery();

    let plan = discovery.candidates();
    tracing::debug!(candidates = plan.len(), "discovery plan");

    let spinner = util::spinner(global, &format!("Probing {} candidates...", plan.len()));
    let found = discovery.resolve().await;
    spinner.finish_and_clear();

    let address = found.ok_or(CliError::DeviceNotFound)?;
    let out = output::render_single(
        &global.output,
        &Found { address },
        |f| format!("Found device at {}", f.address),
        |f| f.address.to_string(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
