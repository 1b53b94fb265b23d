//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

use relayctl_config::FileAddressStore;
use relayctl_core::{Controller, DeviceConfig};

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;

/// How long to wait for the first state update after connecting.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Controller over the on-disk address cache. Does not connect.
pub fn controller(device: DeviceConfig) -> Controller {
    Controller::new(device, Arc::new(FileAddressStore::default_location()))
}

/// Build a controller and connect it: configured address, else discovery.
pub async fn open_session(global: &GlobalOpts, push: bool) -> Result<Controller, CliError> {
    let controller = controller(config::device_config(global, push)?);

    let spinner = controller
        .config()
        .address
        .is_none()
        .then(|| spinner(global, "Looking for the device..."));
    let result = controller.connect().await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let address = result?;
    debug!(address = %address, "session open");
    settle(&controller).await;
    Ok(controller)
}

/// Wait until the store has seen at least one device update.
pub async fn settle(controller: &Controller) {
    let mut state = controller.state();
    if tokio::time::timeout(SETTLE_TIMEOUT, state.wait_for(|s| s.last_update.is_some()))
        .await
        .is_err()
    {
        debug!("no device update before settle timeout");
    }
}

/// Stderr spinner; hidden when quiet or not on a terminal.
pub fn spinner(global: &GlobalOpts, message: &str) -> ProgressBar {
    if global.quiet || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_owned());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}

/// The device refused our token: delete it so the next run starts clean.
pub fn drop_rejected_token() {
    match relayctl_config::delete_token() {
        Ok(true) => debug!("rejected token removed from keyring"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "could not remove rejected token"),
    }
}
