//! CLI configuration: thin wrapper around `relayctl_config` that applies
//! `GlobalOpts` flag overrides (--address, --timeout, --legacy, ...).

use std::path::PathBuf;
use std::time::Duration;

use relayctl_core::{ApiSurface, DeviceConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use relayctl_config::{Config, load_config_from, save_config_to};

/// `--config` if given, else the platform config path.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(relayctl_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(load_config_from(&config_file(global))?)
}

/// Build the controller config: file + env, then CLI flags on top.
///
/// Without `push`, WebSocket and MQTT stay closed and the session is
/// plain request/response HTTP.
pub fn device_config(global: &GlobalOpts, push: bool) -> Result<DeviceConfig, CliError> {
    let cfg = load(global)?;
    let mut device = cfg.to_device_config()?;
    apply_overrides(&mut device, global)?;
    if !push {
        device = device.http_only();
    }
    Ok(device)
}

fn apply_overrides(device: &mut DeviceConfig, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(address) = &global.address {
        device.address = Some(address.parse()?);
    }
    if let Some(ms) = global.timeout {
        if ms == 0 {
            return Err(CliError::Validation {
                field: "timeout".into(),
                reason: "must be greater than zero".into(),
            });
        }
        device.request_timeout = Duration::from_millis(ms);
    }
    if global.no_websocket {
        device.websocket.enabled = false;
    }
    if global.no_mqtt {
        device.mqtt.enabled = false;
    }
    if global.legacy {
        device.surface = ApiSurface::Legacy;
    }
    Ok(())
}
