//! Config subcommand handlers.

use dialoguer::{Confirm, Input, Select};
use secrecy::SecretString;

use relayctl_core::{ApiSurface, DeviceAddress};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of the config safe to print: plaintext token masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    if cfg.device.token.is_some() {
        cfg.device.token = Some("****".into());
    }
    cfg
}

fn format_config(cfg: &Config) -> String {
    toml::to_string_pretty(cfg).unwrap_or_else(|e| format!("# could not render config: {e}"))
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Offer to store the token in the keyring; returns it back if the user
/// chose plaintext.
fn prompt_token_storage(token: String) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt("Where to store the token?")
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        relayctl_config::store_token(&SecretString::from(token))?;
        eprintln!("   ✓ Token stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(token))
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let path = config::config_file(global);
            eprintln!("relayctl configuration wizard");
            eprintln!("   Config path: {}\n", path.display());

            let mut cfg = Config::default();

            // 1. Address (blank = discover on every run)
            let address: String = Input::new()
                .with_prompt("Device address (blank to discover)")
                .allow_empty(true)
                .validate_with(|input: &String| -> Result<(), String> {
                    if input.is_empty() {
                        return Ok(());
                    }
                    input
                        .parse::<DeviceAddress>()
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
                .interact_text()
                .map_err(prompt_err)?;
            cfg.device.address = (!address.is_empty()).then_some(address);

            // 2. Firmware surface
            let surfaces = &["REST (/api/*)", "Legacy (/status, /control, bearer token)"];
            let surface = Select::new()
                .with_prompt("Firmware API")
                .items(surfaces)
                .default(0)
                .interact()
                .map_err(prompt_err)?;

            if surface == 1 {
                cfg.device.api = ApiSurface::Legacy;
                let token = rpassword::prompt_password("Bearer token (blank to skip): ")
                    .map_err(prompt_err)?;
                if !token.is_empty() {
                    cfg.device.token = prompt_token_storage(token)?;
                }
            }

            // 3. Push channels
            cfg.websocket.enabled = Confirm::new()
                .with_prompt("Use the WebSocket channel (port 81)?")
                .default(true)
                .interact()
                .map_err(prompt_err)?;

            cfg.mqtt.enabled = Confirm::new()
                .with_prompt("Use an MQTT broker?")
                .default(true)
                .interact()
                .map_err(prompt_err)?;
            if cfg.mqtt.enabled {
                cfg.mqtt.broker = Input::new()
                    .with_prompt("Broker URL")
                    .default(cfg.mqtt.broker.clone())
                    .interact_text()
                    .map_err(prompt_err)?;
            }

            cfg.validate()?;
            config::save_config_to(&cfg, &path)?;

            eprintln!("\n✓ Configuration written to {}", path.display());
            eprintln!("\n  Test it: relayctl status");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = redacted(&config::load(global)?);
            let out = output::render_single(&global.output, &cfg, format_config, |c| {
                c.device.address.clone().unwrap_or_default()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            println!("{}", config::config_file(global).display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_masks_plaintext_token() {
        let mut cfg = Config::default();
        cfg.device.token = Some("secret-token".into());
        let text = format_config(&redacted(&cfg));
        assert!(!text.contains("secret-token"));
        assert!(text.contains("****"));
    }
}
