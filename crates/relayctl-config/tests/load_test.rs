#![allow(clippy::unwrap_used)]
// Figment layering: defaults <- TOML file <- RELAYCTL_ environment.

use figment::Jail;
use pretty_assertions::assert_eq;

use relayctl_api::ApiSurface;
use relayctl_config::{Config, ConfigError, load_config_from, save_config_to};

fn load(jail: &Jail) -> Result<Config, figment::Error> {
    load_config_from(&jail.directory().join("config.toml")).map_err(|e| e.to_string().into())
}

#[test]
fn missing_file_yields_defaults() {
    Jail::expect_with(|jail| {
        assert_eq!(load(jail)?, Config::default());
        Ok(())
    });
}

#[test]
fn file_overrides_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
                [device]
                address = "192.168.4.1"
                api = "legacy"
                refresh_interval_ms = 0

                [mqtt]
                enabled = false
                broker = "mqtt://broker.lan"

                [log]
                capacity = 20
            "#,
        )?;

        let cfg = load(jail)?;
        assert_eq!(cfg.device.address.as_deref(), Some("192.168.4.1"));
        assert_eq!(cfg.device.api, ApiSurface::Legacy);
        assert_eq!(cfg.device.refresh_interval_ms, 0);
        assert_eq!(cfg.device.timeout_ms, 5000);
        assert!(!cfg.mqtt.enabled);
        assert_eq!(cfg.mqtt.broker, "mqtt://broker.lan");
        assert_eq!(cfg.mqtt.topic_prefix, "home/esp32");
        assert_eq!(cfg.log.capacity, 20);
        Ok(())
    });
}

#[test]
fn environment_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[log]\ncapacity = 12\n")?;
        jail.set_env("RELAYCTL_LOG__CAPACITY", "15");
        jail.set_env("RELAYCTL_WEBSOCKET__ENABLED", "false");
        jail.set_env("RELAYCTL_TOKEN", "ignored-by-loader");

        let cfg = load(jail)?;
        assert_eq!(cfg.log.capacity, 15);
        assert!(!cfg.websocket.enabled);
        Ok(())
    });
}

#[test]
fn out_of_range_capacity_fails_to_load() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[log]\ncapacity = 50\n")?;
        let err = load_config_from(&jail.directory().join("config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }), "got: {err}");
        Ok(())
    });
}

#[test]
fn saved_config_reloads_identically() {
    // Jail serialises env access with the tests above.
    Jail::expect_with(|_jail| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayctl/config.toml");

        let mut cfg = Config::default();
        cfg.device.address = Some("10.0.0.100".into());
        cfg.discovery.subnet_sweep = false;
        cfg.discovery.static_candidates = vec!["10.0.0.100".into()];
        save_config_to(&cfg, &path).unwrap();

        assert_eq!(load_config_from(&path).unwrap(), cfg);
        Ok(())
    });
}
