//! Shared configuration for relayctl.
//!
//! TOML file + `RELAYCTL_` environment overlay, bearer token resolution
//! (env + keyring + plaintext), the on-disk address cache, and translation
//! to `relayctl_core::DeviceConfig`. The core never reads files itself.

mod address;

pub use address::FileAddressStore;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use relayctl_api::{ApiSurface, MqttSettings, ReconnectConfig, RetryPolicy};
use relayctl_core::error_log::{DEFAULT_CAPACITY, MAX_CAPACITY, MIN_CAPACITY};
use relayctl_core::{DeviceAddress, DeviceConfig, DiscoveryConfig, MqttConfig, WebSocketConfig};

const KEYRING_SERVICE: &str = "relayctl";
const KEYRING_USER: &str = "token";

/// Environment variable holding the bearer token.
pub const TOKEN_ENV: &str = "RELAYCTL_TOKEN";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub device: DeviceSection,
    pub discovery: DiscoverySection,
    pub websocket: WebSocketSection,
    pub mqtt: MqttSection,
    pub log: LogSection,
}

/// CLI presentation defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Defaults {
    pub output: String,
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: "table".into(),
            color: "auto".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Fixed device address; discovery runs when unset.
    pub address: Option<String>,
    /// `"rest"` or `"legacy"`.
    pub api: ApiSurface,
    /// Bearer token (plaintext; prefer the keyring or `RELAYCTL_TOKEN`).
    pub token: Option<String>,
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    /// Status poll period; 0 disables polling.
    pub refresh_interval_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for DeviceSection {
    fn default() -> Self {
        let core = DeviceConfig::default();
        Self {
            address: None,
            api: core.surface,
            token: None,
            timeout_ms: millis(core.request_timeout),
            retries: core.retry.max_retries,
            retry_backoff_ms: millis(core.retry.unit),
            refresh_interval_ms: millis(core.refresh_interval),
            connect_timeout_ms: millis(core.connect_timeout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub cache_timeout_ms: u64,
    /// Empty disables the mDNS stage.
    pub mdns_host: String,
    pub mdns_timeout_ms: u64,
    pub subnet_sweep: bool,
    pub subnet_timeout_ms: u64,
    pub static_candidates: Vec<String>,
    pub static_timeout_ms: u64,
    pub identity_marker: String,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        let core = DiscoveryConfig::default();
        Self {
            cache_timeout_ms: millis(core.cache_timeout),
            mdns_host: core.mdns_host,
            mdns_timeout_ms: millis(core.mdns_timeout),
            subnet_sweep: core.subnet_sweep,
            subnet_timeout_ms: millis(core.subnet_timeout),
            static_candidates: core
                .static_candidates
                .into_iter()
                .map(String::from)
                .collect(),
            static_timeout_ms: millis(core.static_timeout),
            identity_marker: core.identity_marker,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketSection {
    pub enabled: bool,
    pub port: u16,
    pub reconnect_delay_ms: u64,
}

impl Default for WebSocketSection {
    fn default() -> Self {
        let core = WebSocketConfig::default();
        Self {
            enabled: core.enabled,
            port: core.port,
            reconnect_delay_ms: millis(core.reconnect.delay),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttSection {
    pub enabled: bool,
    /// `wss://`, `ws://`, `mqtts://` or `mqtt://` URL.
    pub broker: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        let core = MqttConfig::default();
        Self {
            enabled: core.enabled,
            broker: core.settings.broker,
            client_id: core.settings.client_id,
            topic_prefix: core.settings.topic_prefix,
            keep_alive_secs: core.settings.keep_alive.as_secs(),
            reconnect_delay_ms: millis(core.settings.reconnect_delay),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogSection {
    /// Error log entries kept in memory (10–20).
    pub capacity: usize,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Config file path ────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "relayctl", "relayctl")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Where the last connected address is remembered.
pub fn cache_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".cache").join("last_device.json"),
        |dirs| dirs.cache_dir().join("last_device.json"),
    )
}

fn dirs_fallback(base: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(base);
    p.push("relayctl");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file path, then overlay `RELAYCTL_*` variables.
///
/// Nested keys use `__`: `RELAYCTL_LOG__CAPACITY=15`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RELAYCTL_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Range and format checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&self.log.capacity) {
            return Err(invalid(
                "log.capacity",
                format!(
                    "must be between {MIN_CAPACITY} and {MAX_CAPACITY}, got {}",
                    self.log.capacity
                ),
            ));
        }
        if let Some(address) = &self.device.address {
            parse_address("device.address", address)?;
        }
        for candidate in &self.discovery.static_candidates {
            parse_address("discovery.static_candidates", candidate)?;
        }
        if self.device.timeout_ms == 0 {
            return Err(invalid("device.timeout_ms", "must be greater than zero"));
        }
        if self.websocket.port == 0 {
            return Err(invalid("websocket.port", "must be greater than zero"));
        }
        Ok(())
    }

    /// Build the core's `DeviceConfig`, resolving the token through the
    /// full credential chain.
    pub fn to_device_config(&self) -> Result<DeviceConfig, ConfigError> {
        self.to_device_config_with(resolve_token(self))
    }

    /// Build the core's `DeviceConfig` with an already-resolved token.
    pub fn to_device_config_with(
        &self,
        token: Option<SecretString>,
    ) -> Result<DeviceConfig, ConfigError> {
        self.validate()?;

        let device = &self.device;
        let address = device
            .address
            .as_deref()
            .map(|a| parse_address("device.address", a))
            .transpose()?;

        let d = &self.discovery;
        let discovery = DiscoveryConfig {
            cache_timeout: Duration::from_millis(d.cache_timeout_ms),
            mdns_host: d.mdns_host.clone(),
            mdns_timeout: Duration::from_millis(d.mdns_timeout_ms),
            subnet_sweep: d.subnet_sweep,
            subnet_timeout: Duration::from_millis(d.subnet_timeout_ms),
            static_candidates: d
                .static_candidates
                .iter()
                .map(|c| parse_address("discovery.static_candidates", c))
                .collect::<Result<_, _>>()?,
            static_timeout: Duration::from_millis(d.static_timeout_ms),
            identity_marker: d.identity_marker.clone(),
        };

        let websocket = WebSocketConfig {
            enabled: self.websocket.enabled,
            port: self.websocket.port,
            reconnect: ReconnectConfig {
                delay: Duration::from_millis(self.websocket.reconnect_delay_ms),
            },
        };

        let m = &self.mqtt;
        let mqtt = MqttConfig {
            enabled: m.enabled,
            settings: MqttSettings {
                broker: m.broker.clone(),
                client_id: m.client_id.clone(),
                topic_prefix: m.topic_prefix.clone(),
                keep_alive: Duration::from_secs(m.keep_alive_secs),
                reconnect_delay: Duration::from_millis(m.reconnect_delay_ms),
            },
        };

        Ok(DeviceConfig {
            address,
            surface: device.api,
            token,
            request_timeout: Duration::from_millis(device.timeout_ms),
            retry: RetryPolicy {
                max_retries: device.retries,
                unit: Duration::from_millis(device.retry_backoff_ms),
            },
            refresh_interval: Duration::from_millis(device.refresh_interval_ms),
            connect_timeout: Duration::from_millis(device.connect_timeout_ms),
            error_log_capacity: self.log.capacity,
            discovery,
            websocket,
            mqtt,
        })
    }
}

fn parse_address(field: &str, value: &str) -> Result<DeviceAddress, ConfigError> {
    value.parse().map_err(|e| invalid(field, format!("{value}: {e}")))
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

/// Resolve the bearer token: `RELAYCTL_TOKEN`, then the system keyring,
/// then plaintext in the config file.
pub fn resolve_token(cfg: &Config) -> Option<SecretString> {
    // 1. Env var
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.is_empty() {
            return Some(SecretString::from(token));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    cfg.device.token.clone().map(SecretString::from)
}

/// Store the bearer token in the system keyring.
pub fn store_token(token: &SecretString) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    entry.set_password(token.expose_secret())?;
    Ok(())
}

/// Remove the stored token. Returns `false` if none was stored.
pub fn delete_token() -> Result<bool, ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    match entry.delete_credential() {
        Ok(()) => Ok(true),
        Err(keyring::Error::NoEntry) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
