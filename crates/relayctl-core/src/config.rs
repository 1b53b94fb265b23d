// ── Runtime device configuration ──
//
// Describes *how* to reach and drive a device. Never touches disk:
// relayctl-config (or a test) builds a `DeviceConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;

use relayctl_api::{ApiSurface, MqttSettings, ReconnectConfig, RetryPolicy};

use crate::error_log::DEFAULT_CAPACITY;
use crate::model::DeviceAddress;

/// Discovery stage settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub cache_timeout: Duration,
    /// Empty disables the mDNS stage.
    pub mdns_host: String,
    pub mdns_timeout: Duration,
    pub subnet_sweep: bool,
    pub subnet_timeout: Duration,
    pub static_candidates: Vec<DeviceAddress>,
    pub static_timeout: Duration,
    /// Substring the `/api/discovery` name must contain.
    pub identity_marker: String,
}

/// Fallback addresses probed last, in order.
pub const DEFAULT_STATIC_CANDIDATES: [&str; 9] = [
    "192.168.1.100",
    "192.168.1.101",
    "192.168.1.102",
    "192.168.0.100",
    "192.168.0.101",
    "192.168.0.102",
    "192.168.4.1",
    "10.0.0.100",
    "172.16.0.100",
];

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_timeout: Duration::from_millis(1000),
            mdns_host: "esp32s3.local".into(),
            mdns_timeout: Duration::from_millis(2000),
            subnet_sweep: true,
            subnet_timeout: Duration::from_millis(300),
            static_candidates: DEFAULT_STATIC_CANDIDATES
                .iter()
                .filter_map(|s| s.parse().ok())
                .collect(),
            static_timeout: Duration::from_millis(500),
            identity_marker: "ESP32".into(),
        }
    }
}

/// WebSocket transport settings.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub port: u16,
    pub reconnect: ReconnectConfig,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 81,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// MQTT transport settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub enabled: bool,
    pub settings: MqttSettings,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settings: MqttSettings::default(),
        }
    }
}

/// Everything the controller needs to reach one device.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Manually configured address; skips discovery when set.
    pub address: Option<DeviceAddress>,
    pub surface: ApiSurface,
    /// Bearer token for the legacy surface.
    pub token: Option<SecretString>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    /// Status poll period. Zero disables polling.
    pub refresh_interval: Duration,
    /// How long `connect_to` waits for any link to come up.
    pub connect_timeout: Duration,
    pub error_log_capacity: usize,
    pub discovery: DiscoveryConfig,
    pub websocket: WebSocketConfig,
    pub mqtt: MqttConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: None,
            surface: ApiSurface::Rest,
            token: None,
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            refresh_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            error_log_capacity: DEFAULT_CAPACITY,
            discovery: DiscoveryConfig::default(),
            websocket: WebSocketConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// HTTP only: no push channels, no background sockets.
    pub fn http_only(mut self) -> Self {
        self.websocket.enabled = false;
        self.mqtt.enabled = false;
        self
    }
}
