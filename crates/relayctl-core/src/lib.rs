//! Domain layer between `relayctl-api` and its consumers.
//!
//! - **[`Controller`]**: one device session. [`connect()`](Controller::connect)
//!   resolves an address (configured, cached, or discovered), opens the
//!   WebSocket, MQTT and HTTP transports, and keeps the [`DeviceState`]
//!   current. [`control_relay()`](Controller::control_relay) dispatches over
//!   the first ready transport in WebSocket > MQTT > HTTP order.
//!
//! - **[`Discovery`]**: sequential probe of cached address, mDNS host,
//!   local /24 sweep, and static fallbacks.
//!
//! - **[`StateStore`]**: `watch`-backed state record with edge-triggered
//!   feedback mismatch logging into a bounded [`ErrorLog`].

pub mod cache;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod error_log;
pub mod model;
pub mod store;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{AddressStore, CachedAddress, FORGET_AFTER_FAILURES, MemoryAddressStore};
pub use config::{DeviceConfig, DiscoveryConfig, MqttConfig, WebSocketConfig};
pub use controller::Controller;
pub use discovery::{Discovery, HttpProber, LocalNetwork, Prober, SystemNetwork};
pub use error::CoreError;
pub use error_log::{ErrorCode, ErrorLog, ErrorLogEntry};
pub use model::{
    ConnectionState, DeviceAddress, DiagnosticReport, DiagnosticSource, LinkStatus, Notice,
    NoticeLevel, RelayDiagnosis, RelayId, RelayState, TransportKind,
};
pub use store::{DeviceState, StateStore, StateUpdate};
pub use transport::{HttpTransport, MqttTransport, Transport, WebSocketTransport};

pub use relayctl_api::ApiSurface;
