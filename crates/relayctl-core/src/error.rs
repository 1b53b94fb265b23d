// ── Core error types ──
//
// User-facing errors from relayctl-core. Consumers never see HTTP status
// codes or JSON parse failures directly; the `From<relayctl_api::Error>`
// impl translates wire-level errors into domain variants.

use thiserror::Error;

use crate::model::TransportKind;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Not connected to a device")]
    NotConnected,

    #[error("No device found on the network")]
    DeviceNotFound,

    #[error("Cannot reach device at {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Device rejected the session token")]
    Unauthorized,

    #[error("Device did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Dispatch errors ──────────────────────────────────────────────
    #[error("{transport} transport is not ready")]
    TransportNotReady { transport: TransportKind },

    #[error("No transport is ready to carry the command")]
    NoTransportAvailable,

    // ── Validation errors ────────────────────────────────────────────
    #[error("Invalid device address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid relay '{relay}' (expected 1 or 2)")]
    InvalidRelay { relay: String },

    // ── Protocol / API errors ────────────────────────────────────────
    #[error("Unexpected response from device: {message}")]
    Protocol { message: String },

    #[error("Device API error: {message}")]
    Api {
        message: String,
        /// HTTP status, when there was one.
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Whether the failure is a network hiccup rather than a hard refusal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::Api { .. }
        )
    }
}

// ── Conversion from wire-level errors ────────────────────────────────

impl From<relayctl_api::Error> for CoreError {
    fn from(err: relayctl_api::Error) -> Self {
        use relayctl_api::Error as Api;

        match err {
            Api::Unauthorized => CoreError::Unauthorized,
            Api::Transport(ref e) => {
                let address = e
                    .url()
                    .and_then(|u| u.host_str().map(str::to_owned))
                    .unwrap_or_else(|| "<unknown>".into());
                CoreError::ConnectionFailed {
                    address,
                    reason: e.to_string(),
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            Api::Status { status, body } => CoreError::Api {
                message: if body.is_empty() {
                    format!("HTTP {status}")
                } else {
                    format!("HTTP {status}: {body}")
                },
                status: Some(status),
            },
            Api::RetriesExhausted { last, .. } => CoreError::from(*last),
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                address: String::new(),
                reason: format!("WebSocket: {reason}"),
            },
            Api::WebSocketNotOpen => CoreError::TransportNotReady {
                transport: TransportKind::WebSocket,
            },
            Api::Mqtt(reason) => CoreError::ConnectionFailed {
                address: String::new(),
                reason: format!("MQTT: {reason}"),
            },
            Api::MqttNotConnected => CoreError::TransportNotReady {
                transport: TransportKind::Mqtt,
            },
            Api::Deserialization { message, body: _ } => CoreError::Protocol { message },
        }
    }
}
