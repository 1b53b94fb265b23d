//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use relayctl_config::ConfigError;
use relayctl_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to device at {address}")]
    #[diagnostic(
        code(relayctl::connection_failed),
        help(
            "{reason}\n\
             Check that the board is powered and on the same network.\n\
             Try: relayctl discover"
        )
    )]
    ConnectionFailed { address: String, reason: String },

    #[error("Not connected to a device")]
    #[diagnostic(
        code(relayctl::not_connected),
        help("The connection dropped before the command was sent. Retry the command.")
    )]
    NotConnected,

    #[error("No transport could carry the command")]
    #[diagnostic(
        code(relayctl::no_transport),
        help("WebSocket, MQTT and HTTP were all down. Check the board's network link.")
    )]
    NoTransport,

    #[error("No device found on the network")]
    #[diagnostic(
        code(relayctl::not_found),
        help(
            "Scanned the cached address, the mDNS name, the local subnet and the fallback list.\n\
             If you know the address, run: relayctl connect <ADDRESS>"
        )
    )]
    DeviceNotFound,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Device rejected the session token")]
    #[diagnostic(
        code(relayctl::auth_failed),
        help(
            "The stored token and cached address were cleared.\n\
             Log in again with: relayctl auth login"
        )
    )]
    AuthFailed,

    // ── Device ───────────────────────────────────────────────────────
    #[error("Device error: {message}")]
    #[diagnostic(code(relayctl::device))]
    Device { message: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Device did not answer within {millis}ms")]
    #[diagnostic(
        code(relayctl::timeout),
        help("Increase the timeout with --timeout or check the board's Wi-Fi signal.")
    )]
    Timeout { millis: u64 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(relayctl::validation))]
    Validation { field: String, reason: String },

    #[error("'{action}' requires confirmation")]
    #[diagnostic(
        code(relayctl::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(relayctl::config),
        help("Inspect the file with: relayctl config show")
    )]
    Config(#[from] ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected | Self::NoTransport => {
                exit_code::CONNECTION
            }
            Self::AuthFailed => exit_code::AUTH,
            Self::DeviceNotFound => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            Self::Config(ConfigError::Validation { .. } | ConfigError::Figment(_)) => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { address, reason } => {
                CliError::ConnectionFailed { address, reason }
            }
            CoreError::NotConnected => CliError::NotConnected,
            CoreError::TransportNotReady { .. } | CoreError::NoTransportAvailable => {
                CliError::NoTransport
            }
            CoreError::DeviceNotFound => CliError::DeviceNotFound,
            CoreError::Unauthorized => CliError::AuthFailed,
            CoreError::Timeout { timeout_ms } => CliError::Timeout { millis: timeout_ms },
            CoreError::InvalidAddress { address, reason } => CliError::Validation {
                field: "address".into(),
                reason: format!("'{address}': {reason}"),
            },
            CoreError::InvalidRelay { relay } => CliError::Validation {
                field: "relay".into(),
                reason: format!("'{relay}' (expected 1 or 2)"),
            },
            CoreError::Protocol { message } => CliError::Device { message },
            CoreError::Api { message, status } => CliError::Device {
                message: match status {
                    Some(s) => format!("HTTP {s}: {message}"),
                    None => message,
                },
            },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        assert_eq!(CliError::from(CoreError::Unauthorized).exit_code(), exit_code::AUTH);
        assert_eq!(CliError::from(CoreError::DeviceNotFound).exit_code(), exit_code::NOT_FOUND);
        assert_eq!(
            CliError::from(CoreError::Timeout { timeout_ms: 5000 }).exit_code(),
            exit_code::TIMEOUT
        );
        assert_eq!(
            CliError::from(CoreError::NoTransportAvailable).exit_code(),
            exit_code::CONNECTION
        );
        assert_eq!(
            CliError::from(CoreError::InvalidAddress {
                address: "a b".into(),
                reason: "whitespace".into(),
            })
            .exit_code(),
            exit_code::USAGE
        );
    }
}
