use thiserror::Error;

/// Top-level error type for the `relayctl-api` crate.
///
/// Covers every failure mode across the three wire surfaces: HTTP
/// (REST and legacy), WebSocket, and MQTT. `relayctl-core` maps these
/// into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authorization ───────────────────────────────────────────────
    /// The device rejected the bearer token (HTTP 401).
    #[error("Unauthorized -- the device rejected the session token")]
    Unauthorized,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Non-success HTTP status other than 401.
    #[error("Device answered HTTP {status}")]
    Status { status: u16, body: String },

    /// Every retry attempt failed; carries the last error.
    #[error("Request failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// Send attempted while the socket is not in the open state.
    #[error("WebSocket is not open")]
    WebSocketNotOpen,

    // ── MQTT ────────────────────────────────────────────────────────
    /// MQTT client or event-loop failure.
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// Publish attempted while the broker session is down.
    #[error("MQTT broker is not connected")]
    MqttNotConnected,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    ///
    /// Authorization failures and malformed payloads never are.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_decode() && !e.is_builder(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::Mqtt(_) => true,
            Self::Status { status, .. } => *status != 401,
            Self::RetriesExhausted { last, .. } => last.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` if the device rejected our credentials.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Unauthorized => true,
            Self::RetriesExhausted { last, .. } => last.is_unauthorized(),
            _ => false,
        }
    }

    /// Returns `true` for "the channel is not open right now" conditions,
    /// which callers treat as a signal to fall back to another transport.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::WebSocketNotOpen | Self::MqttNotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_are_transient_except_401() {
        let server_err = Error::Status {
            status: 503,
            body: String::new(),
        };
        assert!(server_err.is_transient());
        assert!(!Error::Unauthorized.is_transient());
    }

    #[test]
    fn deserialization_is_never_retried() {
        let err = Error::Deserialization {
            message: "expected value".into(),
            body: "<html>".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn exhausted_retries_keep_the_cause() {
        let err = Error::RetriesExhausted {
            attempts: 4,
            last: Box::new(Error::Timeout { timeout_ms: 5000 }),
        };
        assert!(err.is_transient());
        assert!(!err.is_unauthorized());
        assert!(err.to_string().contains("4 attempts"));
    }
}
