// Shared transport configuration for building reqwest::Client instances.
//
// The device client and the discovery prober share timeout, user-agent,
// and bearer-token settings through this module.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

const USER_AGENT: &str = concat!("relayctl/", env!("CARGO_PKG_VERSION"));

/// Linear retry policy: attempt `n` (1-based) waits `n * unit` before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Backoff unit. Default: 1s.
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No retries at all (discovery probes, one-shot calls).
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            unit: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): `attempt * unit`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.unit.saturating_mul(attempt)
    }
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    /// Bearer token for the legacy `/status` + `/control` surface.
    pub token: Option<SecretString>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            token: None,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// When a token is configured it is attached to every request as
    /// `Authorization: Bearer <token>`.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        if let Some(ref token) = self.token {
            let mut headers = HeaderMap::new();
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| Error::Unauthorized)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        builder.build().map_err(Error::Transport)
    }
}
