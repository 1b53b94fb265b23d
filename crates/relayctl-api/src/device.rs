// Device HTTP client
//
// Wraps `reqwest::Client` with the board's two HTTP surfaces: the JSON REST
// API under `/api/*`, and the older `/status` + `/control?..` pair that
// expects a bearer token. Transient failures are retried with linear
// backoff; 401 and undecodable bodies are returned immediately.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::models::{ControlAck, ControlRequest, DeviceStatus, DiagnosticResponse, DiscoveryInfo};
use crate::transport::{RetryPolicy, TransportConfig};

/// Which HTTP surface the firmware exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiSurface {
    /// `/api/status`, `POST /api/control`, `/api/diagnostic`, `/api/discovery`.
    #[default]
    Rest,
    /// `/status` and `GET /control?relay=&state=` behind a bearer token.
    Legacy,
}

impl ApiSurface {
    fn status_path(self) -> &'static str {
        match self {
            Self::Rest => "api/status",
            Self::Legacy => "status",
        }
    }
}

/// HTTP client bound to one device.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: Url,
    surface: ApiSurface,
    retry: RetryPolicy,
    timeout: Duration,
}

impl DeviceClient {
    /// Build a client for `base_url` (e.g. `http://192.168.1.100/`).
    pub fn new(
        base_url: Url,
        surface: ApiSurface,
        transport: &TransportConfig,
        retry: RetryPolicy,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, surface, retry, transport.timeout))
    }

    /// Build a client around an existing `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        surface: ApiSurface,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            surface,
            retry,
            timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn surface(&self) -> ApiSurface {
        self.surface
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Current relay, feedback and radio status.
    pub async fn status(&self) -> Result<DeviceStatus, Error> {
        let url = self.url(self.surface.status_path())?;
        self.with_retry("status", || self.get(url.clone())).await
    }

    /// Drive `relay` (1 or 2) to `state`.
    pub async fn control(&self, relay: u8, state: bool) -> Result<ControlAck, Error> {
        match self.surface {
            ApiSurface::Rest => {
                let url = self.url("api/control")?;
                let body = ControlRequest { relay, state };
                self.with_retry("control", || self.post(url.clone(), &body))
                    .await
            }
            ApiSurface::Legacy => {
                let mut url = self.url("control")?;
                url.query_pairs_mut()
                    .append_pair("relay", &relay.to_string())
                    .append_pair("state", if state { "true" } else { "false" });
                self.with_retry("control", || self.get(url.clone())).await
            }
        }
    }

    /// Output-vs-feedback comparison computed on the device.
    pub async fn diagnostic(&self) -> Result<DiagnosticResponse, Error> {
        let url = self.url("api/diagnostic")?;
        self.with_retry("diagnostic", || self.get(url.clone())).await
    }

    /// Identity probe. Never retried.
    pub async fn discovery(&self) -> Result<DiscoveryInfo, Error> {
        let url = self.url("api/discovery")?;
        self.get(url).await
    }

    /// Single liveness check against this client's surface.
    ///
    /// REST: `/api/discovery` must answer 2xx with a body that identifies
    /// the board (see [`DiscoveryInfo::identifies`]). Legacy: any 2xx from
    /// `/status`.
    pub async fn probe(&self, marker: &str) -> Result<bool, Error> {
        match self.surface {
            ApiSurface::Rest => Ok(self.discovery().await?.identifies(marker)),
            ApiSurface::Legacy => {
                let url = self.url(self.surface.status_path())?;
                debug!("GET {}", url);
                let resp = self.http.get(url).send().await.map_err(|e| self.map_send(e))?;
                Ok(resp.status().is_success())
            }
        }
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send(e))?;

        self.parse(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, url: Url, body: &impl Serialize) -> Result<T, Error> {
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send(e))?;

        self.parse(resp).await
    }

    async fn parse<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Unauthorized);
        }

        let body = resp.text().await.map_err(|e| self.map_send(e))?;

        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    fn map_send(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_ms: duration_ms(self.timeout),
            }
        } else {
            Error::Transport(err)
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget
    /// runs out. Attempt `n` waits `n * unit` before running again.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        op,
                        attempt,
                        delay_ms = duration_ms(delay),
                        error = %e,
                        "Device request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if attempt > 0 && e.is_transient() => {
                    return Err(Error::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
