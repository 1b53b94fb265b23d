// ── Domain model ──
//
// Canonical types shared by the controller, transports, and consumers.
// Wire shapes live in relayctl-api; these are what the rest of the
// workspace reasons about.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use url::Url;

use crate::error::CoreError;

// ── RelayId ──────────────────────────────────────────────────────────

/// One of the board's two relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RelayId {
    One,
    Two,
}

impl RelayId {
    pub const ALL: [Self; 2] = [Self::One, Self::Two];

    /// 1-based index as the firmware numbers relays.
    pub fn index(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

impl TryFrom<u8> for RelayId {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(CoreError::InvalidRelay {
                relay: other.to_string(),
            }),
        }
    }
}

impl From<RelayId> for u8 {
    fn from(relay: RelayId) -> Self {
        relay.index()
    }
}

impl FromStr for RelayId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u8 = s.trim().parse().map_err(|_| CoreError::InvalidRelay {
            relay: s.to_owned(),
        })?;
        Self::try_from(n)
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

// ── DeviceAddress ────────────────────────────────────────────────────

/// Hostname or dotted quad, with an optional `:port`.
///
/// No scheme, no path, no whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host part, without any port.
    pub fn host(&self) -> &str {
        match self.0.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                host
            }
            _ => &self.0,
        }
    }

    /// `http://<address>/`
    pub fn base_url(&self) -> Result<Url, CoreError> {
        Url::parse(&format!("http://{}/", self.0)).map_err(|e| CoreError::InvalidAddress {
            address: self.0.clone(),
            reason: e.to_string(),
        })
    }

    /// `ws://<host>:<port>/`; any port in the address is replaced.
    pub fn ws_url(&self, port: u16) -> Result<Url, CoreError> {
        Url::parse(&format!("ws://{}:{port}/", self.host())).map_err(|e| {
            CoreError::InvalidAddress {
                address: self.0.clone(),
                reason: e.to_string(),
            }
        })
    }
}

impl FromStr for DeviceAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CoreError::InvalidAddress {
            address: s.to_owned(),
            reason: reason.to_owned(),
        };
        let s = s.trim();
        if s.is_empty() {
            return Err(invalid("address is empty"));
        }
        if s.contains("://") {
            return Err(invalid("omit the scheme (use 192.168.1.100, not http://192.168.1.100)"));
        }
        if s.contains('/') {
            return Err(invalid("address must not contain a path"));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(invalid("address must not contain whitespace"));
        }
        let addr = Self(s.to_owned());
        addr.base_url()?;
        Ok(addr)
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(addr: DeviceAddress) -> Self {
        addr.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Relay state ──────────────────────────────────────────────────────

/// Commanded output and observed feedback for one relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayState {
    pub commanded: bool,
    pub feedback: bool,
}

impl RelayState {
    pub fn is_mismatch(self) -> bool {
        self.commanded != self.feedback
    }
}

// ── Link / connection status ─────────────────────────────────────────

/// Per-transport link status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Overall controller connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// The three transports, declared in dispatch priority order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[strum(serialize = "websocket")]
    WebSocket,
    #[strum(serialize = "mqtt")]
    Mqtt,
    #[strum(serialize = "http")]
    Http,
}

// ── Diagnostics ──────────────────────────────────────────────────────

/// One relay's line in a diagnostic report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDiagnosis {
    pub output: bool,
    pub feedback: bool,
    #[serde(rename = "match")]
    pub matched: bool,
}

impl From<RelayState> for RelayDiagnosis {
    fn from(state: RelayState) -> Self {
        Self {
            output: state.commanded,
            feedback: state.feedback,
            matched: !state.is_mismatch(),
        }
    }
}

impl From<relayctl_api::models::RelayDiagnostic> for RelayDiagnosis {
    fn from(d: relayctl_api::models::RelayDiagnostic) -> Self {
        Self {
            output: d.output,
            feedback: d.feedback,
            matched: d.matched,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSource {
    /// The device computed the comparison.
    Device,
    /// Built from the last known state because the device did not answer.
    Cached,
}

/// Output-vs-feedback comparison for both relays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub relay1: RelayDiagnosis,
    pub relay2: RelayDiagnosis,
    pub source: DiagnosticSource,
    pub taken_at: DateTime<Utc>,
}

impl DiagnosticReport {
    pub fn relay(&self, relay: RelayId) -> RelayDiagnosis {
        match relay {
            RelayId::One => self.relay1,
            RelayId::Two => self.relay2,
        }
    }

    /// Relays whose output and feedback disagree.
    pub fn mismatches(&self) -> impl Iterator<Item = RelayId> + '_ {
        RelayId::ALL
            .into_iter()
            .filter(|r| !self.relay(*r).matched)
    }
}

// ── Notices ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Short user-facing message about something that just happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn relay_id_bounds() {
        assert_eq!(RelayId::try_from(1).unwrap(), RelayId::One);
        assert_eq!("2".parse::<RelayId>().unwrap(), RelayId::Two);
        assert!(RelayId::try_from(0).is_err());
        assert!(RelayId::try_from(3).is_err());
        assert!("x".parse::<RelayId>().is_err());
        assert_eq!(serde_json::to_string(&RelayId::Two).unwrap(), "2");
    }

    #[test]
    fn address_validation() {
        assert!("192.168.1.100".parse::<DeviceAddress>().is_ok());
        assert!("esp32s3.local".parse::<DeviceAddress>().is_ok());
        assert!("10.0.0.5:8080".parse::<DeviceAddress>().is_ok());
        assert!("".parse::<DeviceAddress>().is_err());
        assert!("http://192.168.1.100".parse::<DeviceAddress>().is_err());
        assert!("192.168.1.100/api".parse::<DeviceAddress>().is_err());
        assert!("192.168 .1.100".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn address_urls() {
        let addr: DeviceAddress = "10.0.0.5:8080".parse().unwrap();
        assert_eq!(addr.host(), "10.0.0.5");
        assert_eq!(addr.base_url().unwrap().as_str(), "http://10.0.0.5:8080/");
        assert_eq!(addr.ws_url(81).unwrap().as_str(), "ws://10.0.0.5:81/");

        let bare: DeviceAddress = "esp32s3.local".parse().unwrap();
        assert_eq!(bare.host(), "esp32s3.local");
    }

    #[test]
    fn transport_priority_follows_declaration() {
        assert!(TransportKind::WebSocket < TransportKind::Mqtt);
        assert!(TransportKind::Mqtt < TransportKind::Http);
        assert_eq!(TransportKind::WebSocket.to_string(), "websocket");
    }

    #[test]
    fn report_mismatches() {
        let report = DiagnosticReport {
            relay1: RelayDiagnosis {
                output: true,
                feedback: false,
                matched: false,
            },
            relay2: RelayDiagnosis::from(RelayState::default()),
            source: DiagnosticSource::Cached,
            taken_at: Utc::now(),
        };
        assert_eq!(report.mismatches().collect::<Vec<_>>(), vec![RelayId::One]);
    }
}
