// Wire models for the device's HTTP, WebSocket, and MQTT surfaces.
//
// Field defaults mirror the firmware's habit of omitting fields it has
// nothing to say about: a missing boolean is `false`, a missing RSSI is 0.

use serde::{Deserialize, Deserializer, Serialize};

// ── HTTP ─────────────────────────────────────────────────────────────

/// `GET /api/status` (and legacy `GET /status`) response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(default)]
    pub relay1: bool,
    #[serde(default)]
    pub relay2: bool,
    #[serde(default)]
    pub feedback1: bool,
    #[serde(default)]
    pub feedback2: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub rssi: i32,
    /// Reported by some firmware builds; used to pin an mDNS hit to an IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Legacy firmware only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi_ssid: Option<String>,
}

/// `POST /api/control` request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub relay: u8,
    pub state: bool,
}

/// Control acknowledgement, normalised across both HTTP surfaces.
///
/// REST firmware answers `{"success": true}`; legacy firmware answers
/// `{"status": "success", "feedback1": .., "feedback2": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlAck {
    pub success: bool,
    pub feedback1: Option<bool>,
    pub feedback2: Option<bool>,
}

#[derive(Deserialize)]
struct RawControlAck {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    feedback1: Option<bool>,
    #[serde(default)]
    feedback2: Option<bool>,
}

impl<'de> Deserialize<'de> for ControlAck {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawControlAck::deserialize(deserializer)?;
        let success = raw
            .success
            .unwrap_or_else(|| raw.status.as_deref() == Some("success"));
        Ok(Self {
            success,
            feedback1: raw.feedback1,
            feedback2: raw.feedback2,
        })
    }
}

impl ControlAck {
    /// Feedback echoed in the ack as a partial frame; `None` when the
    /// firmware sent none.
    pub fn feedback_frame(&self) -> Option<StatusFrame> {
        if self.feedback1.is_none() && self.feedback2.is_none() {
            return None;
        }
        Some(StatusFrame {
            feedback1: self.feedback1,
            feedback2: self.feedback2,
            ..StatusFrame::default()
        })
    }
}

/// Per-relay entry of `GET /api/diagnostic`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDiagnostic {
    #[serde(default)]
    pub output: bool,
    #[serde(default)]
    pub feedback: bool,
    #[serde(default, rename = "match")]
    pub matched: bool,
}

/// `GET /api/diagnostic` response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticResponse {
    #[serde(default)]
    pub relay1: RelayDiagnostic,
    #[serde(default)]
    pub relay2: RelayDiagnostic,
}

/// `GET /api/discovery` identity probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

impl DiscoveryInfo {
    /// Whether this answer identifies a relay board.
    ///
    /// Accepted when the name contains `marker` or the device reports its IP.
    pub fn identifies(&self, marker: &str) -> bool {
        let named = self.name.as_deref().is_some_and(|n| n.contains(marker));
        let has_ip = self.ip.as_deref().is_some_and(|ip| !ip.is_empty());
        named || has_ip
    }
}

// ── WebSocket ────────────────────────────────────────────────────────

/// Inbound WebSocket frame; every field is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFrame {
    #[serde(default)]
    pub relay1: Option<bool>,
    #[serde(default)]
    pub relay2: Option<bool>,
    #[serde(default)]
    pub feedback1: Option<bool>,
    #[serde(default)]
    pub feedback2: Option<bool>,
    #[serde(default)]
    pub error: Option<bool>,
}

/// Outbound WebSocket command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    pub relay: u8,
    pub state: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ControlFrame {
    pub fn now(relay: u8, state: bool) -> Self {
        Self {
            relay,
            state,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

// ── MQTT ─────────────────────────────────────────────────────────────

/// A relay state as firmware publishes it: `true`, `"ON"`, or `1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl StateValue {
    /// Only `true`, `"ON"` and `1` mean on. Everything else is off.
    pub fn is_on(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => n.as_f64() == Some(1.0),
            Self::Text(s) => s == "ON",
        }
    }
}

/// Payload on `<prefix>/feedback1` and `<prefix>/feedback2`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackPayload {
    #[serde(default)]
    pub state: Option<StateValue>,
}

impl FeedbackPayload {
    pub fn is_on(&self) -> bool {
        self.state.as_ref().is_some_and(StateValue::is_on)
    }
}

/// Payload on `<prefix>/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default)]
    pub ip: Option<String>,
}

/// Payload on `<prefix>/error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "errorCode", alias = "code", default)]
    pub error_code: i64,
    #[serde(default)]
    pub message: String,
    /// Milliseconds since the Unix epoch, when the firmware sends one.
    #[serde(default)]
    pub timestamp: Option<i64>,
}
