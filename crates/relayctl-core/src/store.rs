// ── Device state store ──
//
// Single owner of the device state record. Writers go through
// `watch::Sender::send_modify`, which serialises them; readers hold
// `watch::Receiver`s. Feedback reconciliation runs inside the same
// modification so the mismatch latch never observes a torn state.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use relayctl_api::models::{DeviceStatus, ErrorPayload, StatusFrame};

use crate::error_log::{ErrorCode, ErrorLog, ErrorLogEntry};
use crate::model::{DiagnosticReport, RelayId, RelayState};

// ── StateUpdate ──────────────────────────────────────────────────────

/// Inbound change published by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// Full status from an HTTP poll; authoritative for both relays.
    Snapshot(DeviceStatus),
    /// WebSocket frame; only present fields apply.
    Frame(StatusFrame),
    /// MQTT feedback; the device echoes its actual output.
    Feedback { relay: RelayId, on: bool },
    /// Device-reported IP address.
    DeviceInfo { ip: String },
    /// Fault published by the device.
    DeviceError(ErrorPayload),
}

// ── DeviceState ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub relay1: RelayState,
    pub relay2: RelayState,
    /// Device-reported fault flag.
    pub error: bool,
    pub rssi: i32,
    pub wifi_ssid: Option<String>,
    pub device_ip: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub error_log: ErrorLog,
    /// Per-relay "mismatch already logged" latch.
    #[serde(skip)]
    mismatch_logged: [bool; 2],
}

impl DeviceState {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            relay1: RelayState::default(),
            relay2: RelayState::default(),
            error: false,
            rssi: 0,
            wifi_ssid: None,
            device_ip: None,
            last_update: None,
            error_log: ErrorLog::new(log_capacity),
            mismatch_logged: [false; 2],
        }
    }

    pub fn relay(&self, relay: RelayId) -> RelayState {
        match relay {
            RelayId::One => self.relay1,
            RelayId::Two => self.relay2,
        }
    }

    fn relay_mut(&mut self, relay: RelayId) -> &mut RelayState {
        match relay {
            RelayId::One => &mut self.relay1,
            RelayId::Two => &mut self.relay2,
        }
    }

    fn latch(&mut self, relay: RelayId) -> &mut bool {
        match relay {
            RelayId::One => &mut self.mismatch_logged[0],
            RelayId::Two => &mut self.mismatch_logged[1],
        }
    }

    /// Apply one update; returns error-log entries it produced.
    fn apply(&mut self, update: &StateUpdate) -> Vec<ErrorLogEntry> {
        let mut produced = Vec::new();
        match update {
            StateUpdate::Snapshot(status) => {
                self.relay1 = RelayState {
                    commanded: status.relay1,
                    feedback: status.feedback1,
                };
                self.relay2 = RelayState {
                    commanded: status.relay2,
                    feedback: status.feedback2,
                };
                self.error = status.error;
                self.rssi = status.rssi;
                if status.wifi_ssid.is_some() {
                    self.wifi_ssid.clone_from(&status.wifi_ssid);
                }
                if status.ip.is_some() {
                    self.device_ip.clone_from(&status.ip);
                }
            }
            StateUpdate::Frame(frame) => {
                self.apply_frame_relay(RelayId::One, frame.relay1, frame.feedback1);
                self.apply_frame_relay(RelayId::Two, frame.relay2, frame.feedback2);
                if let Some(error) = frame.error {
                    self.error = error;
                }
            }
            StateUpdate::Feedback { relay, on } => {
                *self.relay_mut(*relay) = RelayState {
                    commanded: *on,
                    feedback: *on,
                };
            }
            StateUpdate::DeviceInfo { ip } => {
                self.device_ip = Some(ip.clone());
            }
            StateUpdate::DeviceError(payload) => {
                self.error = true;
                let timestamp = payload
                    .timestamp
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    .unwrap_or_else(Utc::now);
                let message = if payload.message.is_empty() {
                    format!("Device reported error {}", payload.error_code)
                } else {
                    payload.message.clone()
                };
                warn!(code = payload.error_code, message = %message, "Device error");
                produced.push(self.error_log.push_at(
                    ErrorCode::Device(payload.error_code),
                    message,
                    timestamp,
                ));
            }
        }
        self.last_update = Some(Utc::now());
        produced.extend(self.reconcile());
        produced
    }

    /// WebSocket semantics: `relayN` without `feedbackN` implies feedback
    /// equal to the output; a lone `feedbackN` updates feedback only.
    fn apply_frame_relay(&mut self, relay: RelayId, output: Option<bool>, feedback: Option<bool>) {
        let state = self.relay_mut(relay);
        match (output, feedback) {
            (Some(out), fb) => {
                state.commanded = out;
                state.feedback = fb.unwrap_or(out);
            }
            (None, Some(fb)) => state.feedback = fb,
            (None, None) => {}
        }
    }

    /// Log one entry per relay on the transition into mismatch; re-arm
    /// once the relay matches again.
    fn reconcile(&mut self) -> Vec<ErrorLogEntry> {
        let mut produced = Vec::new();
        for relay in RelayId::ALL {
            let state = self.relay(relay);
            let mismatch = state.is_mismatch();
            let latched = *self.latch(relay);
            if mismatch && !latched {
                *self.latch(relay) = true;
                debug!(relay = relay.index(), "Feedback mismatch detected");
                produced.push(
                    self.error_log
                        .push(ErrorCode::FeedbackMismatch(relay), mismatch_message(relay, state)),
                );
            } else if !mismatch && latched {
                *self.latch(relay) = false;
            }
        }
        produced
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new(crate::error_log::DEFAULT_CAPACITY)
    }
}

fn on_off(v: bool) -> &'static str {
    if v { "ON" } else { "OFF" }
}

fn mismatch_message(relay: RelayId, state: RelayState) -> String {
    format!(
        "Relay {relay} feedback mismatch: commanded {}, feedback {}",
        on_off(state.commanded),
        on_off(state.feedback)
    )
}

// ── StateStore ───────────────────────────────────────────────────────

/// Owner of the [`DeviceState`] watch channel.
pub struct StateStore {
    tx: watch::Sender<DeviceState>,
}

impl StateStore {
    pub fn new(log_capacity: usize) -> Self {
        let (tx, _) = watch::channel(DeviceState::new(log_capacity));
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> DeviceState {
        self.tx.borrow().clone()
    }

    /// Fold an inbound update into the state.
    pub fn apply(&self, update: &StateUpdate) -> Vec<ErrorLogEntry> {
        let mut produced = Vec::new();
        self.tx.send_modify(|state| produced = state.apply(update));
        produced
    }

    /// Record a successfully dispatched command.
    pub fn set_commanded(&self, relay: RelayId, on: bool) -> Vec<ErrorLogEntry> {
        let mut produced = Vec::new();
        self.tx.send_modify(|state| {
            state.relay_mut(relay).commanded = on;
            produced = state.reconcile();
        });
        produced
    }

    /// Log every mismatching relay in `report`, regardless of the latch.
    pub fn record_diagnostic(&self, report: &DiagnosticReport) -> Vec<ErrorLogEntry> {
        let mut produced = Vec::new();
        self.tx.send_modify(|state| {
            for relay in report.mismatches() {
                let diag = report.relay(relay);
                let message = format!(
                    "Diagnostic: relay {relay} output {} but feedback {}",
                    on_off(diag.output),
                    on_off(diag.feedback)
                );
                produced.push(
                    state
                        .error_log
                        .push(ErrorCode::FeedbackMismatch(relay), message),
                );
            }
        });
        produced
    }

    /// Forget everything learned from the previous device.
    pub fn reset(&self) {
        self.tx.send_modify(|state| {
            let capacity = state.error_log.capacity();
            *state = DeviceState::new(capacity);
        });
    }
}
