// MQTT broker transport.
//
// The broker is independent of the device address: `connect` opens a
// broker session whatever address was resolved.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relayctl_api::models::{ErrorPayload, FeedbackPayload, StatusPayload};
use relayctl_api::{MqttHandle, MqttMessage, Topic, Topics};

use super::{BridgeSlot, Transport, UPDATE_CHANNEL_CAPACITY};
use crate::config::MqttConfig;
use crate::error::CoreError;
use crate::model::{DeviceAddress, LinkStatus, RelayId, TransportKind};
use crate::store::StateUpdate;

pub struct MqttTransport {
    config: MqttConfig,
    handle: ArcSwapOption<MqttHandle>,
    link_tx: Arc<watch::Sender<LinkStatus>>,
    update_tx: broadcast::Sender<StateUpdate>,
    bridge: BridgeSlot,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        let (link_tx, _) = watch::channel(LinkStatus::Disconnected);
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            config,
            handle: ArcSwapOption::empty(),
            link_tx: Arc::new(link_tx),
            update_tx,
            bridge: BridgeSlot::default(),
        }
    }
}

/// Turn a raw publish into a state update; malformed payloads are dropped.
pub(crate) fn decode(topics: &Topics, msg: &MqttMessage) -> Option<StateUpdate> {
    let parsed = match topics.classify(&msg.topic)? {
        Topic::Feedback(n) => {
            let relay = RelayId::try_from(n).ok()?;
            serde_json::from_slice::<FeedbackPayload>(&msg.payload).map(|p| {
                Some(StateUpdate::Feedback {
                    relay,
                    on: p.is_on(),
                })
            })
        }
        Topic::Status => serde_json::from_slice::<StatusPayload>(&msg.payload).map(|p| {
            p.ip.filter(|ip| !ip.is_empty())
                .map(|ip| StateUpdate::DeviceInfo { ip })
        }),
        Topic::Error => serde_json::from_slice::<ErrorPayload>(&msg.payload)
            .map(|p| Some(StateUpdate::DeviceError(p))),
        Topic::Relay(_) => return None,
    };

    match parsed {
        Ok(update) => update,
        Err(e) => {
            debug!(topic = %msg.topic, error = %e, "dropping malformed MQTT payload");
            None
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mqtt
    }

    fn link(&self) -> watch::Receiver<LinkStatus> {
        self.link_tx.subscribe()
    }

    fn is_ready(&self) -> bool {
        self.handle.load().as_ref().is_some_and(|h| h.is_connected())
    }

    async fn connect(&self, _address: &DeviceAddress, cancel: &CancellationToken) -> Result<(), CoreError> {
        self.bridge.stop().await;
        let session = cancel.child_token();
        let handle = MqttHandle::connect(&self.config.settings, session.clone())?;
        self.link_tx.send_replace(LinkStatus::Connecting);

        let topics = handle.topics().clone();
        let mut messages = handle.subscribe();
        let mut connected = handle.connected();
        let update_tx = self.update_tx.clone();
        let link_tx = Arc::clone(&self.link_tx);
        let bridge_session = session.clone();
        let bridge = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = session.cancelled() => break,
                    changed = connected.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let up = *connected.borrow_and_update();
                        link_tx.send_replace(if up { LinkStatus::Connected } else { LinkStatus::Disconnected });
                    }
                    msg = messages.recv() => match msg {
                        Ok(msg) => {
                            if let Some(update) = decode(&topics, &msg) {
                                let _ = update_tx.send(update);
                            }
                        }
                        Err(RecvError::Lagged(n)) => warn!(skipped = n, "MQTT bridge lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            link_tx.send_replace(LinkStatus::Disconnected);
            debug!("MQTT bridge exiting");
        });

        self.bridge.set(bridge_session, bridge).await;

        if let Some(previous) = self.handle.swap(Some(Arc::new(handle))) {
            previous.shutdown();
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.bridge.stop().await;
        if let Some(handle) = self.handle.swap(None) {
            handle.shutdown();
        }
        self.link_tx.send_replace(LinkStatus::Disconnected);
    }

    async fn send_control(&self, relay: RelayId, on: bool) -> Result<bool, CoreError> {
        let guard = self.handle.load();
        let handle = guard.as_ref().ok_or(CoreError::TransportNotReady {
            transport: TransportKind::Mqtt,
        })?;
        handle.publish_relay(relay.index(), on)?;
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.update_tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn msg(topic: &str, payload: &str) -> MqttMessage {
        MqttMessage {
            topic: topic.into(),
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[test]
    fn decodes_feedback_variants() {
        let topics = Topics::new("home/esp32");
        assert_eq!(
            decode(&topics, &msg("home/esp32/feedback2", r#"{"state":"ON"}"#)),
            Some(StateUpdate::Feedback {
                relay: RelayId::Two,
                on: true
            })
        );
        assert_eq!(
            decode(&topics, &msg("home/esp32/feedback1", r#"{"state":0}"#)),
            Some(StateUpdate::Feedback {
                relay: RelayId::One,
                on: false
            })
        );
    }

    #[test]
    fn decodes_status_and_error() {
        let topics = Topics::new("home/esp32");
        assert_eq!(
            decode(&topics, &msg("home/esp32/status", r#"{"ip":"192.168.1.77"}"#)),
            Some(StateUpdate::DeviceInfo {
                ip: "192.168.1.77".into()
            })
        );
        assert!(matches!(
            decode(&topics, &msg("home/esp32/error", r#"{"errorCode":3,"message":"x"}"#)),
            Some(StateUpdate::DeviceError(ErrorPayload { error_code: 3, .. }))
        ));
    }

    #[tokio::test]
    async fn reconnect_keeps_new_session_link() {
        // Accepts into the backlog and never answers, so no session ever
        // leaves Connecting on its own.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = MqttConfig {
            enabled: true,
            settings: relayctl_api::MqttSettings {
                broker: format!("mqtt://{}", listener.local_addr().unwrap()),
                ..relayctl_api::MqttSettings::default()
            },
        };
        let transport = MqttTransport::new(config);
        let address: DeviceAddress = "127.0.0.1".parse().unwrap();
        let cancel = CancellationToken::new();
        let link = transport.link();

        transport.connect(&address, &cancel).await.unwrap();
        transport.connect(&address, &cancel).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(*link.borrow(), LinkStatus::Connecting);

        transport.disconnect().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(*link.borrow(), LinkStatus::Disconnected);
        assert!(!transport.is_ready());
    }

    #[test]
    fn drops_malformed_and_foreign() {
        let topics = Topics::new("home/esp32");
        assert_eq!(decode(&topics, &msg("home/esp32/feedback1", "ON")), None);
        assert_eq!(decode(&topics, &msg("home/esp32/relay1", "ON")), None);
        assert_eq!(decode(&topics, &msg("elsewhere/feedback1", r#"{"state":true}"#)), None);
        assert_eq!(decode(&topics, &msg("home/esp32/status", "{}")), None);
    }
}
