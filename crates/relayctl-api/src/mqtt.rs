//! MQTT broker session for the relay board's topic tree.
//!
//! One [`rumqttc::AsyncClient`] plus a spawned event loop. Every ConnAck
//! (re)subscribes to the feedback, status, and error topics under the
//! configured prefix; inbound publishes are broadcast raw and decoded by the
//! caller. Connection errors are retried after a fixed delay until the
//! handle is shut down.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

const MESSAGE_CHANNEL_CAPACITY: usize = 256;
const REQUEST_CHANNEL_CAPACITY: usize = 20;

// ── Settings ─────────────────────────────────────────────────────────

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    /// `wss://`, `ws://`, `mqtts://` or `mqtt://` URL.
    pub broker: String,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive: Duration,
    /// Wait after a connection error before the next attempt. Default: 5s.
    pub reconnect_delay: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: "wss://test.mosquitto.org:8081".into(),
            client_id: "relayctl".into(),
            topic_prefix: "home/esp32".into(),
            keep_alive: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl MqttSettings {
    /// Translate the broker URL into rumqttc options.
    pub fn options(&self) -> Result<MqttOptions, Error> {
        let url = Url::parse(&self.broker)?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::Mqtt(format!("broker URL has no host: {}", self.broker)))?;

        let mut opts = match url.scheme() {
            "ws" | "wss" => {
                let port = url.port_or_known_default().unwrap_or(80);
                let path = if url.path() == "/" { "/mqtt" } else { url.path() };
                let addr = format!("{}://{host}:{port}{path}", url.scheme());
                let mut opts = MqttOptions::new(&self.client_id, addr, port);
                if url.scheme() == "wss" {
                    opts.set_transport(Transport::wss_with_default_config());
                } else {
                    opts.set_transport(Transport::Ws);
                }
                opts
            }
            "mqtts" | "ssl" => {
                let mut opts = MqttOptions::new(&self.client_id, host, url.port().unwrap_or(8883));
                opts.set_transport(Transport::tls_with_default_config());
                opts
            }
            "mqtt" | "tcp" => MqttOptions::new(&self.client_id, host, url.port().unwrap_or(1883)),
            other => return Err(Error::Mqtt(format!("unsupported broker scheme: {other}"))),
        };

        opts.set_keep_alive(self.keep_alive);
        opts.set_clean_session(true);
        Ok(opts)
    }
}

// ── Topics ───────────────────────────────────────────────────────────

/// A topic under the board's prefix, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    Relay(u8),
    Feedback(u8),
    Status,
    Error,
}

/// Topic naming for one prefix, e.g. `home/esp32/feedback1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_owned(),
        }
    }

    pub fn name(&self, topic: Topic) -> String {
        match topic {
            Topic::Relay(n) => format!("{}/relay{n}", self.prefix),
            Topic::Feedback(n) => format!("{}/feedback{n}", self.prefix),
            Topic::Status => format!("{}/status", self.prefix),
            Topic::Error => format!("{}/error", self.prefix),
        }
    }

    /// Topics subscribed on every ConnAck.
    pub fn subscriptions(&self) -> [String; 4] {
        [
            self.name(Topic::Feedback(1)),
            self.name(Topic::Feedback(2)),
            self.name(Topic::Status),
            self.name(Topic::Error),
        ]
    }

    /// Classify an inbound topic; `None` for anything outside the prefix.
    pub fn classify(&self, topic: &str) -> Option<Topic> {
        let leaf = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        match leaf {
            "relay1" => Some(Topic::Relay(1)),
            "relay2" => Some(Topic::Relay(2)),
            "feedback1" => Some(Topic::Feedback(1)),
            "feedback2" => Some(Topic::Feedback(2)),
            "status" => Some(Topic::Status),
            "error" => Some(Topic::Error),
            _ => None,
        }
    }
}

// ── MqttHandle ───────────────────────────────────────────────────────

/// A raw inbound publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Handle to a running broker session.
pub struct MqttHandle {
    client: AsyncClient,
    topics: Topics,
    msg_rx: broadcast::Receiver<MqttMessage>,
    connected_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl MqttHandle {
    /// Build the client and spawn its event loop.
    pub fn connect(settings: &MqttSettings, cancel: CancellationToken) -> Result<Self, Error> {
        let opts = settings.options()?;
        let (client, eventloop) = AsyncClient::new(opts, REQUEST_CHANNEL_CAPACITY);
        let topics = Topics::new(settings.topic_prefix.clone());
        let (msg_tx, msg_rx) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);

        tracing::info!(broker = %settings.broker, "Connecting to MQTT broker");

        let task = MqttLoop {
            client: client.clone(),
            topics: topics.clone(),
            msg_tx,
            connected_tx,
            reconnect_delay: settings.reconnect_delay,
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run(eventloop));

        Ok(Self {
            client,
            topics,
            msg_rx,
            connected_rx,
            cancel,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MqttMessage> {
        self.msg_rx.resubscribe()
    }

    /// Watch broker connectivity.
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Publish `"ON"`/`"OFF"` to `<prefix>/relay<n>`.
    pub fn publish_relay(&self, relay: u8, on: bool) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::MqttNotConnected);
        }
        let topic = self.topics.name(Topic::Relay(relay));
        let payload = if on { "ON" } else { "OFF" };
        tracing::debug!(topic = %topic, payload, "MQTT publish");
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| Error::Mqtt(e.to_string()))
    }

    pub fn shutdown(&self) {
        let _ = self.client.try_disconnect();
        self.cancel.cancel();
    }
}

// ── Event loop ───────────────────────────────────────────────────────

struct MqttLoop {
    client: AsyncClient,
    topics: Topics,
    msg_tx: broadcast::Sender<MqttMessage>,
    connected_tx: watch::Sender<bool>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
}

impl MqttLoop {
    async fn run(self, mut eventloop: EventLoop) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("MQTT connected");
                        for topic in self.topics.subscriptions() {
                            if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                                tracing::warn!(topic = %topic, error = %e, "MQTT subscribe failed");
                            }
                        }
                        self.connected_tx.send_replace(true);
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        tracing::debug!(topic = %p.topic, bytes = p.payload.len(), "MQTT message");
                        let _ = self.msg_tx.send(MqttMessage {
                            topic: p.topic.clone(),
                            payload: p.payload.to_vec(),
                        });
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        tracing::warn!("MQTT broker sent disconnect");
                        self.connected_tx.send_replace(false);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.connected_tx.send_replace(false);
                        tracing::warn!(error = %e, "MQTT connection error");
                        tokio::select! {
                            biased;
                            () = self.cancel.cancelled() => break,
                            () = tokio::time::sleep(self.reconnect_delay) => {}
                        }
                    }
                }
            }
        }

        self.connected_tx.send_replace(false);
        tracing::debug!("MQTT loop exiting");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_and_classification() {
        let topics = Topics::new("home/esp32/");
        assert_eq!(topics.name(Topic::Relay(2)), "home/esp32/relay2");
        assert_eq!(topics.classify("home/esp32/feedback1"), Some(Topic::Feedback(1)));
        assert_eq!(topics.classify("home/esp32/error"), Some(Topic::Error));
        assert_eq!(topics.classify("home/esp32x/status"), None);
        assert_eq!(topics.classify("other/feedback1"), None);
        assert_eq!(
            topics.subscriptions(),
            [
                "home/esp32/feedback1".to_owned(),
                "home/esp32/feedback2".to_owned(),
                "home/esp32/status".to_owned(),
                "home/esp32/error".to_owned(),
            ]
        );
    }

    #[test]
    fn broker_schemes() {
        let ok = |broker: &str| {
            MqttSettings {
                broker: broker.into(),
                ..MqttSettings::default()
            }
            .options()
        };
        let wss = ok("wss://test.mosquitto.org:8081").unwrap();
        assert_eq!(wss.broker_address().1, 8081);
        assert_eq!(ok("mqtt://broker.local").unwrap().broker_address().1, 1883);
        assert_eq!(ok("mqtts://broker.local").unwrap().broker_address().1, 8883);
        assert!(ok("http://broker.local").is_err());
    }
}
