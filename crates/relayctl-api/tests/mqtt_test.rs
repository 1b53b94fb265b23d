#![allow(clippy::unwrap_used)]
// MQTT session against an in-process broker speaking MQTT 3.1.1.

use std::time::Duration;

use bytes::BytesMut;
use rumqttc::mqttbytes::v4::{self, ConnAck, ConnectReturnCode, Packet, Publish, SubAck, SubscribeReasonCode};
use rumqttc::mqttbytes::{self, QoS};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use relayctl_api::{MqttHandle, MqttSettings};

const WAIT: Duration = Duration::from_secs(5);
const MAX_PACKET: usize = 64 * 1024;

// ── Broker side ──────────────────────────────────────────────────────

struct Session {
    stream: TcpStream,
    buf: BytesMut,
}

impl Session {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let mut session = Self {
            stream,
            buf: BytesMut::new(),
        };
        match session.read().await {
            Packet::Connect(_) => {}
            other => panic!("expected CONNECT, got {other:?}"),
        }
        let mut out = BytesMut::new();
        ConnAck::new(ConnectReturnCode::Success, false)
            .write(&mut out)
            .unwrap();
        session.write(&out).await;
        session
    }

    async fn read(&mut self) -> Packet {
        loop {
            match v4::read(&mut self.buf, MAX_PACKET) {
                Ok(packet) => return packet,
                Err(mqttbytes::Error::InsufficientBytes(_)) => {
                    let n = timeout(WAIT, self.stream.read_buf(&mut self.buf))
                        .await
                        .unwrap()
                        .unwrap();
                    assert!(n > 0, "client closed the connection");
                }
                Err(e) => panic!("bad packet from client: {e}"),
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Read until `want` topic filters have been requested, acking each SUBSCRIBE.
    async fn subscriptions(&mut self, want: usize) -> Vec<String> {
        let mut topics = Vec::new();
        while topics.len() < want {
            match self.read().await {
                Packet::Subscribe(sub) => {
                    let codes = sub
                        .filters
                        .iter()
                        .map(|f| SubscribeReasonCode::Success(f.qos))
                        .collect();
                    topics.extend(sub.filters.into_iter().map(|f| f.path));
                    let mut out = BytesMut::new();
                    SubAck::new(sub.pkid, codes).write(&mut out).unwrap();
                    self.write(&out).await;
                }
                Packet::PingReq => {}
                other => panic!("expected SUBSCRIBE, got {other:?}"),
            }
        }
        topics
    }

    async fn publish(&mut self, topic: &str, payload: &str) {
        let mut out = BytesMut::new();
        Publish::new(topic, QoS::AtMostOnce, payload)
            .write(&mut out)
            .unwrap();
        self.write(&out).await;
    }

    async fn next_publish(&mut self) -> Publish {
        loop {
            match self.read().await {
                Packet::Publish(p) => return p,
                Packet::PingReq => {}
                other => panic!("expected PUBLISH, got {other:?}"),
            }
        }
    }
}

async fn broker() -> (TcpListener, MqttSettings) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let settings = MqttSettings {
        broker: format!("mqtt://127.0.0.1:{port}"),
        client_id: "relayctl-test".into(),
        topic_prefix: "home/esp32".into(),
        keep_alive: Duration::from_secs(30),
        reconnect_delay: Duration::from_millis(200),
    };
    (listener, settings)
}

fn sorted(mut topics: Vec<String>) -> Vec<String> {
    topics.sort();
    topics
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn connack_subscribes_and_marks_connected() {
    let (listener, settings) = broker().await;
    let handle = MqttHandle::connect(&settings, CancellationToken::new()).unwrap();
    let mut connected = handle.connected();
    assert!(!handle.is_connected());

    let mut session = Session::accept(&listener).await;
    let expected = sorted(handle.topics().subscriptions().to_vec());
    assert_eq!(sorted(session.subscriptions(4).await), expected);

    timeout(WAIT, connected.wait_for(|c| *c)).await.unwrap().unwrap();
    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_flow_both_ways() {
    let (listener, settings) = broker().await;
    let handle = MqttHandle::connect(&settings, CancellationToken::new()).unwrap();
    let mut connected = handle.connected();
    let mut inbound = handle.subscribe();

    let mut session = Session::accept(&listener).await;
    session.subscriptions(4).await;
    timeout(WAIT, connected.wait_for(|c| *c)).await.unwrap().unwrap();

    session
        .publish("home/esp32/feedback1", r#"{"state":"ON"}"#)
        .await;
    let msg = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(msg.topic, "home/esp32/feedback1");
    assert_eq!(msg.payload, br#"{"state":"ON"}"#.to_vec());

    handle.publish_relay(1, true).unwrap();
    let cmd = session.next_publish().await;
    assert_eq!(cmd.topic, "home/esp32/relay1");
    assert_eq!(&cmd.payload[..], b"ON");

    handle.publish_relay(2, false).unwrap();
    let cmd = session.next_publish().await;
    assert_eq!(cmd.topic, "home/esp32/relay2");
    assert_eq!(&cmd.payload[..], b"OFF");

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_broker_connection_resubscribes_on_reconnect() {
    let (listener, settings) = broker().await;
    let handle = MqttHandle::connect(&settings, CancellationToken::new()).unwrap();
    let mut connected = handle.connected();

    let mut session = Session::accept(&listener).await;
    session.subscriptions(4).await;
    timeout(WAIT, connected.wait_for(|c| *c)).await.unwrap().unwrap();

    drop(session);
    timeout(WAIT, connected.wait_for(|c| !*c)).await.unwrap().unwrap();
    assert!(handle.publish_relay(1, true).is_err());

    let mut session = Session::accept(&listener).await;
    let expected = sorted(handle.topics().subscriptions().to_vec());
    assert_eq!(sorted(session.subscriptions(4).await), expected);
    timeout(WAIT, connected.wait_for(|c| *c)).await.unwrap().unwrap();

    let mut inbound = handle.subscribe();
    session.publish("home/esp32/error", r#"{"error_code":2}"#).await;
    let msg = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(msg.topic, "home/esp32/error");

    handle.shutdown();
}
