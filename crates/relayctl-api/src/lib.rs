// relayctl-api: async wire clients for two-relay ESP32 boards
//
// HTTP (REST and legacy surfaces), WebSocket push stream, and MQTT broker
// session. Domain logic lives in relayctl-core.

pub mod device;
pub mod error;
pub mod models;
pub mod mqtt;
pub mod transport;
pub mod websocket;

pub use device::{ApiSurface, DeviceClient};
pub use error::Error;
pub use mqtt::{MqttHandle, MqttMessage, MqttSettings, Topic, Topics};
pub use transport::{RetryPolicy, TransportConfig};
pub use websocket::{ReconnectConfig, SocketState, WebSocketHandle};
