// ── Transport abstraction ──
//
// One capability set over three channels. The controller walks transports
// in `TransportKind` order and uses the first one that is ready.

mod http;
mod mqtt;
mod websocket;

pub use http::HttpTransport;
pub use mqtt::MqttTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::CoreError;
use crate::model::{DeviceAddress, LinkStatus, RelayId, TransportKind};
use crate::store::StateUpdate;

pub(crate) const UPDATE_CHANNEL_CAPACITY: usize = 64;

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Watch this transport's link status.
    fn link(&self) -> watch::Receiver<LinkStatus>;

    /// Whether a command sent now would be carried.
    fn is_ready(&self) -> bool;

    /// Start talking to `address`. Background work stops when `cancel` fires.
    async fn connect(&self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<(), CoreError>;

    async fn disconnect(&self);

    /// Send one relay command. `Ok(false)` means the device refused it.
    ///
    /// Returns [`CoreError::TransportNotReady`] when the channel is down.
    async fn send_control(&self, relay: RelayId, on: bool) -> Result<bool, CoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StateUpdate>;
}

// ── Bridge tasks ──

/// The task forwarding one push session's events into a transport.
///
/// A transport holds at most one. The previous bridge is stopped and
/// awaited before the next session starts, so its final link write cannot
/// land on top of the new session's.
#[derive(Default)]
pub(crate) struct BridgeSlot {
    current: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl BridgeSlot {
    /// Cancel the running bridge, if any, and wait for it to exit.
    pub(crate) async fn stop(&self) {
        let running = self.current.lock().await.take();
        if let Some((session, task)) = running {
            session.cancel();
            if let Err(e) = task.await {
                warn!(error = %e, "bridge task failed");
            }
        }
    }

    /// Track a freshly spawned bridge. Call [`BridgeSlot::stop`] first.
    pub(crate) async fn set(&self, session: CancellationToken, task: JoinHandle<()>) {
        let previous = self.current.lock().await.replace((session, task));
        if let Some((session, task)) = previous {
            session.cancel();
            task.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn stopped_bridge_exits_before_next_session() {
        let (link_tx, link_rx) = watch::channel(LinkStatus::Connected);
        let link_tx = Arc::new(link_tx);
        let slot = BridgeSlot::default();

        let session = CancellationToken::new();
        let task = tokio::spawn({
            let session = session.clone();
            let link_tx = Arc::clone(&link_tx);
            async move {
                session.cancelled().await;
                tokio::task::yield_now().await;
                link_tx.send_replace(LinkStatus::Disconnected);
            }
        });
        slot.set(session.clone(), task).await;

        slot.stop().await;
        assert!(session.is_cancelled());
        assert_eq!(*link_rx.borrow(), LinkStatus::Disconnected);

        // Next session's state stays put.
        link_tx.send_replace(LinkStatus::Connecting);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*link_rx.borrow(), LinkStatus::Connecting);
    }

    #[tokio::test]
    async fn stop_without_bridge_is_a_no_op() {
        BridgeSlot::default().stop().await;
    }
}
