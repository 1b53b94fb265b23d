// WebSocket push transport: `ws://<host>:<port>/`.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relayctl_api::models::ControlFrame;
use relayctl_api::{SocketState, WebSocketHandle};

use super::{BridgeSlot, Transport, UPDATE_CHANNEL_CAPACITY};
use crate::config::WebSocketConfig;
use crate::error::CoreError;
use crate::model::{DeviceAddress, LinkStatus, RelayId, TransportKind};
use crate::store::StateUpdate;

pub struct WebSocketTransport {
    config: WebSocketConfig,
    handle: ArcSwapOption<WebSocketHandle>,
    link_tx: Arc<watch::Sender<LinkStatus>>,
    update_tx: broadcast::Sender<StateUpdate>,
    bridge: BridgeSlot,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketConfig) -> Self {
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

fn link_from_socket(state: SocketState) -> LinkStatus {
    match state {
        SocketState::Closed => LinkStatus::Disconnected,
        SocketState::Connecting => LinkStatus::Connecting,
        SocketState::Open => LinkStatus::Connected,
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn link(&self) -> watch::Receiver<LinkStatus> {
        self.link_tx.subscribe()
    }

    fn is_ready(&self) -> bool {
        self.handle.load().as_ref().is_some_and(|h| h.is_open())
    }

    async fn connect(&self, address: &DeviceAddress, cancel: &CancellationToken) -> Result<(), CoreError> {
        let url = address.ws_url(self.config.port)?;
        self.bridge.stop().await;
        let session = cancel.child_token();
        let handle = WebSocketHandle::connect(url, self.config.reconnect, session.clone());

        // Bridge: socket frames -> state updates, socket state -> link status.
        let mut frames = handle.subscribe();
        let mut socket_state = handle.state();
        let update_tx = self.update_tx.clone();
        let link_tx = Arc::clone(&self.link_tx);
        let bridge_session = session.clone();
        let bridge = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = session.cancelled() => break,
                    changed = socket_state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = *socket_state.borrow_and_update();
                        link_tx.send_replace(link_from_socket(state));
                    }
                    frame = frames.recv() => match frame {
                        Ok(frame) => {
                            let _ = update_tx.send(StateUpdate::Frame(frame));
                        }
                        Err(RecvError::Lagged(n)) => warn!(skipped = n, "WebSocket bridge lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            link_tx.send_replace(LinkStatus::Disconnected);
            debug!("WebSocket bridge exiting");
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
            transport: TransportKind::WebSocket,
        })?;
        handle.send(&ControlFrame::now(relay.index(), on))?;
        debug!(relay = relay.index(), on, "command sent over WebSocket");
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

    #[test]
    fn socket_state_mapping() {
        assert_eq!(link_from_socket(SocketState::Open), LinkStatus::Connected);
        assert_eq!(link_from_socket(SocketState::Closed), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn not_ready_before_connect() {
        let transport = WebSocketTransport::new(WebSocketConfig::default());
        assert!(!transport.is_ready());
        let err = transport.send_control(RelayId::One, true).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::TransportNotReady {
                transport: TransportKind::WebSocket
            }
        ));
    }
}
