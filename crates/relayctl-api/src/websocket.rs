//! WebSocket status stream with fixed-delay reconnect.
//!
//! Connects to the board's push socket (`ws://<host>:81`), broadcasts every
//! parsed [`StatusFrame`] and accepts outbound [`ControlFrame`]s while the
//! socket is open. A dropped or refused connection is retried after a fixed
//! delay until the handle is shut down.
//!
//! # Example
//!
//! ```rust,ignore
//! use relayctl_api::websocket::{ReconnectConfig, WebSocketHandle};
//! use tokio_util::sync::CancellationToken;
//!
//! let url = url::Url::parse("ws://192.168.1.100:81/")?;
//! let handle = WebSocketHandle::connect(url, ReconnectConfig::default(), CancellationToken::new());
//! let mut rx = handle.subscribe();
//!
//! while let Ok(frame) = rx.recv().await {
//!     println!("{frame:?}");
//! }
//! ```

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::models::{ControlFrame, StatusFrame};

const FRAME_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 16;

// ── SocketState ──────────────────────────────────────────────────────

/// Link state of the underlying socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SocketState {
    #[default]
    Closed,
    Connecting,
    Open,
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Fixed-delay reconnection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Wait between a close/error and the next attempt. Default: 3s.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
        }
    }
}

// ── WebSocketHandle ──────────────────────────────────────────────────

/// Handle to a running WebSocket connection loop.
pub struct WebSocketHandle {
    frame_rx: broadcast::Receiver<StatusFrame>,
    state_rx: watch::Receiver<SocketState>,
    out_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl WebSocketHandle {
    /// Spawn the connection loop. The first attempt happens in the background.
    pub fn connect(ws_url: Url, reconnect: ReconnectConfig, cancel: CancellationToken) -> Self {
        let (frame_tx, frame_rx) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SocketState::Closed);
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(ws_url, frame_tx, state_tx, out_rx, reconnect, task_cancel).await;
        });

        Self {
            frame_rx,
            state_rx,
            out_tx,
            cancel,
        }
    }

    /// New receiver for inbound status frames.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusFrame> {
        self.frame_rx.resubscribe()
    }

    /// Watch the socket's link state.
    pub fn state(&self) -> watch::Receiver<SocketState> {
        self.state_rx.clone()
    }

    pub fn is_open(&self) -> bool {
        *self.state_rx.borrow() == SocketState::Open
    }

    /// Queue a command frame. Fails fast unless the socket is open.
    pub fn send(&self, frame: &ControlFrame) -> Result<(), Error> {
        if !self.is_open() {
            return Err(Error::WebSocketNotOpen);
        }
        let text = serde_json::to_string(frame).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: String::new(),
        })?;
        self.out_tx
            .try_send(text)
            .map_err(|_| Error::WebSocketNotOpen)
    }

    /// Stop the connection loop and close the socket.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

async fn ws_loop(
    ws_url: Url,
    frame_tx: broadcast::Sender<StatusFrame>,
    state_tx: watch::Sender<SocketState>,
    mut out_rx: mpsc::Receiver<String>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    loop {
        state_tx.send_replace(SocketState::Connecting);

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = connect_and_read(&ws_url, &frame_tx, &state_tx, &mut out_rx, &cancel) => r,
        };

        state_tx.send_replace(SocketState::Closed);
        match result {
            Ok(()) => tracing::info!(url = %ws_url, "WebSocket closed"),
            Err(e) => tracing::warn!(url = %ws_url, error = %e, "WebSocket error"),
        }

        tracing::debug!(
            delay_ms = u64::try_from(reconnect.delay.as_millis()).unwrap_or(u64::MAX),
            "Waiting before WebSocket reconnect"
        );
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(reconnect.delay) => {}
        }
    }

    state_tx.send_replace(SocketState::Closed);
    tracing::debug!("WebSocket loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_read(
    url: &Url,
    frame_tx: &broadcast::Sender<StatusFrame>,
    state_tx: &watch::Sender<SocketState>,
    out_rx: &mut mpsc::Receiver<String>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %url, "Connecting to WebSocket");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    // Commands queued while the previous socket was dying are stale.
    while out_rx.try_recv().is_ok() {}

    state_tx.send_replace(SocketState::Open);
    tracing::info!("WebSocket connected");

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            Some(text) = out_rx.recv() => {
                tracing::debug!(frame = %text, "WebSocket send");
                write
                    .send(Message::Text(text.into()))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => parse_and_broadcast(&text, frame_tx),
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

/// Parse one text frame; malformed frames are logged and dropped.
fn parse_and_broadcast(text: &str, frame_tx: &broadcast::Sender<StatusFrame>) {
    match serde_json::from_str::<StatusFrame>(text) {
        Ok(frame) => {
            let _ = frame_tx.send(frame);
        }
        Err(e) => tracing::debug!(error = %e, "Dropping malformed WebSocket frame"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_delay() {
        assert_eq!(ReconnectConfig::default().delay, Duration::from_secs(3));
    }

    #[test]
    fn partial_frame_is_broadcast() {
        let (tx, mut rx) = broadcast::channel(4);
        parse_and_broadcast(r#"{"relay1": true}"#, &tx);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.relay1, Some(true));
        assert_eq!(frame.feedback1, None);
    }

    #[test]
    fn malformed_frame_is_dropped() {
        let (tx, mut rx) = broadcast::channel(4);
        parse_and_broadcast("not json", &tx);
        parse_and_broadcast(r#"{"relay1": "yes"}"#, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_fails_fast_when_not_open() {
        let cancel = CancellationToken::new();
        // Nothing listens on port 9 of the loopback; the loop never opens.
        let url = Url::parse("ws://127.0.0.1:9/").unwrap();
        let handle = WebSocketHandle::connect(url, ReconnectConfig::default(), cancel.clone());
        let err = handle.send(&ControlFrame::now(1, true)).unwrap_err();
        assert!(matches!(err, Error::WebSocketNotOpen));
        handle.shutdown();
    }
}
