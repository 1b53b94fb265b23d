// ── Controller ──
//
// Lifecycle of one device session: resolve the address, open every
// transport, mirror inbound updates into the state store, and route relay
// commands down the WebSocket > MQTT > HTTP chain.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::select_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::AddressStore;
use crate::config::DeviceConfig;
use crate::discovery::{Discovery, HttpProber, SystemNetwork};
use crate::error::CoreError;
use crate::error_log::{ErrorCode, ErrorLogEntry};
use crate::model::{
    ConnectionState, DeviceAddress, DiagnosticReport, DiagnosticSource, LinkStatus, Notice,
    NoticeLevel, RelayDiagnosis, RelayId, TransportKind,
};
use crate::store::{DeviceState, StateStore, StateUpdate};
use crate::transport::{HttpTransport, MqttTransport, Transport, WebSocketTransport};

const NOTICE_CHANNEL_SIZE: usize = 64;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Background tasks hold
/// clones and stop when the session token is cancelled.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: DeviceConfig,
    store: StateStore,
    discovery: Discovery,
    cache: Arc<dyn AddressStore>,
    http: Arc<HttpTransport>,
    /// Every transport, sorted by dispatch priority.
    transports: Vec<Arc<dyn Transport>>,
    connection_state: watch::Sender<ConnectionState>,
    address: watch::Sender<Option<DeviceAddress>>,
    notice_tx: broadcast::Sender<Notice>,
    /// Token for the current session; replaced on every `connect_to`.
    session: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Build a controller with the transports `config` enables and
    /// network discovery. Does not connect.
    pub fn new(config: DeviceConfig, cache: Arc<dyn AddressStore>) -> Self {
        let prober = HttpProber::new(
            config.surface,
            config.token.clone(),
            config.discovery.identity_marker.clone(),
        );
        let discovery = Discovery::new(
            config.discovery.clone(),
            Arc::new(prober),
            Arc::new(SystemNetwork),
            Arc::clone(&cache),
        );

        let mut push: Vec<Arc<dyn Transport>> = Vec::new();
        if config.websocket.enabled {
            push.push(Arc::new(WebSocketTransport::new(config.websocket.clone())));
        }
        if config.mqtt.enabled {
            push.push(Arc::new(MqttTransport::new(config.mqtt.clone())));
        }

        Self::with_transports(config, cache, discovery, push)
    }

    /// Build a controller around caller-supplied discovery and push
    /// transports. The HTTP transport is always created from `config`.
    pub fn with_transports(
        config: DeviceConfig,
        cache: Arc<dyn AddressStore>,
        discovery: Discovery,
        push: Vec<Arc<dyn Transport>>,
    ) -> Self {
        let http = Arc::new(HttpTransport::new(
            config.surface,
            config.request_timeout,
            config.token.clone(),
            config.retry,
        ));

        let mut transports = push;
        transports.push(Arc::clone(&http) as Arc<dyn Transport>);
        transports.sort_by_key(|t| t.kind());

        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (address, _) = watch::channel(None);
        let (notice_tx, _) = broadcast::channel(NOTICE_CHANNEL_SIZE);

        Self {
            inner: Arc::new(ControllerInner {
                store: StateStore::new(config.error_log_capacity),
                config,
                discovery,
                cache,
                http,
                transports,
                connection_state,
                address,
                notice_tx,
                session: Mutex::new(CancellationToken::new()),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.inner.config
    }

    pub fn discovery(&self) -> &Discovery {
        &self.inner.discovery
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Resolve an address (configured, else discovery) and connect to it.
    pub async fn connect(&self) -> Result<DeviceAddress, CoreError> {
        let address = if let Some(addr) = &self.inner.config.address {
            addr.clone()
        } else {
            self.notify(NoticeLevel::Info, "Scanning network for device");
            let remembered = self.inner.cache.load().map(|c| c.address);
            let Some(addr) = self.inner.discovery.resolve().await else {
                if let Some(dead) = remembered {
                    self.record_failure(&dead);
                }
                self.notify(NoticeLevel::Error, "No device found");
                return Err(CoreError::DeviceNotFound);
            };
            addr
        };

        self.connect_to(address.clone()).await?;
        Ok(address)
    }

    /// Connect to a known address: open every transport, wait until at
    /// least one link is up, then persist the address.
    ///
    /// A failure counts against the remembered address; after
    /// [`FORGET_AFTER_FAILURES`](crate::cache::FORGET_AFTER_FAILURES) in a
    /// row it is cleared.
    pub async fn connect_to(&self, address: DeviceAddress) -> Result<(), CoreError> {
        self.stop_session().await;

        info!(address = %address, "Connecting");
        self.inner.connection_state.send_replace(ConnectionState::Connecting);
        self.inner.address.send_replace(Some(address.clone()));

        let session = CancellationToken::new();
        *self.inner.session.lock().await = session.clone();

        let mut handles = Vec::new();
        for transport in &self.inner.transports {
            handles.push(tokio::spawn(update_forwarder(
                self.clone(),
                transport.subscribe(),
                session.clone(),
            )));
        }
        handles.push(tokio::spawn(link_supervisor(self.clone(), session.clone())));

        for transport in self.inner.transports.iter().filter(|t| t.kind() != TransportKind::Http) {
            if let Err(e) = transport.connect(&address, &session).await {
                warn!(transport = %transport.kind(), error = %e, "transport failed to start");
            }
        }

        let period = self.inner.config.refresh_interval;
        if !period.is_zero() {
            handles.push(tokio::spawn(refresh_task(self.clone(), period, session.clone())));
        }
        self.inner.task_handles.lock().await.extend(handles);

        match self.inner.http.connect(&address, &session).await {
            Ok(()) => self.mark_connected(),
            Err(CoreError::Unauthorized) => {
                self.invalidate_session().await;
                return Err(CoreError::Unauthorized);
            }
            Err(e) => {
                debug!(error = %e, "initial status fetch failed, waiting for a push link");
                if !self.wait_connected(self.inner.config.connect_timeout).await {
                    self.disconnect().await;
                    self.record_failure(&address);
                    self.notify(NoticeLevel::Error, format!("Cannot reach device at {address}"));
                    return Err(CoreError::ConnectionFailed {
                        address: address.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = self.inner.cache.save(&address) {
            warn!(error = %e, "could not persist device address");
        }
        self.notify(NoticeLevel::Success, format!("Connected to {address}"));
        Ok(())
    }

    /// Stop every task and transport and forget the in-memory address.
    /// The persisted address is kept.
    pub async fn disconnect(&self) {
        self.stop_session().await;
        self.inner.address.send_replace(None);
        self.inner.connection_state.send_replace(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// [`disconnect`](Self::disconnect), then clear the persisted address
    /// and all learned state.
    pub async fn forget(&self) -> Result<(), CoreError> {
        self.disconnect().await;
        self.inner.store.reset();
        self.inner.cache.clear()
    }

    async fn stop_session(&self) {
        self.inner.session.lock().await.cancel();
        for transport in &self.inner.transports {
            transport.disconnect().await;
        }
        let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// The device refused our token: drop the session and the cached address.
    async fn invalidate_session(&self) {
        warn!("device rejected the session token");
        if let Err(e) = self.inner.cache.clear() {
            warn!(error = %e, "could not clear cached address");
        }
        self.inner.session.lock().await.cancel();
        for transport in &self.inner.transports {
            transport.disconnect().await;
        }
        self.inner.address.send_replace(None);
        self.inner.connection_state.send_replace(ConnectionState::Disconnected);
        self.notify(NoticeLevel::Error, "Session rejected by device, log in again");
    }

    fn record_failure(&self, address: &DeviceAddress) {
        match self.inner.cache.record_failure(address) {
            Ok(true) => {
                warn!(address = %address, "dropping remembered address after repeated failures");
                self.notify(
                    NoticeLevel::Warning,
                    format!("Forgot {address} after repeated connection failures"),
                );
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not update address cache"),
        }
    }

    async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.connection_state.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == ConnectionState::Connected)).await,
            Ok(Ok(_))
        )
    }

    fn mark_connected(&self) {
        self.inner.connection_state.send_if_modified(|state| {
            let changed = *state != ConnectionState::Connected;
            *state = ConnectionState::Connected;
            changed
        });
    }

    /// Fold the combined link status into the connection state.
    fn on_links_changed(&self, any_up: bool) {
        let has_address = self.inner.address.borrow().is_some();
        let mut transition = None;
        self.inner.connection_state.send_if_modified(|state| {
            let next = match (*state, any_up) {
                (ConnectionState::Connected, false) => ConnectionState::Disconnected,
                (ConnectionState::Connecting, true) => ConnectionState::Connected,
                (ConnectionState::Disconnected, true) if has_address => ConnectionState::Connected,
                _ => return false,
            };
            transition = Some((*state, next));
            *state = next;
            true
        });

        match transition {
            Some((ConnectionState::Connected, ConnectionState::Disconnected)) => {
                warn!("all links down");
                self.notify(NoticeLevel::Warning, "Connection to device lost");
            }
            Some((ConnectionState::Disconnected, ConnectionState::Connected)) => {
                info!("link restored");
                self.notify(NoticeLevel::Success, "Connection to device restored");
            }
            _ => {}
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Drive `relay` to `on` through the first ready transport.
    ///
    /// Returns the transport that carried the command.
    pub async fn control_relay(&self, relay: RelayId, on: bool) -> Result<TransportKind, CoreError> {
        self.require_connected()?;

        for transport in &self.inner.transports {
            let kind = transport.kind();
            if !transport.is_ready() {
                debug!(transport = %kind, "skipping transport, not ready");
                continue;
            }
            match transport.send_control(relay, on).await {
                Ok(true) => {
                    info!(relay = relay.index(), on, transport = %kind, "relay command sent");
                    for entry in self.inner.store.set_commanded(relay, on) {
                        self.notify_entry(&entry);
                    }
                    let label = if on { "ON" } else { "OFF" };
                    self.notify(NoticeLevel::Success, format!("Relay {relay} {label} via {kind}"));
                    return Ok(kind);
                }
                Ok(false) => {
                    self.notify(NoticeLevel::Error, format!("Device refused relay {relay} command"));
                    return Err(CoreError::Protocol {
                        message: format!("device refused relay {relay} command"),
                    });
                }
                Err(CoreError::TransportNotReady { .. }) => {
                    debug!(transport = %kind, "transport went away, falling back");
                }
                Err(CoreError::Unauthorized) => {
                    self.invalidate_session().await;
                    return Err(CoreError::Unauthorized);
                }
                Err(e) => {
                    self.notify(NoticeLevel::Error, format!("Relay {relay} command failed: {e}"));
                    return Err(e);
                }
            }
        }

        Err(CoreError::NoTransportAvailable)
    }

    /// Compare commanded output with feedback for both relays.
    ///
    /// Asks the device first; if it cannot be reached the report is built
    /// from the last known state. Every mismatching relay is logged.
    pub async fn run_diagnostic(&self) -> Result<DiagnosticReport, CoreError> {
        self.require_connected()?;

        let report = match self.inner.http.diagnostic().await {
            Ok(report) => report,
            Err(CoreError::Unauthorized) => {
                self.invalidate_session().await;
                return Err(CoreError::Unauthorized);
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "diagnostic endpoint unavailable, using cached state");
                self.cached_report()
            }
            Err(e) => return Err(e),
        };

        let produced = self.inner.store.record_diagnostic(&report);
        if produced.is_empty() {
            self.notify(NoticeLevel::Success, "Diagnostic passed");
        }
        for entry in &produced {
            self.notify_entry(entry);
        }
        Ok(report)
    }

    /// Fetch status right now instead of waiting for the next poll.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        if self.inner.address.borrow().is_none() {
            return Err(CoreError::NotConnected);
        }
        match self.inner.http.poll().await {
            Ok(_) => Ok(()),
            Err(CoreError::Unauthorized) => {
                self.invalidate_session().await;
                Err(CoreError::Unauthorized)
            }
            Err(e) => Err(e),
        }
    }

    fn require_connected(&self) -> Result<(), CoreError> {
        if *self.inner.connection_state.borrow() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(CoreError::NotConnected)
        }
    }

    fn cached_report(&self) -> DiagnosticReport {
        let state = self.inner.store.snapshot();
        DiagnosticReport {
            relay1: RelayDiagnosis::from(state.relay1),
            relay2: RelayDiagnosis::from(state.relay2),
            source: DiagnosticSource::Cached,
            taken_at: chrono::Utc::now(),
        }
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn state(&self) -> watch::Receiver<DeviceState> {
        self.inner.store.subscribe()
    }

    pub fn snapshot(&self) -> DeviceState {
        self.inner.store.snapshot()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notice_tx.subscribe()
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        self.inner.address.borrow().clone()
    }

    /// Link status of every transport, in priority order.
    pub fn links(&self) -> Vec<(TransportKind, LinkStatus)> {
        self.inner
            .transports
            .iter()
            .map(|t| (t.kind(), *t.link().borrow()))
            .collect()
    }

    /// The highest-priority transport whose link is up.
    pub fn primary_link(&self) -> Option<TransportKind> {
        self.links()
            .into_iter()
            .find(|(_, status)| *status == LinkStatus::Connected)
            .map(|(kind, _)| kind)
    }

    /// Wait for a WebSocket or MQTT link to come up. `None` if only HTTP
    /// is up once `within` has passed.
    pub async fn wait_for_push(&self, within: Duration) -> Option<TransportKind> {
        let mut links: Vec<_> = self
            .inner
            .transports
            .iter()
            .filter(|t| t.kind() != TransportKind::Http)
            .map(|t| (t.kind(), t.link()))
            .collect();
        if links.is_empty() {
            return None;
        }

        let wait = async {
            loop {
                for (kind, rx) in &mut links {
                    if *rx.borrow_and_update() == LinkStatus::Connected {
                        return Some(*kind);
                    }
                }
                let changes = links.iter_mut().map(|(_, rx)| Box::pin(rx.changed()));
                if select_all(changes).await.0.is_err() {
                    return None;
                }
            }
        };
        tokio::time::timeout(within, wait).await.ok().flatten()
    }

    // ── Internals ────────────────────────────────────────────────

    fn apply_update(&self, update: &StateUpdate) {
        for entry in self.inner.store.apply(update) {
            self.notify_entry(&entry);
        }
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        let _ = self.inner.notice_tx.send(Notice::new(level, message));
    }

    fn notify_entry(&self, entry: &ErrorLogEntry) {
        let message = match entry.code {
            ErrorCode::FeedbackMismatch(_) => entry.message.clone(),
            ErrorCode::Device(_) => format!("Device error detected: {}", entry.message),
        };
        self.notify(NoticeLevel::Warning, message);
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Apply one transport's updates to the store.
async fn update_forwarder(
    controller: Controller,
    mut rx: broadcast::Receiver<StateUpdate>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            update = rx.recv() => match update {
                Ok(update) => controller.apply_update(&update),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "state update receiver lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Track every transport's link and derive the overall connection state.
async fn link_supervisor(controller: Controller, cancel: CancellationToken) {
    let mut links: Vec<watch::Receiver<LinkStatus>> =
        controller.inner.transports.iter().map(|t| t.link()).collect();
    if links.is_empty() {
        return;
    }

    loop {
        let any_up = links.iter().any(|rx| *rx.borrow() == LinkStatus::Connected);
        controller.on_links_changed(any_up);

        let changes = links.iter_mut().map(|rx| Box::pin(rx.changed()));
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            (result, _, _) = select_all(changes) => {
                if result.is_err() {
                    break;
                }
            }
        }
    }
}

/// Poll device status on a fixed period.
async fn refresh_task(controller: Controller, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = controller.inner.http.poll() => r,
        };

        match result {
            Ok(_) => {}
            Err(CoreError::Unauthorized) => {
                controller.invalidate_session().await;
                break;
            }
            Err(e) => debug!(error = %e, "periodic refresh failed"),
        }
    }
}
