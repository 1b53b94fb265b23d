// HTTP request/response transport.
//
// Ready whenever an address is set. Inbound state comes from `poll()`,
// which the controller drives on a fixed interval, and from the status
// re-fetch that follows every command. Legacy firmware also echoes relay
// feedback in the control reply; that is applied ahead of the re-fetch.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use relayctl_api::models::DeviceStatus;
use relayctl_api::{ApiSurface, DeviceClient, RetryPolicy, TransportConfig};

use super::{Transport, UPDATE_CHANNEL_CAPACITY};
use crate::error::CoreError;
use crate::model::{DeviceAddress, DiagnosticReport, DiagnosticSource, LinkStatus, RelayId, TransportKind};
use crate::store::StateUpdate;

pub struct HttpTransport {
    surface: ApiSurface,
    transport: TransportConfig,
    retry: RetryPolicy,
    client: ArcSwapOption<DeviceClient>,
    link_tx: watch::Sender<LinkStatus>,
    update_tx: broadcast::Sender<StateUpdate>,
}

impl HttpTransport {
    pub fn new(
        surface: ApiSurface,
        timeout: Duration,
        token: Option<SecretString>,
        retry: RetryPolicy,
    ) -> Self {
        let (link_tx, _) = watch::channel(LinkStatus::Disconnected);
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            surface,
            transport: TransportConfig { timeout, token },
            retry,
            client: ArcSwapOption::empty(),
            link_tx,
            update_tx,
        }
    }

    fn client(&self) -> Result<Arc<DeviceClient>, CoreError> {
        self.client.load_full().ok_or(CoreError::NotConnected)
    }

    fn set_link(&self, status: LinkStatus) {
        self.link_tx.send_if_modified(|s| {
            let changed = *s != status;
            *s = status;
            changed
        });
    }

    /// Fetch status once and publish it as a snapshot.
    ///
    /// A failure marks the HTTP link down; success marks it up.
    pub async fn poll(&self) -> Result<DeviceStatus, CoreError> {
        let client = self.client()?;
        match client.status().await {
            Ok(status) => {
                self.set_link(LinkStatus::Connected);
                let _ = self.update_tx.send(StateUpdate::Snapshot(status.clone()));
                Ok(status)
            }
            Err(e) => {
                self.set_link(LinkStatus::Disconnected);
                Err(e.into())
            }
        }
    }

    /// Ask the device to compare its outputs against feedback.
    pub async fn diagnostic(&self) -> Result<DiagnosticReport, CoreError> {
        let client = self.client()?;
        let diag = client.diagnostic().await?;
        Ok(DiagnosticReport {
            relay1: diag.relay1.into(),
            relay2: diag.relay2.into(),
            source: DiagnosticSource::Device,
            taken_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn link(&self) -> watch::Receiver<LinkStatus> {
        self.link_tx.subscribe()
    }

    fn is_ready(&self) -> bool {
        self.client.load().is_some()
    }

    async fn connect(&self, address: &DeviceAddress, _cancel: &CancellationToken) -> Result<(), CoreError> {
        let client = DeviceClient::new(address.base_url()?, self.surface, &self.transport, self.retry)?;
        self.client.store(Some(Arc::new(client)));
        self.set_link(LinkStatus::Connecting);
        debug!(address = %address, "HTTP transport bound");
        self.poll().await.map(|_| ())
    }

    async fn disconnect(&self) {
        self.client.store(None);
        self.set_link(LinkStatus::Disconnected);
    }

    async fn send_control(&self, relay: RelayId, on: bool) -> Result<bool, CoreError> {
        let client = self.client()?;
        let ack = match client.control(relay.index(), on).await {
            Ok(ack) => ack,
            Err(e) => {
                self.set_link(LinkStatus::Disconnected);
                return Err(e.into());
            }
        };
        self.set_link(LinkStatus::Connected);

        if let Some(frame) = ack.feedback_frame() {
            debug!(relay = relay.index(), "applying feedback from control ack");
            let _ = self.update_tx.send(StateUpdate::Frame(frame));
        }
        if let Err(e) = self.poll().await {
            warn!(error = %e, "status re-fetch after command failed");
        }
        Ok(ack.success)
    }

    fn subscribe(&self) -> broadcast::Receiver<StateUpdate> {
        self.update_tx.subscribe()
    }
}
