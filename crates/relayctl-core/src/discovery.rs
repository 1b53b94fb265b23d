// ── Device discovery ──
//
// Sequential probe over a prioritised candidate list: cached address,
// mDNS hostname, local /24 sweep, static fallbacks. First live candidate
// wins. At most one scan runs at a time.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use strum::Display;
use tracing::{debug, info, warn};

use relayctl_api::{ApiSurface, DeviceClient, RetryPolicy, TransportConfig};

use crate::cache::AddressStore;
use crate::config::DiscoveryConfig;
use crate::model::DeviceAddress;

// ── Seams ────────────────────────────────────────────────────────────

/// Liveness check for one candidate.
#[async_trait]
pub trait Prober: Send + Sync {
    /// `true` only if the candidate answered as a relay board within `timeout`.
    async fn probe(&self, candidate: &DeviceAddress, timeout: Duration) -> bool;
}

/// Source of the host's own IPv4 address.
pub trait LocalNetwork: Send + Sync {
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}

/// Asks the routing table which interface would reach a public address.
///
/// `connect` on a UDP socket only selects a route; nothing is sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemNetwork;

impl LocalNetwork for SystemNetwork {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect((Ipv4Addr::new(192, 0, 2, 1), 80)).ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
            _ => None,
        }
    }
}

/// HTTP prober against the device's discovery (or legacy status) endpoint.
#[derive(Debug, Clone)]
pub struct HttpProber {
    surface: ApiSurface,
    token: Option<SecretString>,
    marker: String,
}

impl HttpProber {
    pub fn new(surface: ApiSurface, token: Option<SecretString>, marker: impl Into<String>) -> Self {
        Self {
            surface,
            token,
            marker: marker.into(),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, candidate: &DeviceAddress, timeout: Duration) -> bool {
        let Ok(base_url) = candidate.base_url() else {
            return false;
        };
        let transport = TransportConfig {
            timeout,
            token: self.token.clone(),
        };
        let client = match DeviceClient::new(base_url, self.surface, &transport, RetryPolicy::none()) {
            Ok(c) => c,
            Err(e) => {
                debug!(candidate = %candidate, error = %e, "cannot build probe client");
                return false;
            }
        };
        match client.probe(&self.marker).await {
            Ok(live) => live,
            Err(e) => {
                debug!(candidate = %candidate, error = %e, "probe failed");
                false
            }
        }
    }
}

// ── Candidate plan ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Cache,
    Mdns,
    Subnet,
    Static,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub stage: Stage,
    pub address: DeviceAddress,
    pub timeout: Duration,
}

/// Host suffixes swept in the local /24, in probe order.
pub fn subnet_suffixes() -> impl Iterator<Item = u8> {
    (1..=20).chain(100..=119).chain(200..=254)
}

// ── Discovery ────────────────────────────────────────────────────────

pub struct Discovery {
    config: DiscoveryConfig,
    prober: Arc<dyn Prober>,
    network: Arc<dyn LocalNetwork>,
    cache: Arc<dyn AddressStore>,
    scanning: AtomicBool,
}

impl Discovery {
    pub fn new(
        config: DiscoveryConfig,
        prober: Arc<dyn Prober>,
        network: Arc<dyn LocalNetwork>,
        cache: Arc<dyn AddressStore>,
    ) -> Self {
        Self {
            config,
            prober,
            network,
            cache,
            scanning: AtomicBool::new(false),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Every candidate the next scan would try, in order.
    pub fn candidates(&self) -> Vec<Candidate> {
        let cfg = &self.config;
        let mut plan = Vec::new();

        if let Some(cached) = self.cache.load() {
            plan.push(Candidate {
                stage: Stage::Cache,
                address: cached.address,
                timeout: cfg.cache_timeout,
            });
        }

        if !cfg.mdns_host.is_empty() {
            match cfg.mdns_host.parse() {
                Ok(address) => plan.push(Candidate {
                    stage: Stage::Mdns,
                    address,
                    timeout: cfg.mdns_timeout,
                }),
                Err(e) => warn!(host = %cfg.mdns_host, error = %e, "ignoring invalid mDNS host"),
            }
        }

        if cfg.subnet_sweep {
            if let Some(local) = self.network.local_ipv4() {
                let [a, b, c, _] = local.octets();
                debug!(local = %local, "sweeping {a}.{b}.{c}.0/24");
                plan.extend(subnet_suffixes().filter_map(|d| {
                    Ipv4Addr::new(a, b, c, d)
                        .to_string()
                        .parse()
                        .ok()
                        .map(|address| Candidate {
                            stage: Stage::Subnet,
                            address,
                            timeout: cfg.subnet_timeout,
                        })
                }));
            } else {
                debug!("local IPv4 unknown, skipping subnet sweep");
            }
        }

        plan.extend(cfg.static_candidates.iter().map(|address| Candidate {
            stage: Stage::Static,
            address: address.clone(),
            timeout: cfg.static_timeout,
        }));

        plan
    }

    /// Probe candidates one at a time; return the first live one.
    ///
    /// Returns `None` at once if another scan is in flight. A hit is
    /// written to the address cache.
    pub async fn resolve(&self) -> Option<DeviceAddress> {
        let Some(_guard) = ScanGuard::acquire(&self.scanning) else {
            debug!("discovery already running");
            return None;
        };

        info!("Scanning for device");
        let mut stage = None;
        for candidate in self.candidates() {
            if stage != Some(candidate.stage) {
                stage = Some(candidate.stage);
                debug!(stage = %candidate.stage, "discovery stage");
            }

            let live = tokio::time::timeout(
                candidate.timeout,
                self.prober.probe(&candidate.address, candidate.timeout),
            )
            .await
            .unwrap_or(false);

            if live {
                info!(address = %candidate.address, stage = %candidate.stage, "Device found");
                if let Err(e) = self.cache.save(&candidate.address) {
                    warn!(error = %e, "could not persist device address");
                }
                return Some(candidate.address);
            }
        }

        info!("No device found");
        None
    }
}

/// Holds the scan flag for the lifetime of one scan.
struct ScanGuard<'a>(&'a AtomicBool);

impl<'a> ScanGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_order() {
        let suffixes: Vec<u8> = subnet_suffixes().collect();
        assert_eq!(suffixes.len(), 20 + 20 + 55);
        assert_eq!(suffixes[0], 1);
        assert_eq!(suffixes[19], 20);
        assert_eq!(suffixes[20], 100);
        assert_eq!(suffixes[39], 119);
        assert_eq!(suffixes[40], 200);
        assert_eq!(suffixes.last(), Some(&254));
    }

    #[test]
    fn guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = ScanGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(ScanGuard::acquire(&flag).is_none());
        drop(first);
        assert!(ScanGuard::acquire(&flag).is_some());
    }
}
