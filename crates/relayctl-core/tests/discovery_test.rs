#![allow(clippy::unwrap_used)]
// Discovery ordering and timing against a scripted prober on a paused clock.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::time::Instant;

use relayctl_core::discovery::Stage;
use relayctl_core::{
    AddressStore, DeviceAddress, Discovery, DiscoveryConfig, LocalNetwork, MemoryAddressStore,
    Prober,
};

/// Answers after a per-address delay; unknown addresses fail at once.
#[derive(Default)]
struct ScriptedProber {
    live: HashMap<String, Duration>,
    probed: Mutex<Vec<String>>,
}

impl ScriptedProber {
    fn live_after(mut self, address: &str, delay_ms: u64) -> Self {
        self.live.insert(address.into(), Duration::from_millis(delay_ms));
        self
    }

    fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, candidate: &DeviceAddress, _timeout: Duration) -> bool {
        self.probed.lock().unwrap().push(candidate.to_string());
        match self.live.get(candidate.host()) {
            Some(delay) => {
                tokio::time::sleep(*delay).await;
                true
            }
            None => false,
        }
    }
}

struct FixedNetwork(Option<Ipv4Addr>);

impl LocalNetwork for FixedNetwork {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        self.0
    }
}

fn addr(s: &str) -> DeviceAddress {
    s.parse().unwrap()
}

fn statics_only(candidates: &[&str]) -> DiscoveryConfig {
    DiscoveryConfig {
        mdns_host: String::new(),
        subnet_sweep: false,
        static_candidates: candidates.iter().map(|s| addr(s)).collect(),
        ..DiscoveryConfig::default()
    }
}

fn discovery(
    config: DiscoveryConfig,
    prober: &Arc<ScriptedProber>,
    local: Option<Ipv4Addr>,
    cache: &Arc<MemoryAddressStore>,
) -> Discovery {
    Discovery::new(
        config,
        Arc::clone(prober) as Arc<dyn Prober>,
        Arc::new(FixedNetwork(local)),
        Arc::clone(cache) as Arc<dyn AddressStore>,
    )
}

#[tokio::test(start_paused = true)]
async fn stages_run_in_order_and_first_live_wins() {
    let prober = Arc::new(
        ScriptedProber::default()
            .live_after("192.168.50.105", 10)
            .live_after("192.168.1.100", 10),
    );
    let cache = Arc::new(MemoryAddressStore::with_address(addr("192.168.50.9")));
    let config = DiscoveryConfig {
        static_candidates: vec![addr("192.168.1.100")],
        ..DiscoveryConfig::default()
    };
    let d = discovery(config, &prober, Some(Ipv4Addr::new(192, 168, 50, 7)), &cache);

    assert_eq!(d.resolve().await, Some(addr("192.168.50.105")));

    let mut expected = vec!["192.168.50.9".to_string(), "esp32s3.local".to_string()];
    expected.extend((1..=20).chain(100..=105).map(|n| format!("192.168.50.{n}")));
    assert_eq!(prober.probed(), expected);
    assert_eq!(cache.load().unwrap().address, addr("192.168.50.105"));
}

#[tokio::test(start_paused = true)]
async fn slow_candidate_is_abandoned_at_its_timeout() {
    // .100 would answer after 2 s but the static stage allows 500 ms.
    let prober = Arc::new(
        ScriptedProber::default()
            .live_after("192.168.1.100", 2000)
            .live_after("192.168.1.101", 200),
    );
    let cache = Arc::new(MemoryAddressStore::new());
    let d = discovery(
        statics_only(&["192.168.1.100", "192.168.1.101"]),
        &prober,
        None,
        &cache,
    );

    let start = Instant::now();
    assert_eq!(d.resolve().await, Some(addr("192.168.1.101")));
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(700), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(750), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn concurrent_scan_returns_none() {
    let prober = Arc::new(ScriptedProber::default().live_after("192.168.1.100", 300));
    let cache = Arc::new(MemoryAddressStore::new());
    let d = Arc::new(discovery(statics_only(&["192.168.1.100"]), &prober, None, &cache));

    let first = tokio::spawn({
        let d = Arc::clone(&d);
        async move { d.resolve().await }
    });
    tokio::task::yield_now().await;

    assert!(d.is_scanning());
    assert_eq!(d.resolve().await, None);
    assert_eq!(first.await.unwrap(), Some(addr("192.168.1.100")));
    assert!(!d.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn cached_hit_skips_later_stages() {
    let prober = Arc::new(ScriptedProber::default().live_after("192.168.1.101", 50));
    let cache = Arc::new(MemoryAddressStore::new());

    let first = discovery(
        statics_only(&["192.168.1.100", "192.168.1.101"]),
        &prober,
        None,
        &cache,
    );
    assert_eq!(first.resolve().await, Some(addr("192.168.1.101")));

    // A later session sweeps a subnet too, but the cached entry comes first.
    let config = DiscoveryConfig {
        mdns_host: String::new(),
        ..statics_only(&["192.168.1.100"])
    };
    let config = DiscoveryConfig {
        subnet_sweep: true,
        ..config
    };
    let second = discovery(config, &prober, Some(Ipv4Addr::new(192, 168, 1, 40)), &cache);

    let plan = second.candidates();
    assert_eq!(plan[0].stage, Stage::Cache);
    assert_eq!(plan[0].address, addr("192.168.1.101"));
    assert_eq!(plan[0].timeout, Duration::from_millis(1000));

    let before = prober.probed().len();
    assert_eq!(second.resolve().await, Some(addr("192.168.1.101")));
    assert_eq!(prober.probed().len(), before + 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_plan_leaves_cache_untouched() {
    let prober = Arc::new(ScriptedProber::default());
    let cache = Arc::new(MemoryAddressStore::new());
    let d = discovery(
        statics_only(&["192.168.1.100", "10.0.0.100"]),
        &prober,
        None,
        &cache,
    );

    assert_eq!(d.resolve().await, None);
    assert_eq!(prober.probed(), vec!["192.168.1.100", "10.0.0.100"]);
    assert!(cache.load().is_none());
}

#[test]
fn subnet_stage_skipped_without_local_address() {
    let prober = Arc::new(ScriptedProber::default());
    let cache = Arc::new(MemoryAddressStore::new());
    let d = discovery(DiscoveryConfig::default(), &prober, None, &cache);

    let plan = d.candidates();
    assert!(plan.iter().all(|c| c.stage != Stage::Subnet));
    assert_eq!(plan[0].stage, Stage::Mdns);
    assert_eq!(plan.len(), 1 + 9);
}
