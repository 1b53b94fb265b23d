// Persistent "last known device" storage seam.
//
// The file-backed implementation lives in relayctl-config; the core only
// needs load/store/clear. Consecutive failed connects are counted on the
// entry itself so the count survives process restarts.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::DeviceAddress;

/// Failed connects in a row after which a remembered address is dropped.
pub const FORGET_AFTER_FAILURES: u32 = 3;

/// A remembered device address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAddress {
    pub address: DeviceAddress,
    pub last_connected: DateTime<Utc>,
    /// Consecutive failed connects since the last success.
    #[serde(default)]
    pub failures: u32,
}

impl CachedAddress {
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            last_connected: Utc::now(),
            failures: 0,
        }
    }
}

/// Where the last resolved address is kept between runs.
pub trait AddressStore: Send + Sync {
    fn load(&self) -> Option<CachedAddress>;
    fn store(&self, entry: &CachedAddress) -> Result<(), CoreError>;
    fn clear(&self) -> Result<(), CoreError>;

    /// Remember `address` as freshly reachable.
    fn save(&self, address: &DeviceAddress) -> Result<(), CoreError> {
        self.store(&CachedAddress::new(address.clone()))
    }

    /// Count a failed connect against `address`.
    ///
    /// Only the remembered address is counted. Returns `true` once the
    /// entry reaches [`FORGET_AFTER_FAILURES`] and has been cleared.
    fn record_failure(&self, address: &DeviceAddress) -> Result<bool, CoreError> {
        let Some(mut entry) = self.load() else {
            return Ok(false);
        };
        if entry.address != *address {
            return Ok(false);
        }
        entry.failures = entry.failures.saturating_add(1);
        if entry.failures >= FORGET_AFTER_FAILURES {
            self.clear()?;
            return Ok(true);
        }
        self.store(&entry)?;
        Ok(false)
    }
}

/// In-process store, for tests and one-shot use.
#[derive(Debug, Default)]
pub struct MemoryAddressStore {
    slot: Mutex<Option<CachedAddress>>,
}

impl MemoryAddressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(address: DeviceAddress) -> Self {
        Self {
            slot: Mutex::new(Some(CachedAddress::new(address))),
        }
    }
}

impl AddressStore for MemoryAddressStore {
    fn load(&self) -> Option<CachedAddress> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store(&self, entry: &CachedAddress) -> Result<(), CoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(entry.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), CoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
