// On-disk "last device" cache: `{address, last_connected, failures}` JSON.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use relayctl_core::{AddressStore, CachedAddress, CoreError};

/// [`AddressStore`] backed by a JSON file.
///
/// A missing or unreadable file loads as "nothing cached".
#[derive(Debug, Clone)]
pub struct FileAddressStore {
    path: PathBuf,
}

impl FileAddressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform cache directory.
    pub fn default_location() -> Self {
        Self::new(crate::cache_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io_error(action: &str, path: &Path, err: &impl std::fmt::Display) -> CoreError {
    CoreError::Config {
        message: format!("failed to {action} {}: {err}", path.display()),
    }
}

impl AddressStore for FileAddressStore {
    fn load(&self) -> Option<CachedAddress> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read address cache");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt address cache");
                None
            }
        }
    }

    fn store(&self, entry: &CachedAddress) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error("create", parent, &e))?;
        }
        let json = serde_json::to_string_pretty(entry)
            .map_err(|e| io_error("encode", &self.path, &e))?;
        std::fs::write(&self.path, json).map_err(|e| io_error("write", &self.path, &e))?;
        debug!(address = %entry.address, failures = entry.failures, path = %self.path.display(), "address cached");
        Ok(())
    }

    fn clear(&self) -> Result<(), CoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &self.path, &e)),
        }
    }
}
