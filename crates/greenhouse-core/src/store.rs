//! Persisted device selection.
//!
//! The orchestrator remembers one thing between runs: the address of the
//! sensor the user picked. [`AddressStore`] abstracts that persistence so
//! embedders can supply their own; [`FileAddressStore`] is the default
//! file-backed implementation and [`MemoryAddressStore`] serves tests.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Persistence for the selected device address.
#[async_trait]
pub trait AddressStore: Send + Sync {
    /// Load the persisted address, if one was ever saved.
    async fn load(&self) -> Result<Option<String>>;

    /// Persist the address, replacing any previous one.
    async fn save(&self, address: &str) -> Result<()>;
}

/// In-memory store for tests and short-lived embedders.
#[derive(Debug, Default)]
pub struct MemoryAddressStore {
    address: RwLock<Option<String>>,
}

impl MemoryAddressStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with an address.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: RwLock::new(Some(address.into())),
        }
    }
}

#[async_trait]
impl AddressStore for MemoryAddressStore {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.address.read().await.clone())
    }

    async fn save(&self, address: &str) -> Result<()> {
        *self.address.write().await = Some(address.to_string());
        Ok(())
    }
}

/// On-disk layout of the persisted selection.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDevice {
    address: String,
}

/// File-backed store keeping a single JSON document.
#[derive(Debug, Clone)]
pub struct FileAddressStore {
    path: PathBuf,
}

impl FileAddressStore {
    /// Create a store at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store at the platform default location,
    /// `<data_local_dir>/greenhouse/device.json`.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform exposes no local data directory.
    pub fn from_platform_dir() -> Result<Self> {
        let base = dirs::data_local_dir().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no platform data directory",
            ))
        })?;
        Ok(Self::new(base.join("greenhouse").join("device.json")))
    }

    /// The path this store reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the persisted selection, if any.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl AddressStore for FileAddressStore {
    async fn load(&self) -> Result<Option<String>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<StoredDevice>(&bytes) {
            Ok(stored) => Ok(Some(stored.address)),
            Err(e) => {
                // A corrupt store is treated as no selection; the next save
                // rewrites it.
                warn!(path = %self.path.display(), "unreadable device store: {e}");
                Ok(None)
            }
        }
    }

    async fn save(&self, address: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let stored = StoredDevice {
            address: address.to_string(),
        };
        let bytes = serde_json::to_vec_pretty(&stored)
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        tokio::fs::write(&self.path, bytes).await?;
        debug!(path = %self.path.display(), address, "device selection saved");
        Ok(())
    }
}
