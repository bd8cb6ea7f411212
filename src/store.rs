//! Registry persistence shared between processes.
//!
//! The JSON file is authoritative. Every mutation reloads it, applies the
//! change and writes it back while holding an exclusive lock on a sibling
//! `.lock` file, so a long-running `run` and one-shot commands never overwrite
//! each other's changes.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::registry::{RegistrySnapshot, WalletRegistry};

pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Held for the duration of a read-modify-write; released on drop.
struct StoreLock {
    _file: File,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<StoreLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("failed to open {}", self.lock_path.display()))?;
        file.lock()
            .with_context(|| format!("failed to lock {}", self.lock_path.display()))?;
        Ok(StoreLock { _file: file })
    }

    /// Read the current registry; a missing file is an empty registry.
    ///
    /// Saves replace the file atomically, so no lock is needed to read.
    pub fn load(&self) -> Result<WalletRegistry> {
        if !self.path.exists() {
            return Ok(WalletRegistry::new());
        }
        let snapshot = RegistrySnapshot::load(&self.path)?;
        Ok(WalletRegistry::from_snapshot(snapshot))
    }

    /// Load, restoring state at startup with a summary log line.
    pub fn restore(&self) -> Result<WalletRegistry> {
        let registry = self.load()?;
        if self.path.exists() {
            info!(
                "Restored {} wallet(s) and {} alert(s) from {}",
                registry.wallets().len(),
                registry.alerts().len(),
                self.path.display()
            );
        }
        Ok(registry)
    }

    /// Apply `f` to the latest on-disk registry under the lock and write the
    /// result back. Returns the updated registry with `f`'s output.
    pub fn transact<T>(&self, f: impl FnOnce(&mut WalletRegistry) -> T) -> Result<(WalletRegistry, T)> {
        let _lock = self.lock()?;
        let mut registry = self.load()?;
        let out = f(&mut registry);
        registry.snapshot().save(&self.path)?;
        Ok((registry, out))
    }
}
