//! Configuration collaborator boundary — persisted per-address adapter
//! settings (local name, class of device, administrative power mode).
//!
//! Consumed, not owned, by the lifecycle core: the configurator reads
//! stored values to override daemon defaults, and the bring-up path
//! consults the stored power mode to decide whether a controller must
//! stay down.

use crate::hci::BdAddr;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("adapter store error: {0}")]
pub struct StoreError(pub String);

/// Stored administrative power mode for a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    On,
    Off,
}

/// Per-address persisted adapter settings.
pub trait AdapterStore: Send + Sync {
    fn local_name(&self, addr: &BdAddr) -> Option<String>;
    fn set_local_name(&self, addr: &BdAddr, name: &str) -> Result<(), StoreError>;
    fn local_class(&self, addr: &BdAddr) -> Option<[u8; 3]>;
    fn set_local_class(&self, addr: &BdAddr, class: [u8; 3]) -> Result<(), StoreError>;
    fn power_mode(&self, addr: &BdAddr) -> Option<PowerMode>;
    fn set_power_mode(&self, addr: &BdAddr, mode: PowerMode) -> Result<(), StoreError>;
}

/// Volatile store for tests and first-boot runs.
#[derive(Default)]
pub struct MemoryStore {
    names: RwLock<HashMap<BdAddr, String>>,
    classes: RwLock<HashMap<BdAddr, [u8; 3]>>,
    modes: RwLock<HashMap<BdAddr, PowerMode>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdapterStore for MemoryStore {
    fn local_name(&self, addr: &BdAddr) -> Option<String> {
        self.names.read().get(addr).cloned()
    }

    fn set_local_name(&self, addr: &BdAddr, name: &str) -> Result<(), StoreError> {
        self.names.write().insert(*addr, name.to_string());
        Ok(())
    }

    fn local_class(&self, addr: &BdAddr) -> Option<[u8; 3]> {
        self.classes.read().get(addr).copied()
    }

    fn set_local_class(&self, addr: &BdAddr, class: [u8; 3]) -> Result<(), StoreError> {
        self.classes.write().insert(*addr, class);
        Ok(())
    }

    fn power_mode(&self, addr: &BdAddr) -> Option<PowerMode> {
        self.modes.read().get(addr).copied()
    }

    fn set_power_mode(&self, addr: &BdAddr, mode: PowerMode) -> Result<(), StoreError> {
        self.modes.write().insert(*addr, mode);
        Ok(())
    }
}

/// Sled-backed store used by the daemon.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError(e.to_string()))?;
        Ok(Self { db })
    }

    fn key(prefix: &str, addr: &BdAddr) -> Vec<u8> {
        format!("{prefix}/{addr}").into_bytes()
    }

    fn get(&self, prefix: &str, addr: &BdAddr) -> Option<Vec<u8>> {
        self.db
            .get(Self::key(prefix, addr))
            .ok()
            .flatten()
            .map(|v| v.to_vec())
    }

    fn put(&self, prefix: &str, addr: &BdAddr, value: &[u8]) -> Result<(), StoreError> {
        self.db
            .insert(Self::key(prefix, addr), value)
            .map_err(|e| StoreError(e.to_string()))?;
        Ok(())
    }
}

impl AdapterStore for SledStore {
    fn local_name(&self, addr: &BdAddr) -> Option<String> {
        self.get("name", addr)
            .and_then(|v| String::from_utf8(v).ok())
    }

    fn set_local_name(&self, addr: &BdAddr, name: &str) -> Result<(), StoreError> {
        self.put("name", addr, name.as_bytes())
    }

    fn local_class(&self, addr: &BdAddr) -> Option<[u8; 3]> {
        self.get("class", addr).and_then(|v| v.try_into().ok())
    }

    fn set_local_class(&self, addr: &BdAddr, class: [u8; 3]) -> Result<(), StoreError> {
        self.put("class", addr, &class)
    }

    fn power_mode(&self, addr: &BdAddr) -> Option<PowerMode> {
        match self.get("mode", addr).as_deref() {
            Some(b"on") => Some(PowerMode::On),
            Some(b"off") => Some(PowerMode::Off),
            _ => None,
        }
    }

    fn set_power_mode(&self, addr: &BdAddr, mode: PowerMode) -> Result<(), StoreError> {
        let value: &[u8] = match mode {
            PowerMode::On => b"on",
            PowerMode::Off => b"off",
        };
        self.put("mode", addr, value)
    }
}
