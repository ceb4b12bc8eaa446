//! Adapter-lifecycle core of the Bluetooth host daemon.
//!
//! Watches the kernel's HCI stack events, brings controllers up in
//! isolated tasks, configures them from persisted settings, and keeps
//! the authoritative adapter registry with its default election.

pub mod backend;
pub mod config;
pub mod hci;
pub mod lifecycle;
pub mod notify;
pub mod registry;
pub mod security;
pub mod storage;
pub mod testing;

pub use backend::{BackendError, BackendSlot, HostBackend};
pub use config::HostConfig;
pub use hci::control::{ControlError, DeviceControl, DeviceInfo, HciDriver};
pub use hci::BdAddr;
pub use lifecycle::{start_host, HostContext, HostHandle};
pub use notify::{AdapterPattern, LogNotifier, ManagerNotifier};
pub use registry::{Adapter, AdapterRegistry, RegistryError};
pub use security::{NoopSecurity, SecurityManager};
pub use storage::{AdapterStore, MemoryStore, PowerMode, SledStore, StoreError};
