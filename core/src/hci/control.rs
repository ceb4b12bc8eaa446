//! Controller access boundary.
//!
//! `HciDriver` is what the lifecycle core is written against: it opens
//! the monitor channel, enumerates controllers, and hands out per-device
//! control handles. The raw Linux implementation lives in `hci::raw`;
//! tests plug in fakes from the `testing` module.

use super::BdAddr;
use std::io;
use thiserror::Error;
use tokio::sync::mpsc;

/// Snapshot of a controller's kernel-side state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub dev_id: u16,
    pub address: BdAddr,
    /// Administratively up.
    pub up: bool,
    /// Raw-mode controllers are driven by userspace directly and must not
    /// be registered or configured by the daemon.
    pub raw: bool,
}

#[derive(Debug, Error)]
pub enum ControlError {
    /// The kernel reported the controller already up on bring-up. Callers
    /// treat this as success.
    #[error("controller hci{0} is already up")]
    AlreadyUp(u16),

    #[error("no controller hci{0}")]
    NoSuchDevice(u16),

    #[error("control socket {op} failed: {source}")]
    Socket {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{op} on hci{dev_id} failed: {source}")]
    Device {
        op: &'static str,
        dev_id: u16,
        #[source]
        source: io::Error,
    },
}

impl ControlError {
    /// True for the "network is down" errno the kernel returns when a
    /// link-policy write races the controller coming up.
    pub fn is_network_down(&self) -> bool {
        match self {
            ControlError::Device { source, .. } => {
                source.raw_os_error() == Some(libc::ENETDOWN)
            }
            _ => false,
        }
    }
}

/// A control handle scoped to one controller. Dropped on every exit
/// path, which releases the underlying descriptor.
pub trait DeviceControl: Send {
    fn set_link_mode(&mut self, mode: u32) -> Result<(), ControlError>;
    fn set_link_policy(&mut self, policy: u32) -> Result<(), ControlError>;
    /// Bring the controller administratively up. Returns
    /// [`ControlError::AlreadyUp`] when the kernel says it already is.
    fn bring_up(&mut self) -> Result<(), ControlError>;
    fn bring_down(&mut self) -> Result<(), ControlError>;
    fn write_local_name(&mut self, name: &str) -> Result<(), ControlError>;
    fn write_class(&mut self, class: [u8; 3]) -> Result<(), ControlError>;
    fn write_page_timeout(&mut self, timeout: u16) -> Result<(), ControlError>;
    fn write_default_link_policy(&mut self, policy: u16) -> Result<(), ControlError>;
}

/// Access to the kernel's controller management surface.
pub trait HciDriver: Send + Sync + 'static {
    /// Open the filtered monitor channel and start feeding raw frames
    /// into the returned receiver. Failure here aborts daemon startup;
    /// it is the only escalated setup error.
    fn start_monitor(&self) -> Result<mpsc::Receiver<Vec<u8>>, ControlError>;

    /// Enumerate controllers currently known to the kernel.
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, ControlError>;

    fn device_info(&self, dev_id: u16) -> Result<DeviceInfo, ControlError>;

    fn open_device(&self, dev_id: u16) -> Result<Box<dyn DeviceControl>, ControlError>;
}
