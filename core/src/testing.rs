//! In-memory fakes for the driver, notifier and security collaborators.
//!
//! These record every interaction so tests can assert on the exact
//! command and notification sequences the lifecycle core produces.

use crate::hci::control::{ControlError, DeviceControl, DeviceInfo, HciDriver};
use crate::hci::BdAddr;
use crate::notify::ManagerNotifier;
use crate::security::SecurityManager;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One control operation issued against a fake device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    SetLinkMode { dev_id: u16, mode: u32 },
    SetLinkPolicy { dev_id: u16, policy: u32 },
    BringUp { dev_id: u16 },
    BringDown { dev_id: u16 },
    WriteLocalName { dev_id: u16, name: String },
    WriteClass { dev_id: u16, class: [u8; 3] },
    WritePageTimeout { dev_id: u16, timeout: u16 },
    WriteDefaultLinkPolicy { dev_id: u16, policy: u16 },
}

#[derive(Clone)]
struct FakeDevice {
    info: DeviceInfo,
    fail_open: bool,
    fail_bring_up: bool,
}

#[derive(Default)]
struct DriverState {
    devices: HashMap<u16, FakeDevice>,
    commands: Vec<ControlCommand>,
    monitor_tx: Option<mpsc::Sender<Vec<u8>>>,
}

/// A scriptable in-memory [`HciDriver`].
#[derive(Default)]
pub struct FakeDriver {
    state: Arc<Mutex<DriverState>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, dev_id: u16, address: [u8; 6], up: bool) {
        self.state.lock().devices.insert(
            dev_id,
            FakeDevice {
                info: DeviceInfo {
                    dev_id,
                    address: BdAddr::new(address),
                    up,
                    raw: false,
                },
                fail_open: false,
                fail_bring_up: false,
            },
        );
    }

    pub fn add_raw_device(&self, dev_id: u16, address: [u8; 6]) {
        self.add_device(dev_id, address, false);
        if let Some(device) = self.state.lock().devices.get_mut(&dev_id) {
            device.info.raw = true;
        }
    }

    pub fn remove_device(&self, dev_id: u16) {
        self.state.lock().devices.remove(&dev_id);
    }

    pub fn set_fail_open(&self, dev_id: u16, fail: bool) {
        if let Some(device) = self.state.lock().devices.get_mut(&dev_id) {
            device.fail_open = fail;
        }
    }

    pub fn set_fail_bring_up(&self, dev_id: u16, fail: bool) {
        if let Some(device) = self.state.lock().devices.get_mut(&dev_id) {
            device.fail_bring_up = fail;
        }
    }

    /// Every control command issued so far, in order.
    pub fn commands(&self) -> Vec<ControlCommand> {
        self.state.lock().commands.clone()
    }

    /// Sender feeding the monitor channel handed out by `start_monitor`.
    pub fn monitor_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.state
            .lock()
            .monitor_tx
            .clone()
            .unwrap_or_else(|| panic!("monitor not started"))
    }
}

impl HciDriver for FakeDriver {
    fn start_monitor(&self) -> Result<mpsc::Receiver<Vec<u8>>, ControlError> {
        let (tx, rx) = mpsc::channel(64);
        self.state.lock().monitor_tx = Some(tx);
        Ok(rx)
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, ControlError> {
        let state = self.state.lock();
        let mut devices: Vec<DeviceInfo> = state.devices.values().map(|d| d.info).collect();
        devices.sort_by_key(|d| d.dev_id);
        Ok(devices)
    }

    fn device_info(&self, dev_id: u16) -> Result<DeviceInfo, ControlError> {
        self.state
            .lock()
            .devices
            .get(&dev_id)
            .map(|d| d.info)
            .ok_or(ControlError::NoSuchDevice(dev_id))
    }

    fn open_device(&self, dev_id: u16) -> Result<Box<dyn DeviceControl>, ControlError> {
        let state = self.state.lock();
        let device = state
            .devices
            .get(&dev_id)
            .ok_or(ControlError::NoSuchDevice(dev_id))?;
        if device.fail_open {
            return Err(ControlError::Device {
                op: "open",
                dev_id,
                source: io::Error::from_raw_os_error(libc::EBUSY),
            });
        }
        Ok(Box::new(FakeControl {
            dev_id,
            state: self.state.clone(),
        }))
    }
}

struct FakeControl {
    dev_id: u16,
    state: Arc<Mutex<DriverState>>,
}

impl FakeControl {
    fn record(&self, command: ControlCommand) {
        self.state.lock().commands.push(command);
    }
}

impl DeviceControl for FakeControl {
    fn set_link_mode(&mut self, mode: u32) -> Result<(), ControlError> {
        self.record(ControlCommand::SetLinkMode {
            dev_id: self.dev_id,
            mode,
        });
        Ok(())
    }

    fn set_link_policy(&mut self, policy: u32) -> Result<(), ControlError> {
        self.record(ControlCommand::SetLinkPolicy {
            dev_id: self.dev_id,
            policy,
        });
        Ok(())
    }

    fn bring_up(&mut self) -> Result<(), ControlError> {
        self.record(ControlCommand::BringUp { dev_id: self.dev_id });
        let mut state = self.state.lock();
        let device = state
            .devices
            .get_mut(&self.dev_id)
            .ok_or(ControlError::NoSuchDevice(self.dev_id))?;
        if device.fail_bring_up {
            return Err(ControlError::Device {
                op: "HCIDEVUP",
                dev_id: self.dev_id,
                source: io::Error::from_raw_os_error(libc::EIO),
            });
        }
        if device.info.up {
            return Err(ControlError::AlreadyUp(self.dev_id));
        }
        device.info.up = true;
        Ok(())
    }

    fn bring_down(&mut self) -> Result<(), ControlError> {
        self.record(ControlCommand::BringDown { dev_id: self.dev_id });
        let mut state = self.state.lock();
        if let Some(device) = state.devices.get_mut(&self.dev_id) {
            device.info.up = false;
        }
        Ok(())
    }

    fn write_local_name(&mut self, name: &str) -> Result<(), ControlError> {
        self.record(ControlCommand::WriteLocalName {
            dev_id: self.dev_id,
            name: name.to_string(),
        });
        Ok(())
    }

    fn write_class(&mut self, class: [u8; 3]) -> Result<(), ControlError> {
        self.record(ControlCommand::WriteClass {
            dev_id: self.dev_id,
            class,
        });
        Ok(())
    }

    fn write_page_timeout(&mut self, timeout: u16) -> Result<(), ControlError> {
        self.record(ControlCommand::WritePageTimeout {
            dev_id: self.dev_id,
            timeout,
        });
        Ok(())
    }

    fn write_default_link_policy(&mut self, policy: u16) -> Result<(), ControlError> {
        self.record(ControlCommand::WriteDefaultLinkPolicy {
            dev_id: self.dev_id,
            policy,
        });
        Ok(())
    }
}

/// Every announcement the lifecycle core makes, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierEvent {
    Added(String),
    Removed(String),
    DefaultChanged(String),
    AdaptersChanged(Vec<String>),
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotifierEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotifierEvent> {
        self.events.lock().clone()
    }
}

impl ManagerNotifier for RecordingNotifier {
    fn adapter_added(&self, path: &str) {
        self.events
            .lock()
            .push(NotifierEvent::Added(path.to_string()));
    }

    fn adapter_removed(&self, path: &str) {
        self.events
            .lock()
            .push(NotifierEvent::Removed(path.to_string()));
    }

    fn default_adapter_changed(&self, path: &str) {
        self.events
            .lock()
            .push(NotifierEvent::DefaultChanged(path.to_string()));
    }

    fn adapters_changed(&self, paths: &[String]) {
        self.events
            .lock()
            .push(NotifierEvent::AdaptersChanged(paths.to_vec()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityCall {
    Start(u16),
    Stop(u16),
}

#[derive(Default)]
pub struct RecordingSecurity {
    calls: Mutex<Vec<SecurityCall>>,
}

impl RecordingSecurity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SecurityCall> {
        self.calls.lock().clone()
    }
}

impl SecurityManager for RecordingSecurity {
    fn start(&self, dev_id: u16) {
        self.calls.lock().push(SecurityCall::Start(dev_id));
    }

    fn stop(&self, dev_id: u16) {
        self.calls.lock().push(SecurityCall::Stop(dev_id));
    }
}
