//! Post-initialization device configuration.
//!
//! Once a controller is up, its persisted or configured identity is
//! pushed down: friendly name, device class, page timeout and link
//! policy. Every step is best-effort; a controller that rejects one
//! setting still becomes usable.

use crate::hci::control::{DeviceControl, DeviceInfo};
use crate::hci::BdAddr;
use crate::lifecycle::dispatch::HostContext;
use crate::storage::PowerMode;
use tracing::{debug, warn};

/// Outcome of the final bring-up decision for a configured adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The adapter stays up and is ready for use.
    Started,
    /// Stored policy demands the adapter powered off; it was brought
    /// back down.
    PoweredDown,
}

/// Source of the service-class bits merged into the class of device.
pub trait ServiceClassSource: Send + Sync {
    fn service_classes(&self, address: &BdAddr) -> u8;
}

/// Used when no service registrations exist.
pub struct NoServiceClasses;

impl ServiceClassSource for NoServiceClasses {
    fn service_classes(&self, _address: &BdAddr) -> u8 {
        0
    }
}

pub struct DeviceConfigurator<'a> {
    ctx: &'a HostContext,
}

impl<'a> DeviceConfigurator<'a> {
    pub fn new(ctx: &'a HostContext) -> Self {
        Self { ctx }
    }

    /// Push name, class, page timeout and link policy to the device.
    /// Raw-mode controllers are left untouched.
    pub fn apply(&self, info: &DeviceInfo) {
        if info.raw {
            debug!(dev_id = info.dev_id, "raw device, skipping configuration");
            return;
        }

        let mut control = match self.ctx.driver.open_device(info.dev_id) {
            Ok(control) => control,
            Err(err) => {
                warn!(dev_id = info.dev_id, %err, "cannot open device for configuration");
                return;
            }
        };

        let config = &self.ctx.config;
        if config.set_name {
            self.apply_name(control.as_mut(), info);
        }
        if config.set_class {
            self.apply_class(control.as_mut(), info);
        }
        if config.set_page_timeout {
            if let Err(err) = control.write_page_timeout(config.page_timeout) {
                warn!(dev_id = info.dev_id, %err, "failed to set page timeout");
            }
        }
        if let Err(err) = control.write_default_link_policy(config.link_policy) {
            warn!(dev_id = info.dev_id, %err, "failed to set default link policy");
        }
    }

    fn apply_name(&self, control: &mut dyn DeviceControl, info: &DeviceInfo) {
        // A name stored for this controller wins over the configured
        // template.
        let name = self
            .ctx
            .store
            .local_name(&info.address)
            .unwrap_or_else(|| expand_name(&self.ctx.config.name, info.dev_id));
        if let Err(err) = control.write_local_name(&name) {
            warn!(dev_id = info.dev_id, %err, "failed to set local name");
        }
    }

    fn apply_class(&self, control: &mut dyn DeviceControl, info: &DeviceInfo) {
        let mut class = match self.ctx.store.local_class(&info.address) {
            Some(mut stored) => {
                if !self.ctx.config.inquiry_scan {
                    // Keep the limited-discoverable bit clear when the
                    // adapter is configured non-discoverable.
                    stored[1] &= 0xdf;
                }
                stored
            }
            None => {
                let configured = self.ctx.config.class;
                [
                    (configured & 0xff) as u8,
                    ((configured >> 8) & 0xff) as u8,
                    0,
                ]
            }
        };
        class[2] = self.ctx.services.service_classes(&info.address);

        if let Err(err) = control.write_class(class) {
            warn!(dev_id = info.dev_id, %err, "failed to set device class");
        }
    }

    /// Apply the stored power policy: an adapter remembered as powered
    /// off is brought back down instead of left running.
    pub fn start_adapter(&self, info: &DeviceInfo) -> StartOutcome {
        match self.ctx.store.power_mode(&info.address) {
            // No stored policy means the adapter stays as it came up.
            None | Some(PowerMode::On) => StartOutcome::Started,
            Some(PowerMode::Off) => {
                debug!(dev_id = info.dev_id, "stored power mode is off, bringing adapter down");
                match self.ctx.driver.open_device(info.dev_id) {
                    Ok(mut control) => {
                        if let Err(err) = control.bring_down() {
                            warn!(dev_id = info.dev_id, %err, "failed to power adapter down");
                        }
                    }
                    Err(err) => {
                        warn!(dev_id = info.dev_id, %err, "cannot open device for power-down");
                    }
                }
                StartOutcome::PoweredDown
            }
        }
    }
}

/// Expand `%h` (hostname) and `%d` (device id) in a name template.
pub fn expand_name(template: &str, dev_id: u16) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => out.push_str(&hostname()),
            Some('d') => out.push_str(&dev_id.to_string()),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is a valid writable buffer of the stated length.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match std::str::from_utf8(&buf[..len]) {
        Ok(name) if !name.is_empty() => name.to_string(),
        _ => "localhost".to_string(),
    }
}
