//! Isolated device initialization.
//!
//! Bringing a controller up is a sequence of blocking ioctls that can
//! stall on misbehaving hardware. Each run happens on the blocking pool
//! against its own device handle, so one wedged radio cannot hold up the
//! event loop or its siblings.

use crate::hci::control::{ControlError, DeviceInfo, HciDriver};
use crate::lifecycle::supervisor::{ChildSupervisor, InitCompletion};
use std::sync::Arc;
use tracing::warn;

/// Spawn the initialization of `dev_id`, reporting through the
/// supervisor's completion channel. Returns the tracking id.
pub fn start_initialization(
    supervisor: &mut ChildSupervisor,
    driver: Arc<dyn HciDriver>,
    dev_id: u16,
    link_mode: u32,
    link_policy: u32,
) -> u64 {
    supervisor.track(dev_id, move |task_id, tx| {
        tokio::task::spawn_blocking(move || {
            let outcome = initialize_device(driver.as_ref(), dev_id, link_mode, link_policy);
            // The host loop dropping the receiver means shutdown; the
            // result is moot then.
            let _ = tx.blocking_send(InitCompletion {
                task_id,
                dev_id,
                outcome,
            });
        })
    })
}

/// Run the blocking bring-up sequence for one controller.
fn initialize_device(
    driver: &dyn HciDriver,
    dev_id: u16,
    link_mode: u32,
    link_policy: u32,
) -> Result<DeviceInfo, ControlError> {
    let mut control = driver.open_device(dev_id)?;

    // Link mode and policy are set before power-up so the controller
    // starts with them in effect. Neither is fatal on its own.
    if let Err(err) = control.set_link_mode(link_mode) {
        warn!(dev_id, %err, "failed to set link mode");
    }
    if let Err(err) = control.set_link_policy(link_policy) {
        if !err.is_network_down() {
            warn!(dev_id, %err, "failed to set link policy");
        }
    }

    match control.bring_up() {
        Ok(()) => {}
        // Raced with another power-on; the device is in the state we want.
        Err(ControlError::AlreadyUp(_)) => {}
        Err(err) => return Err(err),
    }

    // Re-read after power-up: the address is only valid once the device
    // is up.
    driver.device_info(dev_id)
}
