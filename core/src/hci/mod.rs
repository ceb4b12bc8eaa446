//! Kernel-facing HCI types — controller addresses, the stack-internal
//! event decoder, and the device control boundary.
//!
//! Everything that touches raw kernel structures lives under this module:
//! - `event`: fixed-layout decode of the monitor channel's event frames
//! - `control`: the `HciDriver` / `DeviceControl` traits the rest of the
//!   core is written against
//! - `raw`: the Linux socket/ioctl implementation of those traits

pub mod control;
pub mod event;
#[cfg(target_os = "linux")]
pub mod raw;

pub use control::{ControlError, DeviceControl, DeviceInfo, HciDriver};
pub use event::{decode, MalformedEvent, StackEvent};

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 48-bit controller hardware address.
///
/// Stored in display order, i.e. `addr.bytes()[0]` is the first octet of
/// the `XX:XX:XX:XX:XX:XX` rendering. The kernel hands addresses out in
/// little-endian order; use [`BdAddr::from_le_bytes`] for those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    /// The all-zero wildcard address.
    pub const ANY: BdAddr = BdAddr([0; 6]);

    pub fn new(bytes: [u8; 6]) -> Self {
        BdAddr(bytes)
    }

    /// Build from the kernel's little-endian byte order.
    pub fn from_le_bytes(mut bytes: [u8; 6]) -> Self {
        bytes.reverse();
        BdAddr(bytes)
    }

    pub fn bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid controller address: {0}")]
pub struct InvalidAddress(pub String);

impl FromStr for BdAddr {
    type Err = InvalidAddress;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 || part.len() != 2 {
                return Err(InvalidAddress(s.to_string()));
            }
            bytes[count] = u8::from_str_radix(part, 16)
                .map_err(|_| InvalidAddress(s.to_string()))?;
            count += 1;
        }
        if count != 6 {
            return Err(InvalidAddress(s.to_string()));
        }
        Ok(BdAddr(bytes))
    }
}
