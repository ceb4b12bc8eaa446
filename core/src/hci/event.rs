//! Stack-internal event frame decoding.
//!
//! The monitor socket is filtered down to event packets carrying the
//! stack-internal event code, so almost every frame read from it decodes
//! to a controller lifecycle event. Frames that slip through the filter
//! (other packet types, other event codes, other sub-events) are not
//! errors — `decode` returns `Ok(None)` and the caller drops them.
//!
//! Frame layout:
//!
//! ```text
//! [1 byte]  packet type        (0x04, event packet)
//! [1 byte]  event code         (0xFD, stack internal)
//! [1 byte]  payload length
//! [1 byte]  sub-event type     (0x01, device event)
//! [1 byte]  device event code  (1=reg, 2=unreg, 3=up, 4=down)
//! [2 bytes] device id (LE u16)
//! ```

use thiserror::Error;

/// Event packet indicator (first byte of every frame we accept).
pub const EVENT_PKT: u8 = 0x04;
/// Stack-internal event code.
pub const EVT_STACK_INTERNAL: u8 = 0xFD;
/// Device sub-event type within a stack-internal event.
pub const EVT_SI_DEVICE: u8 = 0x01;

const DEV_REG: u8 = 1;
const DEV_UNREG: u8 = 2;
const DEV_UP: u8 = 3;
const DEV_DOWN: u8 = 4;

/// Minimum device-event payload: sub-event type + event code + device id.
const SI_DEVICE_SIZE: usize = 4;

/// A decoded controller lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    /// The kernel registered a new controller.
    Registered(u16),
    /// The controller was removed.
    Unregistered(u16),
    /// The controller was brought administratively up.
    PoweredOn(u16),
    /// The controller was brought administratively down.
    PoweredOff(u16),
}

impl StackEvent {
    pub fn dev_id(self) -> u16 {
        match self {
            StackEvent::Registered(id)
            | StackEvent::Unregistered(id)
            | StackEvent::PoweredOn(id)
            | StackEvent::PoweredOff(id) => id,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedEvent {
    #[error("event frame truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("event header declares {declared} payload bytes, frame carries {carried}")]
    LengthMismatch { declared: usize, carried: usize },

    #[error("unknown stack-internal device event code: {0}")]
    UnknownDeviceEvent(u8),
}

/// Decode one frame read from the monitor channel.
///
/// Returns `Ok(None)` for frames the filter complement is expected to
/// drop (foreign packet types, event codes, or sub-event types), and
/// `Err(MalformedEvent)` for frames that claim to be device events but
/// do not hold together.
pub fn decode(buf: &[u8]) -> Result<Option<StackEvent>, MalformedEvent> {
    if buf.is_empty() {
        return Err(MalformedEvent::Truncated { need: 1, got: 0 });
    }
    if buf[0] != EVENT_PKT {
        return Ok(None);
    }
    // Packet type byte + event header (code, length).
    if buf.len() < 3 {
        return Err(MalformedEvent::Truncated {
            need: 3,
            got: buf.len(),
        });
    }
    if buf[1] != EVT_STACK_INTERNAL {
        return Ok(None);
    }

    let declared = buf[2] as usize;
    let payload = &buf[3..];
    if payload.len() < declared {
        return Err(MalformedEvent::LengthMismatch {
            declared,
            carried: payload.len(),
        });
    }
    let payload = &payload[..declared];

    if declared < SI_DEVICE_SIZE {
        return Err(MalformedEvent::Truncated {
            need: SI_DEVICE_SIZE,
            got: declared,
        });
    }
    if payload[0] != EVT_SI_DEVICE {
        return Ok(None);
    }

    let dev_id = u16::from_le_bytes([payload[2], payload[3]]);
    let event = match payload[1] {
        DEV_REG => StackEvent::Registered(dev_id),
        DEV_UNREG => StackEvent::Unregistered(dev_id),
        DEV_UP => StackEvent::PoweredOn(dev_id),
        DEV_DOWN => StackEvent::PoweredOff(dev_id),
        other => return Err(MalformedEvent::UnknownDeviceEvent(other)),
    };

    Ok(Some(event))
}

/// Encode a lifecycle event as the kernel would emit it. Test support
/// and enumeration synthesis only — the daemon never writes these.
pub fn encode(event: StackEvent) -> Vec<u8> {
    let (code, dev_id) = match event {
        StackEvent::Registered(id) => (DEV_REG, id),
        StackEvent::Unregistered(id) => (DEV_UNREG, id),
        StackEvent::PoweredOn(id) => (DEV_UP, id),
        StackEvent::PoweredOff(id) => (DEV_DOWN, id),
    };
    let id = dev_id.to_le_bytes();
    vec![
        EVENT_PKT,
        EVT_STACK_INTERNAL,
        SI_DEVICE_SIZE as u8,
        EVT_SI_DEVICE,
        code,
        id[0],
        id[1],
    ]
}
