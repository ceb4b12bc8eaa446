//! Raw Linux HCI driver — sockets and ioctls against the kernel's
//! Bluetooth device-management surface.

use super::control::{ControlError, DeviceControl, DeviceInfo, HciDriver};
use super::BdAddr;
use std::io;
use std::os::unix::io::RawFd;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

const BTPROTO_HCI: libc::c_int = 1;
const SOL_HCI: libc::c_int = 0;
const HCI_FILTER: libc::c_int = 2;

const HCI_DEV_NONE: u16 = 0xffff;
const HCI_CHANNEL_RAW: u16 = 0;
const HCI_MAX_DEV: usize = 16;
const HCI_MAX_FRAME_SIZE: usize = 1028;

// Controller flag bits.
const HCI_UP: u32 = 0;
const HCI_RAW: u32 = 6;

// HCI command opcodes used by the configurator.
const OGF_LINK_POLICY: u16 = 0x02;
const OGF_HOST_CTL: u16 = 0x03;
const OCF_WRITE_DEFAULT_LINK_POLICY: u16 = 0x000F;
const OCF_CHANGE_LOCAL_NAME: u16 = 0x0013;
const OCF_WRITE_PAGE_TIMEOUT: u16 = 0x0018;
const OCF_WRITE_CLASS_OF_DEV: u16 = 0x0024;
const LOCAL_NAME_LEN: usize = 248;

// _IOW('H', nr, int) / _IOR('H', nr, int) as the kernel headers define
// them for the HCI ioctl family.
const fn hci_iow(nr: libc::c_ulong) -> libc::c_ulong {
    (1 << 30) | ((std::mem::size_of::<libc::c_int>() as libc::c_ulong) << 16) | (b'H' as libc::c_ulong) << 8 | nr
}
const fn hci_ior(nr: libc::c_ulong) -> libc::c_ulong {
    (2 << 30) | ((std::mem::size_of::<libc::c_int>() as libc::c_ulong) << 16) | (b'H' as libc::c_ulong) << 8 | nr
}

const HCIDEVUP: libc::c_ulong = hci_iow(201);
const HCIDEVDOWN: libc::c_ulong = hci_iow(202);
const HCIGETDEVLIST: libc::c_ulong = hci_ior(210);
const HCIGETDEVINFO: libc::c_ulong = hci_ior(211);
const HCISETLINKPOL: libc::c_ulong = hci_iow(225);
const HCISETLINKMODE: libc::c_ulong = hci_iow(226);

#[repr(C)]
struct SockaddrHci {
    hci_family: libc::sa_family_t,
    hci_dev: u16,
    hci_channel: u16,
}

#[repr(C)]
struct HciEventFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct HciDevReq {
    dev_id: u16,
    dev_opt: u32,
}

#[repr(C)]
struct HciDevListReq {
    dev_num: u16,
    dev_req: [HciDevReq; HCI_MAX_DEV],
}

// Kernel ABI structs; most fields exist only to match the C layout.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct HciDevStats {
    err_rx: u32,
    err_tx: u32,
    cmd_tx: u32,
    evt_rx: u32,
    acl_tx: u32,
    acl_rx: u32,
    sco_tx: u32,
    sco_rx: u32,
    byte_rx: u32,
    byte_tx: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct HciDevInfoRaw {
    dev_id: u16,
    name: [u8; 8],
    bdaddr: [u8; 6],
    flags: u32,
    dev_type: u8,
    features: [u8; 8],
    pkt_type: u32,
    link_policy: u32,
    link_mode: u32,
    acl_mtu: u16,
    acl_pkts: u16,
    sco_mtu: u16,
    sco_pkts: u16,
    stat: HciDevStats,
}

/// Owned raw HCI socket, closed on drop.
struct HciSocket(RawFd);

impl HciSocket {
    fn open() -> Result<Self, ControlError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_BLUETOOTH,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                BTPROTO_HCI,
            )
        };
        if fd < 0 {
            return Err(ControlError::Socket {
                op: "socket",
                source: io::Error::last_os_error(),
            });
        }
        Ok(HciSocket(fd))
    }

    fn bind(&self, dev: u16) -> Result<(), ControlError> {
        let addr = SockaddrHci {
            hci_family: libc::AF_BLUETOOTH as libc::sa_family_t,
            hci_dev: dev,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let rc = unsafe {
            libc::bind(
                self.0,
                &addr as *const SockaddrHci as *const libc::sockaddr,
                std::mem::size_of::<SockaddrHci>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(ControlError::Socket {
                op: "bind",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn set_event_filter(&self) -> Result<(), ControlError> {
        let mut filter = HciEventFilter {
            type_mask: 0,
            event_mask: [0; 2],
            opcode: 0,
        };
        filter.type_mask |= 1 << super::event::EVENT_PKT;
        // The filter's event mask is 64 bits wide; event codes wrap at 63.
        let evt = (super::event::EVT_STACK_INTERNAL & 63) as usize;
        filter.event_mask[evt >> 5] |= 1 << (evt & 31);

        let rc = unsafe {
            libc::setsockopt(
                self.0,
                SOL_HCI,
                HCI_FILTER,
                &filter as *const HciEventFilter as *const libc::c_void,
                std::mem::size_of::<HciEventFilter>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(ControlError::Socket {
                op: "setsockopt(HCI_FILTER)",
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Drop for HciSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// The production driver.
pub struct RawHciDriver;

impl RawHciDriver {
    pub fn new() -> Self {
        RawHciDriver
    }

    fn read_dev_info(sock: &HciSocket, dev_id: u16) -> Result<DeviceInfo, ControlError> {
        let mut raw: HciDevInfoRaw = unsafe { std::mem::zeroed() };
        raw.dev_id = dev_id;
        let rc = unsafe {
            libc::ioctl(sock.0, HCIGETDEVINFO, &mut raw as *mut HciDevInfoRaw)
        };
        if rc < 0 {
            let source = io::Error::last_os_error();
            if source.raw_os_error() == Some(libc::ENODEV) {
                return Err(ControlError::NoSuchDevice(dev_id));
            }
            return Err(ControlError::Device {
                op: "HCIGETDEVINFO",
                dev_id,
                source,
            });
        }
        Ok(DeviceInfo {
            dev_id,
            address: BdAddr::from_le_bytes(raw.bdaddr),
            up: raw.flags & (1 << HCI_UP) != 0,
            raw: raw.flags & (1 << HCI_RAW) != 0,
        })
    }
}

impl Default for RawHciDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HciDriver for RawHciDriver {
    fn start_monitor(&self) -> Result<mpsc::Receiver<Vec<u8>>, ControlError> {
        let sock = HciSocket::open()?;
        sock.set_event_filter()?;
        sock.bind(HCI_DEV_NONE)?;

        let (tx, rx) = mpsc::channel(64);
        std::thread::Builder::new()
            .name("hci-monitor".into())
            .spawn(move || {
                let mut buf = [0u8; HCI_MAX_FRAME_SIZE];
                loop {
                    let n = unsafe {
                        libc::read(sock.0, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
                    };
                    if n < 0 {
                        let err = io::Error::last_os_error();
                        if err.raw_os_error() == Some(libc::EINTR) {
                            continue;
                        }
                        error!(error = %err, "read from monitor socket failed");
                        break;
                    }
                    if n == 0 {
                        debug!("monitor socket closed by kernel");
                        break;
                    }
                    if tx.blocking_send(buf[..n as usize].to_vec()).is_err() {
                        // Host loop is gone; stop reading.
                        break;
                    }
                }
            })
            .map_err(|e| ControlError::Socket {
                op: "spawn monitor thread",
                source: e,
            })?;

        Ok(rx)
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, ControlError> {
        let sock = HciSocket::open()?;
        let mut list: HciDevListReq = unsafe { std::mem::zeroed() };
        list.dev_num = HCI_MAX_DEV as u16;

        let rc = unsafe {
            libc::ioctl(sock.0, HCIGETDEVLIST, &mut list as *mut HciDevListReq)
        };
        if rc < 0 {
            return Err(ControlError::Socket {
                op: "HCIGETDEVLIST",
                source: io::Error::last_os_error(),
            });
        }

        let count = (list.dev_num as usize).min(HCI_MAX_DEV);
        let mut devices = Vec::with_capacity(count);
        for req in &list.dev_req[..count] {
            match Self::read_dev_info(&sock, req.dev_id) {
                Ok(info) => devices.push(info),
                // A controller can vanish between the list and info calls.
                Err(e) => warn!(dev_id = req.dev_id, error = %e, "skipping controller"),
            }
        }
        Ok(devices)
    }

    fn device_info(&self, dev_id: u16) -> Result<DeviceInfo, ControlError> {
        let sock = HciSocket::open()?;
        Self::read_dev_info(&sock, dev_id)
    }

    fn open_device(&self, dev_id: u16) -> Result<Box<dyn DeviceControl>, ControlError> {
        let sock = HciSocket::open()?;
        sock.bind(dev_id)?;
        Ok(Box::new(RawDeviceControl { sock, dev_id }))
    }
}

struct RawDeviceControl {
    sock: HciSocket,
    dev_id: u16,
}

impl RawDeviceControl {
    fn dev_ioctl(&self, op: &'static str, request: libc::c_ulong, opt: u32) -> Result<(), ControlError> {
        let mut req = HciDevReq {
            dev_id: self.dev_id,
            dev_opt: opt,
        };
        let rc = unsafe { libc::ioctl(self.sock.0, request, &mut req as *mut HciDevReq) };
        if rc < 0 {
            return Err(ControlError::Device {
                op,
                dev_id: self.dev_id,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn send_cmd(
        &mut self,
        op: &'static str,
        ogf: u16,
        ocf: u16,
        params: &[u8],
    ) -> Result<(), ControlError> {
        let opcode = (ogf << 10) | ocf;
        let mut packet = Vec::with_capacity(4 + params.len());
        packet.push(0x01); // command packet
        packet.extend_from_slice(&opcode.to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(params);

        let n = unsafe {
            libc::write(
                self.sock.0,
                packet.as_ptr() as *const libc::c_void,
                packet.len(),
            )
        };
        if n != packet.len() as isize {
            return Err(ControlError::Device {
                op,
                dev_id: self.dev_id,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl DeviceControl for RawDeviceControl {
    fn set_link_mode(&mut self, mode: u32) -> Result<(), ControlError> {
        self.dev_ioctl("HCISETLINKMODE", HCISETLINKMODE, mode)
    }

    fn set_link_policy(&mut self, policy: u32) -> Result<(), ControlError> {
        self.dev_ioctl("HCISETLINKPOL", HCISETLINKPOL, policy)
    }

    fn bring_up(&mut self) -> Result<(), ControlError> {
        let rc = unsafe { libc::ioctl(self.sock.0, HCIDEVUP, self.dev_id as libc::c_ulong) };
        if rc < 0 {
            let source = io::Error::last_os_error();
            if source.raw_os_error() == Some(libc::EALREADY) {
                return Err(ControlError::AlreadyUp(self.dev_id));
            }
            return Err(ControlError::Device {
                op: "HCIDEVUP",
                dev_id: self.dev_id,
                source,
            });
        }
        Ok(())
    }

    fn bring_down(&mut self) -> Result<(), ControlError> {
        let rc = unsafe { libc::ioctl(self.sock.0, HCIDEVDOWN, self.dev_id as libc::c_ulong) };
        if rc < 0 {
            return Err(ControlError::Device {
                op: "HCIDEVDOWN",
                dev_id: self.dev_id,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    fn write_local_name(&mut self, name: &str) -> Result<(), ControlError> {
        let mut params = [0u8; LOCAL_NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(LOCAL_NAME_LEN - 1);
        params[..len].copy_from_slice(&bytes[..len]);
        self.send_cmd(
            "change local name",
            OGF_HOST_CTL,
            OCF_CHANGE_LOCAL_NAME,
            &params,
        )
    }

    fn write_class(&mut self, class: [u8; 3]) -> Result<(), ControlError> {
        self.send_cmd(
            "write class of device",
            OGF_HOST_CTL,
            OCF_WRITE_CLASS_OF_DEV,
            &class,
        )
    }

    fn write_page_timeout(&mut self, timeout: u16) -> Result<(), ControlError> {
        self.send_cmd(
            "write page timeout",
            OGF_HOST_CTL,
            OCF_WRITE_PAGE_TIMEOUT,
            &timeout.to_le_bytes(),
        )
    }

    fn write_default_link_policy(&mut self, policy: u16) -> Result<(), ControlError> {
        self.send_cmd(
            "write default link policy",
            OGF_LINK_POLICY,
            OCF_WRITE_DEFAULT_LINK_POLICY,
            &policy.to_le_bytes(),
        )
    }
}
