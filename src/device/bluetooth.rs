//! # Bluetooth L2CAP Transport
//!
//! Connects to a paired controller directly over the two HIDP channels:
//!
//! - PSM 0x11 (control): output reports, prefixed with a HIDP SET_REPORT header
//! - PSM 0x13 (interrupt): input reports, 3 bytes of framing before the payload
//!
//! The controller only starts sending full reports after it has received
//! an output report, so connecting sends an initial white LED frame.

use std::fs::File;
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::{debug, info};

use super::transport::Transport;
use super::{DeviceInfo, Ds4Device};
use crate::error::{DeviceError, ReportError};
use crate::report::decoder::decode_framed;
use crate::report::protocol::*;

/// HIDP control channel PSM
pub const L2CAP_PSM_HIDP_CTRL: u16 = 0x11;

/// HIDP interrupt channel PSM
pub const L2CAP_PSM_HIDP_INTR: u16 = 0x13;

/// Bluetooth protocol number for L2CAP sockets
const BTPROTO_L2CAP: libc::c_int = 0;

/// `struct sockaddr_l2` from `<bluetooth/l2cap.h>`
#[repr(C)]
struct SockaddrL2 {
    l2_family: libc::sa_family_t,
    l2_psm: u16,
    l2_bdaddr: [u8; 6],
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

/// Parse `XX:XX:XX:XX:XX:XX` into the little-endian `bdaddr_t` byte order
///
/// # Errors
///
/// Returns `InvalidAddress` unless the string is six colon separated hex octets.
pub fn parse_address(address: &str) -> Result<[u8; 6], DeviceError> {
    let invalid = || DeviceError::InvalidAddress(address.to_string());

    let octets: Vec<&str> = address.split(':').collect();
    if octets.len() != 6 {
        return Err(invalid());
    }

    let mut bdaddr = [0u8; 6];
    for (i, octet) in octets.iter().enumerate() {
        if octet.len() != 2 {
            return Err(invalid());
        }
        bdaddr[5 - i] = u8::from_str_radix(octet, 16).map_err(|_| invalid())?;
    }

    Ok(bdaddr)
}

/// Open a connected L2CAP SEQPACKET socket to `bdaddr` on `psm`
fn l2cap_connect(bdaddr: [u8; 6], psm: u16) -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call, the returned fd is checked before use
    let fd = unsafe {
        libc::socket(
            libc::AF_BLUETOOTH,
            libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
            BTPROTO_L2CAP,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly created socket owned by nobody else
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let addr = SockaddrL2 {
        l2_family: libc::AF_BLUETOOTH as libc::sa_family_t,
        l2_psm: psm.to_le(),
        l2_bdaddr: bdaddr,
        l2_cid: 0,
        l2_bdaddr_type: 0,
    };

    // SAFETY: addr is a valid sockaddr_l2 and the length matches its size
    let ret = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &addr as *const SockaddrL2 as *const libc::sockaddr,
            mem::size_of::<SockaddrL2>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(fd)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on an fd we own
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Controller connected over raw L2CAP sockets
pub struct BluetoothTransport {
    ctrl: Option<File>,
    intr: Option<File>,
    intr_fd: RawFd,
    buf: [u8; BT_REPORT_SIZE],
}

impl BluetoothTransport {
    /// Connect both HIDP channels and switch the controller to full reports
    ///
    /// # Arguments
    ///
    /// * `address` - Controller address, `XX:XX:XX:XX:XX:XX`
    ///
    /// # Errors
    ///
    /// - `InvalidAddress`: malformed address
    /// - `Connect`: either channel refused or timed out
    /// - `Io`: the initial output report could not be sent
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ds4_bridge::device::bluetooth::BluetoothTransport;
    ///
    /// let device = BluetoothTransport::connect("1C:66:6D:00:00:01")?;
    /// println!("Connected to {}", device.name());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn connect(address: &str) -> Result<Ds4Device, DeviceError> {
        let address = address.to_ascii_uppercase();
        let bdaddr = parse_address(&address)?;
        let connect_err = |source| DeviceError::Connect {
            address: address.clone(),
            source,
        };

        debug!("Connecting to {} control channel", address);
        let ctrl = l2cap_connect(bdaddr, L2CAP_PSM_HIDP_CTRL).map_err(connect_err)?;

        debug!("Connecting to {} interrupt channel", address);
        let intr = l2cap_connect(bdaddr, L2CAP_PSM_HIDP_INTR).map_err(connect_err)?;
        set_nonblocking(intr.as_raw_fd()).map_err(connect_err)?;

        let intr_fd = intr.as_raw_fd();
        let transport = BluetoothTransport {
            ctrl: Some(File::from(ctrl)),
            intr: Some(File::from(intr)),
            intr_fd,
            buf: [0u8; BT_REPORT_SIZE],
        };

        let mut device = Ds4Device::new(
            DeviceInfo::new(address, TransportKind::Bluetooth),
            Box::new(transport),
        );
        device.set_led(255, 255, 255)?;
        info!("Opened {}", device.name());

        Ok(device)
    }
}

impl Transport for BluetoothTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Bluetooth
    }

    fn read_report(&mut self) -> Result<Report, ReportError> {
        let Some(intr) = self.intr.as_mut() else {
            return Err(ReportError::Disconnected);
        };

        match intr.read(&mut self.buf) {
            Ok(len) => decode_framed(&self.buf[..len], &Framing::L2CAP),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(ReportError::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(ReportError::WouldBlock),
            Err(e) => {
                debug!("Interrupt channel read failed: {}", e);
                Err(ReportError::Disconnected)
            }
        }
    }

    fn write_report(&mut self, report: &[u8]) -> Result<(), DeviceError> {
        let ctrl = self
            .ctrl
            .as_mut()
            .ok_or_else(|| DeviceError::Io(io::ErrorKind::NotConnected.into()))?;

        let mut packet = Vec::with_capacity(report.len() + 1);
        packet.push(HIDP_SET_REPORT_OUTPUT);
        packet.extend_from_slice(report);
        ctrl.write_all(&packet)?;
        Ok(())
    }

    fn pollable_fd(&self) -> RawFd {
        self.intr_fd
    }

    fn close(&mut self) {
        self.intr.take();
        self.ctrl.take();
    }
}
