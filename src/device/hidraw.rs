//! # hidraw Transport
//!
//! Controllers handled by the kernel HID stack, over USB or Bluetooth.
//!
//! The kernel also exposes the controller as an evdev joystick. That node is
//! grabbed exclusively while connected so applications only see the virtual
//! devices created by this driver.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::transport::Transport;
use super::{DeviceInfo, Ds4Device};
use crate::error::{DeviceError, ReportError};
use crate::report::decoder::decode_framed;
use crate::report::protocol::*;

nix::ioctl_readwrite_buf!(hid_get_feature, b'H', 0x07, u8);

/// Calibration feature report; reading it switches the controller to full reports
pub const FEATURE_CALIBRATION: u8 = 0x02;

/// Controller Bluetooth address (USB only)
pub const FEATURE_MAC_ADDRESS: u8 = 0x81;

/// Pairing info: controller address and paired host address (USB only)
pub const FEATURE_PAIRING_INFO: u8 = 0x12;

/// LED color the controller shows while idle on hidraw
const IDLE_LED: (u8, u8, u8) = (0, 0, 1);

/// A hidraw node found by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidrawNode {
    /// `/dev/hidrawN`
    pub hidraw: PathBuf,

    /// `/dev/input/eventN` of the same HID device, if any
    pub event: Option<PathBuf>,

    pub kind: TransportKind,

    /// Controller address from `HID_UNIQ`, empty over USB
    pub uniq: Option<String>,
}

/// Format raw little-endian address bytes as `XX:XX:XX:XX:XX:XX`
pub fn format_address(bytes: &[u8]) -> String {
    bytes
        .iter()
        .rev()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Controller connected through a hidraw node
pub struct HidrawTransport {
    file: Option<File>,
    fd: RawFd,
    kind: TransportKind,
    framing: Framing,
    buf: Vec<u8>,
    input: Option<evdev::Device>,
}

impl HidrawTransport {
    /// Open a hidraw node, grab its evdev twin and enable full reports
    ///
    /// # Errors
    ///
    /// - `Open`: the hidraw or evdev node cannot be opened or grabbed
    /// - `FeatureReport`: the controller rejected a feature request
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ds4_bridge::device::hidraw::{HidrawNode, HidrawTransport};
    /// use ds4_bridge::report::protocol::TransportKind;
    ///
    /// let node = HidrawNode {
    ///     hidraw: "/dev/hidraw3".into(),
    ///     event: Some("/dev/input/event17".into()),
    ///     kind: TransportKind::Usb,
    ///     uniq: None,
    /// };
    /// let device = HidrawTransport::open(&node)?;
    /// println!("Connected to {}", device.name());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(node: &HidrawNode) -> Result<Ds4Device, DeviceError> {
        let open_err = |path: &PathBuf| {
            let path = path.display().to_string();
            move |source| DeviceError::Open { path, source }
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&node.hidraw)
            .map_err(open_err(&node.hidraw))?;

        let input = match &node.event {
            Some(event) => {
                let mut input = evdev::Device::open(event).map_err(open_err(event))?;
                input.grab().map_err(open_err(event))?;
                Some(input)
            }
            None => None,
        };

        let framing = match node.kind {
            TransportKind::Usb => Framing::USB,
            TransportKind::Bluetooth => Framing::HIDRAW_BLUETOOTH,
        };

        let transport = HidrawTransport {
            fd: file.as_raw_fd(),
            file: Some(file),
            kind: node.kind,
            framing,
            buf: vec![0u8; framing.size],
            input,
        };

        transport.read_feature_report(FEATURE_CALIBRATION, 37)?;

        let address = match node.kind {
            TransportKind::Usb => {
                let mac = transport.read_feature_report(FEATURE_MAC_ADDRESS, 6)?;
                match transport.read_feature_report(FEATURE_PAIRING_INFO, 15) {
                    Ok(pairing) => debug!("Paired to host {}", format_address(&pairing[10..16])),
                    Err(e) => debug!("No pairing info: {}", e),
                }
                format_address(&mac[1..7])
            }
            TransportKind::Bluetooth => node
                .uniq
                .clone()
                .unwrap_or_else(|| node.hidraw.display().to_string())
                .to_ascii_uppercase(),
        };

        let device = Ds4Device::new(DeviceInfo::new(address, node.kind), Box::new(transport));
        info!("Opened {} at {}", device.name(), node.hidraw.display());

        Ok(device)
    }

    /// Read a feature report via `HIDIOCGFEATURE`
    ///
    /// # Returns
    ///
    /// * `Vec<u8>` - `size + 1` bytes, the report id followed by the payload
    pub fn read_feature_report(&self, report_id: u8, size: usize) -> Result<Vec<u8>, DeviceError> {
        let mut buf = vec![0u8; size + 1];
        buf[0] = report_id;

        // SAFETY: buf is a live, correctly sized buffer for the ioctl
        unsafe { hid_get_feature(self.fd, &mut buf) }
            .map_err(|source| DeviceError::FeatureReport { report_id, source })?;

        Ok(buf)
    }
}

impl Transport for HidrawTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn read_report(&mut self) -> Result<Report, ReportError> {
        let Some(file) = self.file.as_mut() else {
            return Err(ReportError::Disconnected);
        };

        match file.read(&mut self.buf) {
            Ok(len) => decode_framed(&self.buf[..len], &self.framing),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(ReportError::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(ReportError::WouldBlock),
            Err(e) => {
                // ENODEV once the device is unplugged
                debug!("hidraw read failed: {}", e);
                Err(ReportError::Disconnected)
            }
        }
    }

    fn write_report(&mut self, report: &[u8]) -> Result<(), DeviceError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DeviceError::Io(io::ErrorKind::NotConnected.into()))?;
        file.write_all(report)?;
        Ok(())
    }

    fn pollable_fd(&self) -> RawFd {
        self.fd
    }

    fn restore_led(&self) -> Option<(u8, u8, u8)> {
        Some(IDLE_LED)
    }

    fn close(&mut self) {
        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.ungrab() {
                warn!("Failed to release input grab: {}", e);
            }
        }
        self.file.take();
    }
}
