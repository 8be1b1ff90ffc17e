//! # Controller Device Module
//!
//! Physical DualShock 4 connections and the output state they own.
//!
//! ## Transports
//!
//! - [`bluetooth`]: raw L2CAP control and interrupt channels
//! - [`hidraw`]: kernel hidraw node (USB or Bluetooth), with an exclusive
//!   grab on the matching evdev node
//!
//! ## Output state
//!
//! [`Ds4Device`] keeps the current [`ControlFrame`]. Every mutation is
//! encoded and written immediately as a full output report.

pub mod bluetooth;
pub mod discovery;
pub mod hidraw;
pub mod transport;

use std::os::fd::RawFd;
use tracing::debug;

use crate::error::{DeviceError, ReportError};
use crate::report::encoder::encode_control;
use crate::report::protocol::{ControlFrame, Report, TransportKind};
pub use transport::Transport;

/// Identity of a connected controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Bluetooth address, used to detect duplicate connections
    pub address: String,

    /// Human readable name for logs
    pub name: String,

    pub kind: TransportKind,
}

impl DeviceInfo {
    pub fn new(address: impl Into<String>, kind: TransportKind) -> Self {
        let address = address.into();
        let name = match kind {
            TransportKind::Bluetooth => format!("Bluetooth Controller ({})", address),
            TransportKind::Usb => format!("USB Controller ({})", address),
        };
        Self { address, name, kind }
    }
}

/// A connected controller
pub struct Ds4Device {
    info: DeviceInfo,
    transport: Box<dyn Transport>,
    frame: ControlFrame,
    flashing: bool,
    closed: bool,
}

impl Ds4Device {
    pub fn new(info: DeviceInfo, transport: Box<dyn Transport>) -> Self {
        Self {
            info,
            transport,
            frame: ControlFrame::default(),
            flashing: false,
            closed: false,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn address(&self) -> &str {
        &self.info.address
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn kind(&self) -> TransportKind {
        self.info.kind
    }

    /// Current output state
    pub fn frame(&self) -> &ControlFrame {
        &self.frame
    }

    pub fn is_flashing(&self) -> bool {
        self.flashing
    }

    pub fn pollable_fd(&self) -> RawFd {
        self.transport.pollable_fd()
    }

    /// Read one report without blocking
    pub fn read_report(&mut self) -> Result<Report, ReportError> {
        self.transport.read_report()
    }

    /// Encode and send the current control frame
    pub fn control(&mut self) -> Result<(), DeviceError> {
        let report = encode_control(&self.frame, self.info.kind);
        self.transport.write_report(&report)
    }

    /// Replace the whole control frame and send it
    pub fn write_control(&mut self, frame: ControlFrame) -> Result<(), DeviceError> {
        self.frame = frame;
        self.control()
    }

    /// Set the light bar color
    pub fn set_led(&mut self, red: u8, green: u8, blue: u8) -> Result<(), DeviceError> {
        self.frame.led_red = red;
        self.frame.led_green = green;
        self.frame.led_blue = blue;
        self.control()
    }

    /// Set both rumble motors
    pub fn rumble(&mut self, strong: u8, weak: u8) -> Result<(), DeviceError> {
        self.frame.rumble_strong = strong;
        self.frame.rumble_weak = weak;
        self.control()
    }

    /// Start flashing the light bar; no-op while already flashing
    pub fn start_led_flash(&mut self, on: u8, off: u8) -> Result<(), DeviceError> {
        if self.flashing {
            return Ok(());
        }

        self.frame.flash_on = on;
        self.frame.flash_off = off;
        self.flashing = true;
        self.control()
    }

    /// Stop flashing the light bar; no-op unless flashing
    pub fn stop_led_flash(&mut self) -> Result<(), DeviceError> {
        if !self.flashing {
            return Ok(());
        }

        self.frame.flash_on = 0;
        self.frame.flash_off = 0;
        self.flashing = false;

        // The controller sometimes misses the first stop request
        self.control()?;
        self.control()
    }

    /// Close the connection, restoring the transport's idle LED first
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        if let Some((r, g, b)) = self.transport.restore_led() {
            if let Err(e) = self.set_led(r, g, b) {
                debug!("Failed to restore LED on {}: {}", self.info.name, e);
            }
        }

        self.transport.close();
        self.closed = true;
    }
}

impl Drop for Ds4Device {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Ds4Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ds4Device")
            .field("info", &self.info)
            .field("frame", &self.frame)
            .field("flashing", &self.flashing)
            .finish()
    }
}
