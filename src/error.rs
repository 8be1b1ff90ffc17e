//! # Error Types
//!
//! Error taxonomy for DS4 Bridge using `thiserror`.
//!
//! - [`DeviceError`]: a connection attempt or device I/O failed
//! - [`ReportError`]: a read produced no usable report
//! - [`ActionError`]: an action callback failed, the session keeps running
//! - [`FatalSessionError`]: the session cannot continue and the process must exit

use thiserror::Error;

/// Connection, setup or virtual device failure
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Socket connection to a Bluetooth address failed
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// A device node could not be opened or grabbed
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// HID feature report ioctl failed
    #[error("Failed to read feature report 0x{report_id:02x}: {source}")]
    FeatureReport {
        report_id: u8,
        #[source]
        source: nix::Error,
    },

    /// Malformed `XX:XX:XX:XX:XX:XX` address
    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    /// Unknown joystick layout name
    #[error("Unknown device mapping: {0}")]
    UnknownMapping(String),

    /// I/O errors on an established connection
    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a read did not produce a [`Report`](crate::report::protocol::Report)
///
/// Only [`ReportError::Disconnected`] ends a device connection; everything else
/// is skipped by the session.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReportError {
    /// Fewer bytes than the transport's report size
    #[error("Short report: got {len} bytes, expected {expected}")]
    Short { len: usize, expected: usize },

    /// Report id byte did not match the transport's input report id
    #[error("Unexpected report id 0x{found:02x}, expected 0x{expected:02x}")]
    BadId { found: u8, expected: u8 },

    /// The peer closed the connection (zero-length read)
    #[error("Device disconnected")]
    Disconnected,

    /// No complete report available yet
    #[error("No report available")]
    WouldBlock,
}

impl ReportError {
    /// True for malformed reports that should be logged and discarded
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, ReportError::Short { .. } | ReportError::BadId { .. })
    }
}

/// Failure inside an action callback
#[derive(Debug, Error)]
pub enum ActionError {
    /// Binding named a verb nobody handles
    #[error("Invalid action type: {0}")]
    UnknownVerb(String),

    /// Binding verb is missing a required argument
    #[error("Missing argument for {0}")]
    MissingArgument(&'static str),

    /// Binding command string was empty after substitution
    #[error("Empty binding command")]
    EmptyCommand,

    /// Binding command has unbalanced quotes
    #[error("Malformed binding command: {0}")]
    BadCommand(String),

    /// External process could not be spawned
    #[error("Failed to execute process: {0}")]
    Spawn(#[source] std::io::Error),

    /// Writing to the device or a virtual output failed
    #[error("Output error: {0}")]
    Output(#[from] DeviceError),

    /// Arming or disarming a timer failed
    #[error("Timer error: {0}")]
    Timer(#[source] std::io::Error),

    /// Unrecoverable, escalated to the session
    #[error(transparent)]
    Fatal(#[from] FatalSessionError),
}

/// Errors that stop a session and, through the supervisor, the whole process
#[derive(Debug, Error)]
pub enum FatalSessionError {
    /// The virtual joystick or mouse could not be created
    #[error("Failed to create input device: {0}")]
    VirtualDevice(#[source] DeviceError),

    /// The readiness loop itself failed
    #[error("Event loop failure: {0}")]
    EventLoop(#[source] std::io::Error),

    /// Observed by the supervisor on a session's error flag
    #[error("Controller {index} stopped after a fatal error")]
    Flagged { index: usize },
}

/// Main error type for DS4 Bridge
#[derive(Debug, Error)]
pub enum Ds4Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Device errors
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Fatal session errors
    #[error(transparent)]
    Fatal(#[from] FatalSessionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for DS4 Bridge
pub type Result<T> = std::result::Result<T, Ds4Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_error_invalid_classification() {
        assert!(ReportError::Short { len: 10, expected: 64 }.is_invalid());
        assert!(ReportError::BadId { found: 0x02, expected: 0x01 }.is_invalid());
        assert!(!ReportError::Disconnected.is_invalid());
        assert!(!ReportError::WouldBlock.is_invalid());
    }

    #[test]
    fn test_error_messages() {
        let err = ReportError::BadId { found: 0x02, expected: 0x11 };
        assert_eq!(err.to_string(), "Unexpected report id 0x02, expected 0x11");

        let err = ActionError::UnknownVerb("launch".to_string());
        assert_eq!(err.to_string(), "Invalid action type: launch");

        let err = FatalSessionError::Flagged { index: 2 };
        assert_eq!(err.to_string(), "Controller 2 stopped after a fatal error");
    }
}
