//! Trait abstraction for controller connections to enable testing

use std::os::fd::RawFd;

use crate::error::{DeviceError, ReportError};
use crate::report::protocol::{Report, TransportKind};

/// One physical connection to a controller
///
/// Reads are non-blocking; [`ReportError::WouldBlock`] means the caller should
/// wait for [`Transport::pollable_fd`] to become readable.
pub trait Transport: Send {
    /// Connection kind, selects the output report layout
    fn kind(&self) -> TransportKind;

    /// Read and decode one input report
    fn read_report(&mut self) -> Result<Report, ReportError>;

    /// Send a complete output report (starting with its report id)
    fn write_report(&mut self, report: &[u8]) -> Result<(), DeviceError>;

    /// File descriptor that becomes readable when a report is available
    fn pollable_fd(&self) -> RawFd;

    /// LED color to restore before closing, if the transport has one
    fn restore_led(&self) -> Option<(u8, u8, u8)> {
        None
    }

    /// Release the connection and any exclusive grab; safe to call twice
    fn close(&mut self);
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::os::fd::AsRawFd;
    use std::sync::{Arc, Mutex};

    /// Mock transport for testing
    ///
    /// Reads pop from a queue and fall back to `WouldBlock`; writes are recorded.
    /// Owns a real pipe so the fd can be registered with the event loop.
    pub struct MockTransport {
        pub kind: TransportKind,
        pub reads: Arc<Mutex<VecDeque<Result<Report, ReportError>>>>,
        pub written_data: Arc<Mutex<Vec<Vec<u8>>>>,
        pub close_count: Arc<Mutex<usize>>,
        pub restore: Option<(u8, u8, u8)>,
        pipe: (mio::unix::pipe::Sender, mio::unix::pipe::Receiver),
    }

    impl MockTransport {
        pub fn new(kind: TransportKind) -> Self {
            Self {
                kind,
                reads: Arc::new(Mutex::new(VecDeque::new())),
                written_data: Arc::new(Mutex::new(Vec::new())),
                close_count: Arc::new(Mutex::new(0)),
                restore: None,
                pipe: mio::unix::pipe::new().unwrap(),
            }
        }

        pub fn push_read(&self, read: Result<Report, ReportError>) {
            self.reads.lock().unwrap().push_back(read);
        }

        pub fn get_written_data(&self) -> Vec<Vec<u8>> {
            self.written_data.lock().unwrap().clone()
        }

        pub fn closes(&self) -> usize {
            *self.close_count.lock().unwrap()
        }
    }

    impl Transport for MockTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn read_report(&mut self) -> Result<Report, ReportError> {
            self.reads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ReportError::WouldBlock))
        }

        fn write_report(&mut self, report: &[u8]) -> Result<(), DeviceError> {
            self.written_data.lock().unwrap().push(report.to_vec());
            Ok(())
        }

        fn pollable_fd(&self) -> RawFd {
            self.pipe.1.as_raw_fd()
        }

        fn restore_led(&self) -> Option<(u8, u8, u8)> {
            self.restore
        }

        fn close(&mut self) {
            *self.close_count.lock().unwrap() += 1;
        }
    }
}
