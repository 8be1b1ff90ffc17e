//! Periodic timers backed by `timerfd`, so they share the loop's readiness poll

use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::time::Duration;

use super::SubscriberId;

/// Returned by timer callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerControl {
    /// Keep firing at the same interval
    Continue,

    /// Disarm the timer until it is started again
    Stop,
}

/// Identifies a timer within one event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(super) usize);

pub(super) struct Timer {
    fd: TimerFd,
    interval: Duration,
    owner: SubscriberId,
    armed: bool,
}

impl Timer {
    pub(super) fn new(interval: Duration, owner: SubscriberId) -> io::Result<Self> {
        let fd = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )?;

        Ok(Self {
            fd,
            interval,
            owner,
            armed: false,
        })
    }

    pub(super) fn start(&mut self) -> io::Result<()> {
        self.fd.set(
            Expiration::Interval(TimeSpec::from_duration(self.interval)),
            TimerSetTimeFlags::empty(),
        )?;
        self.armed = true;
        Ok(())
    }

    pub(super) fn stop(&mut self) -> io::Result<()> {
        if self.armed {
            self.fd.unset()?;
            self.armed = false;
        }
        Ok(())
    }

    /// Consume pending expirations; false if nothing was pending
    pub(super) fn acknowledge(&self) -> bool {
        self.fd.wait().is_ok()
    }

    pub(super) fn is_armed(&self) -> bool {
        self.armed
    }

    pub(super) fn owner(&self) -> SubscriberId {
        self.owner
    }

    pub(super) fn raw_fd(&self) -> RawFd {
        self.fd.as_fd().as_raw_fd()
    }
}
