//! Warns when the Bluetooth report rate drops

use std::time::Duration;
use tracing::warn;

use super::{Action, ActionContext, REPORT_EVENTS};
use crate::device::DeviceInfo;
use crate::error::ActionError;
use crate::event_loop::{EventKind, TimerControl, TimerHandle};
use crate::report::protocol::{Report, TransportKind};

pub const CHECK_INTERVAL: Duration = Duration::from_millis(2500);
pub const WARNING_RESET: Duration = Duration::from_secs(60);

/// Below this rate a 60 FPS game misses reports between frames
pub const MIN_REPORTS_PER_SEC: u32 = 60;

#[derive(Default)]
pub struct BtSignalAction {
    check: Option<TimerHandle>,
    reset: Option<TimerHandle>,
    reports: u32,
    warned: bool,
}

impl BtSignalAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report rate since the last check and whether a warning is due
    fn check_signal(&mut self) -> (u32, bool) {
        let rps = (f64::from(self.reports) / CHECK_INTERVAL.as_secs_f64()) as u32;
        self.reports = 0;

        let warn = !self.warned && rps < MIN_REPORTS_PER_SEC;
        if warn {
            self.warned = true;
        }
        (rps, warn)
    }
}

impl Action for BtSignalAction {
    fn name(&self) -> &'static str {
        "btsignal"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        REPORT_EVENTS
    }

    fn init(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.check = Some(ctx.create_timer(CHECK_INTERVAL)?);
        self.reset = Some(ctx.create_timer(WARNING_RESET)?);
        Ok(())
    }

    fn setup(&mut self, device: &DeviceInfo, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.reports = 0;
        self.warned = false;

        match device.kind {
            TransportKind::Bluetooth => self.enable(ctx),
            TransportKind::Usb => self.disable(ctx),
        }
    }

    fn enable(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if let Some(check) = self.check {
            ctx.start_timer(check)?;
        }
        Ok(())
    }

    fn disable(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        for timer in [self.check, self.reset].into_iter().flatten() {
            ctx.stop_timer(timer)?;
        }
        Ok(())
    }

    fn handle_report(&mut self, _report: &Report, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.reports += 1;
        Ok(())
    }

    fn on_timer(
        &mut self,
        timer: TimerHandle,
        _report: &Report,
        ctx: &mut ActionContext<'_>,
    ) -> Result<TimerControl, ActionError> {
        if Some(timer) == self.reset {
            self.warned = false;
            return Ok(TimerControl::Stop);
        }

        let (rps, due) = self.check_signal();
        if due {
            warn!("Signal strength is low ({} reports/s)", rps);
            if let Some(reset) = self.reset {
                ctx.start_timer(reset)?;
            }
        }
        Ok(TimerControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::Harness;

    fn setup(kind: TransportKind) -> (BtSignalAction, Harness) {
        let mut action = BtSignalAction::new();
        let mut harness = Harness::new();
        action.init(&mut harness.ctx()).unwrap();
        action
            .setup(&DeviceInfo::new("00:11:22:33:44:55", kind), &mut harness.ctx())
            .unwrap();
        (action, harness)
    }

    #[test]
    fn test_only_armed_for_bluetooth() {
        let (action, harness) = setup(TransportKind::Bluetooth);
        assert!(harness.event_loop.is_timer_armed(action.check.unwrap()));

        let (action, harness) = setup(TransportKind::Usb);
        assert!(!harness.event_loop.is_timer_armed(action.check.unwrap()));
    }

    #[test]
    fn test_low_rate_warns_once_until_reset() {
        let (mut action, mut harness) = setup(TransportKind::Bluetooth);
        let (check, reset) = (action.check.unwrap(), action.reset.unwrap());
        let report = Report::default();

        // 100 reports in 2.5 s is 40 reports/s
        for _ in 0..100 {
            action.handle_report(&report, &mut harness.ctx()).unwrap();
        }
        action.on_timer(check, &report, &mut harness.ctx()).unwrap();
        assert!(action.warned);
        assert_eq!(action.reports, 0);
        assert!(harness.event_loop.is_timer_armed(reset));

        assert_eq!(action.check_signal(), (0, false), "already warned");

        let control = action.on_timer(reset, &report, &mut harness.ctx()).unwrap();
        assert_eq!(control, TimerControl::Stop);
        assert!(!action.warned);
    }

    #[test]
    fn test_good_rate_does_not_warn() {
        let mut action = BtSignalAction::new();
        action.reports = 400;
        assert_eq!(action.check_signal(), (160, false));
        assert!(!action.warned);
    }
}
