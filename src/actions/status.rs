//! Logs USB, battery and audio state changes

use std::time::Duration;
use tracing::info;

use super::{Action, ActionContext};
use crate::device::DeviceInfo;
use crate::error::ActionError;
use crate::event_loop::{TimerControl, TimerHandle};
use crate::report::protocol::{Report, BATTERY_MAX, BATTERY_MAX_CHARGING};

pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Battery charge in percent; the level runs higher while on USB power
pub fn battery_percentage(report: &Report) -> u32 {
    let max = if report.plug_usb {
        BATTERY_MAX_CHARGING
    } else {
        BATTERY_MAX
    };
    100 * u32::from(report.battery) / u32::from(max)
}

/// Human readable lines for what changed since `previous`
///
/// Without a previous report the battery line is always produced.
pub fn status_changes(previous: Option<&Report>, report: &Report) -> Vec<String> {
    let mut lines = Vec::new();
    let mut show_battery = previous.is_none();
    let previous = previous.unwrap_or(report);

    if previous.plug_usb != report.plug_usb {
        let state = if report.plug_usb { "Connected" } else { "Disconnected" };
        lines.push(format!("USB: {}", state));
        show_battery = true;
    }

    if previous.battery != report.battery || show_battery {
        let battery = battery_percentage(report);
        if battery < 100 {
            lines.push(format!("Battery: {}%", battery));
        } else {
            lines.push("Battery: Fully charged".to_string());
        }
    }

    if previous.plug_audio != report.plug_audio || previous.plug_mic != report.plug_mic {
        let audio = match (report.plug_audio, report.plug_mic) {
            (true, true) => "Headset",
            (true, false) => "Headphones",
            (false, true) => "Mic",
            (false, false) => "Speaker",
        };
        lines.push(format!("Audio: {}", audio));
    }

    lines
}

#[derive(Default)]
pub struct StatusAction {
    timer: Option<TimerHandle>,
    previous: Option<Report>,
}

impl StatusAction {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Action for StatusAction {
    fn name(&self) -> &'static str {
        "status"
    }

    fn init(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.timer = Some(ctx.create_timer(STATUS_INTERVAL)?);
        Ok(())
    }

    fn setup(&mut self, _device: &DeviceInfo, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.previous = None;
        if let Some(timer) = self.timer {
            ctx.start_timer(timer)?;
        }
        Ok(())
    }

    fn disable(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if let Some(timer) = self.timer {
            ctx.stop_timer(timer)?;
        }
        Ok(())
    }

    fn on_timer(
        &mut self,
        _timer: TimerHandle,
        report: &Report,
        _ctx: &mut ActionContext<'_>,
    ) -> Result<TimerControl, ActionError> {
        for line in status_changes(self.previous.as_ref(), report) {
            info!("{}", line);
        }
        self.previous = Some(*report);
        Ok(TimerControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(battery: u8, plug_usb: bool) -> Report {
        Report {
            battery,
            plug_usb,
            ..Report::default()
        }
    }

    #[test]
    fn test_battery_percentage() {
        assert_eq!(battery_percentage(&report(4, false)), 50);
        assert_eq!(battery_percentage(&report(4, true)), 36);
        assert_eq!(battery_percentage(&report(8, false)), 100);
        assert_eq!(battery_percentage(&report(11, true)), 100);
    }

    #[test]
    fn test_first_report_logs_battery() {
        let lines = status_changes(None, &report(4, false));
        assert_eq!(lines, vec!["Battery: 50%".to_string()]);

        let lines = status_changes(None, &report(8, false));
        assert_eq!(lines, vec!["Battery: Fully charged".to_string()]);
    }

    #[test]
    fn test_unchanged_logs_nothing() {
        let previous = report(4, false);
        assert!(status_changes(Some(&previous), &report(4, false)).is_empty());
    }

    #[test]
    fn test_usb_change_logs_battery_too() {
        let lines = status_changes(Some(&report(4, false)), &report(4, true));
        assert_eq!(lines, vec!["USB: Connected".to_string(), "Battery: 36%".to_string()]);

        let lines = status_changes(Some(&report(4, true)), &report(4, false));
        assert_eq!(lines[0], "USB: Disconnected");
    }

    #[test]
    fn test_audio_changes() {
        let previous = report(4, false);
        let headset = Report {
            plug_audio: true,
            plug_mic: true,
            ..previous
        };
        assert_eq!(status_changes(Some(&previous), &headset), vec!["Audio: Headset".to_string()]);

        let headphones = Report {
            plug_audio: true,
            ..previous
        };
        assert_eq!(status_changes(Some(&headset), &headphones), vec!["Audio: Headphones".to_string()]);
        assert_eq!(status_changes(Some(&headphones), &previous), vec!["Audio: Speaker".to_string()]);
    }

    #[test]
    fn test_timer_remembers_previous() {
        let mut action = StatusAction::new();
        let mut harness = crate::actions::testing::Harness::new();
        action.init(&mut harness.ctx()).unwrap();
        let timer = action.timer.unwrap();

        let control = action.on_timer(timer, &report(4, false), &mut harness.ctx()).unwrap();
        assert_eq!(control, TimerControl::Continue);
        assert_eq!(action.previous, Some(report(4, false)));
    }
}
