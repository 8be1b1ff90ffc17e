//! Low battery warning through the light bar

use std::time::Duration;
use tracing::info;

use super::{Action, ActionContext};
use crate::config::ProfileOptions;
use crate::error::ActionError;
use crate::event_loop::{TimerControl, TimerHandle};
use crate::report::protocol::{Report, BATTERY_WARNING};

pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const FLASH_DURATION: Duration = Duration::from_secs(5);

/// Flash on/off durations while warning
const FLASH_ON: u8 = 30;
const FLASH_OFF: u8 = 30;

/// True when the battery is low and not being charged
pub fn battery_low(report: &Report) -> bool {
    report.battery < BATTERY_WARNING && !report.plug_usb
}

#[derive(Default)]
pub struct BatteryAction {
    check: Option<TimerHandle>,
    flash: Option<TimerHandle>,
}

impl BatteryAction {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Action for BatteryAction {
    fn name(&self) -> &'static str {
        "battery"
    }

    fn init(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.check = Some(ctx.create_timer(CHECK_INTERVAL)?);
        self.flash = Some(ctx.create_timer(FLASH_DURATION)?);
        Ok(())
    }

    fn enable(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if let Some(check) = self.check {
            ctx.start_timer(check)?;
        }
        Ok(())
    }

    fn disable(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        for timer in [self.check, self.flash].into_iter().flatten() {
            ctx.stop_timer(timer)?;
        }
        Ok(())
    }

    fn load_options(&mut self, options: &ProfileOptions, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if options.battery_flash {
            self.enable(ctx)
        } else {
            self.disable(ctx)
        }
    }

    fn on_timer(
        &mut self,
        timer: TimerHandle,
        report: &Report,
        ctx: &mut ActionContext<'_>,
    ) -> Result<TimerControl, ActionError> {
        if Some(timer) == self.flash {
            if let Some(device) = ctx.device() {
                device.stop_led_flash()?;
            }
            return Ok(TimerControl::Stop);
        }

        if battery_low(report) {
            if let Some(device) = ctx.device() {
                if !device.is_flashing() {
                    info!("Battery low, flashing LED");
                }
                device.start_led_flash(FLASH_ON, FLASH_OFF)?;
            }
            if let Some(flash) = self.flash {
                ctx.start_timer(flash)?;
            }
        }
        Ok(TimerControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::Harness;
    use crate::device::mocks::mock_device;
    use crate::report::protocol::TransportKind;

    fn low_report() -> Report {
        Report {
            battery: 1,
            ..Report::default()
        }
    }

    #[test]
    fn test_battery_low() {
        assert!(battery_low(&low_report()));
        assert!(!battery_low(&Report {
            plug_usb: true,
            ..low_report()
        }));
        assert!(!battery_low(&Report {
            battery: BATTERY_WARNING,
            ..Report::default()
        }));
    }

    #[test]
    fn test_options_toggle_check_timer() {
        let mut action = BatteryAction::new();
        let mut harness = Harness::new();
        action.init(&mut harness.ctx()).unwrap();
        let check = action.check.unwrap();

        let options = ProfileOptions {
            battery_flash: true,
            ..ProfileOptions::default()
        };
        action.load_options(&options, &mut harness.ctx()).unwrap();
        assert!(harness.event_loop.is_timer_armed(check));

        action.load_options(&ProfileOptions::default(), &mut harness.ctx()).unwrap();
        assert!(!harness.event_loop.is_timer_armed(check));
    }

    #[test]
    fn test_low_battery_flashes_then_stops() {
        let (device, handles) = mock_device("00:11:22:33:44:55", TransportKind::Bluetooth);
        let mut harness = Harness::with_device(device);
        let mut action = BatteryAction::new();
        action.init(&mut harness.ctx()).unwrap();
        let (check, flash) = (action.check.unwrap(), action.flash.unwrap());

        let control = action.on_timer(check, &low_report(), &mut harness.ctx()).unwrap();
        assert_eq!(control, TimerControl::Continue);
        assert!(harness.device.as_ref().unwrap().is_flashing());
        assert!(harness.event_loop.is_timer_armed(flash));

        // A second check while flashing sends nothing new
        action.on_timer(check, &low_report(), &mut harness.ctx()).unwrap();
        assert_eq!(handles.written().len(), 1);

        let control = action.on_timer(flash, &low_report(), &mut harness.ctx()).unwrap();
        assert_eq!(control, TimerControl::Stop);
        assert!(!harness.device.as_ref().unwrap().is_flashing());
        assert_eq!(handles.written().len(), 3);
    }

    #[test]
    fn test_charging_does_not_flash() {
        let (device, handles) = mock_device("00:11:22:33:44:55", TransportKind::Usb);
        let mut harness = Harness::with_device(device);
        let mut action = BatteryAction::new();
        action.init(&mut harness.ctx()).unwrap();

        let report = Report {
            plug_usb: true,
            ..low_report()
        };
        action.on_timer(action.check.unwrap(), &report, &mut harness.ctx()).unwrap();
        assert!(handles.written().is_empty());
    }
}
