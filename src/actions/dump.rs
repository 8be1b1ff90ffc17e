//! Periodic JSON dump of the latest report

use std::time::Duration;
use tracing::info;

use super::{Action, ActionContext};
use crate::config::ProfileOptions;
use crate::error::ActionError;
use crate::event_loop::{TimerControl, TimerHandle};
use crate::report::protocol::Report;

pub const DUMP_INTERVAL: Duration = Duration::from_millis(20);

/// One dump line: timestamp, controller index and every report field
pub fn dump_line(index: usize, report: &Report) -> String {
    serde_json::json!({
        "time": chrono::Local::now().to_rfc3339(),
        "controller": index,
        "report": report,
    })
    .to_string()
}

#[derive(Default)]
pub struct DumpAction {
    timer: Option<TimerHandle>,
    enabled: bool,
}

impl DumpAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Action for DumpAction {
    fn name(&self) -> &'static str {
        "dump"
    }

    fn init(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.timer = Some(ctx.create_timer(DUMP_INTERVAL)?);
        Ok(())
    }

    fn enable(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.enabled = true;
        if let Some(timer) = self.timer {
            ctx.start_timer(timer)?;
        }
        Ok(())
    }

    fn disable(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.enabled = false;
        if let Some(timer) = self.timer {
            ctx.stop_timer(timer)?;
        }
        Ok(())
    }

    fn load_options(&mut self, options: &ProfileOptions, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if options.dump_reports {
            self.enable(ctx)
        } else {
            self.disable(ctx)
        }
    }

    fn on_timer(
        &mut self,
        _timer: TimerHandle,
        report: &Report,
        ctx: &mut ActionContext<'_>,
    ) -> Result<TimerControl, ActionError> {
        info!(target: "ds4_bridge::dump", "{}", dump_line(ctx.session.index, report));
        Ok(TimerControl::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::Harness;

    #[test]
    fn test_dump_line_fields() {
        let report = Report {
            left_analog_x: 200,
            button_cross: true,
            battery: 5,
            ..Report::default()
        };
        let line = dump_line(2, &report);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["controller"], 2);
        assert_eq!(value["report"]["left_analog_x"], 200);
        assert_eq!(value["report"]["button_cross"], true);
        assert_eq!(value["report"]["battery"], 5);
        assert!(value["time"].as_str().is_some());
    }

    #[test]
    fn test_enabled_by_options() {
        let mut action = DumpAction::new();
        let mut harness = Harness::new();
        action.init(&mut harness.ctx()).unwrap();
        let timer = action.timer.unwrap();

        let options = ProfileOptions {
            dump_reports: true,
            ..ProfileOptions::default()
        };
        action.load_options(&options, &mut harness.ctx()).unwrap();
        assert!(action.is_enabled());
        assert!(harness.event_loop.is_timer_armed(timer));

        let control = action.on_timer(timer, &Report::default(), &mut harness.ctx()).unwrap();
        assert_eq!(control, TimerControl::Continue);

        action.load_options(&ProfileOptions::default(), &mut harness.ctx()).unwrap();
        assert!(!action.is_enabled());
        assert!(!harness.event_loop.is_timer_armed(timer));
    }
}
