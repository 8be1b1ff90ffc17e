//! Light bar color of the current profile

use super::{Action, ActionContext};
use crate::config::{ProfileOptions, DEFAULT_LED};
use crate::device::DeviceInfo;
use crate::error::ActionError;

pub struct LedAction {
    color: (u8, u8, u8),
}

impl LedAction {
    pub fn new() -> Self {
        Self { color: DEFAULT_LED }
    }

    pub fn color(&self) -> (u8, u8, u8) {
        self.color
    }

    fn apply(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if let Some(device) = ctx.device() {
            let (r, g, b) = self.color;
            device.set_led(r, g, b)?;
        }
        Ok(())
    }
}

impl Default for LedAction {
    fn default() -> Self {
        Self::new()
    }
}

impl Action for LedAction {
    fn name(&self) -> &'static str {
        "led"
    }

    fn setup(&mut self, _device: &DeviceInfo, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.apply(ctx)
    }

    fn load_options(&mut self, options: &ProfileOptions, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.color = options.led_color();
        self.apply(ctx)
    }
}
