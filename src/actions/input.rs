//! Virtual joystick and trackpad mouse

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{Action, ActionContext, REPORT_EVENTS};
use crate::config::ProfileOptions;
use crate::device::DeviceInfo;
use crate::error::{ActionError, DeviceError, FatalSessionError};
use crate::event_loop::{EventKind, TimerControl, TimerHandle};
use crate::output::layout::LayoutRegistry;
use crate::output::{Emitter, VirtualDeviceFactory};
use crate::report::fields::Button;
use crate::report::protocol::Report;

/// Mouse motion is flushed at this interval. Reports arrive every 2 ms over
/// Bluetooth and 4 ms over USB, so each tick sees at least one fresh report.
pub const MOUSE_INTERVAL: Duration = Duration::from_millis(5);

/// Layout of the trackpad mouse device
pub const MOUSE_LAYOUT: &str = "mouse";

pub struct InputAction {
    factory: Arc<dyn VirtualDeviceFactory>,
    layouts: Arc<LayoutRegistry>,
    joystick: Option<Emitter>,
    mouse: Option<Emitter>,
    timer: Option<TimerHandle>,

    /// Single-button profile toggle, never forwarded to the joystick
    toggle_button: Option<Button>,
}

fn fatal(err: DeviceError) -> ActionError {
    ActionError::Fatal(FatalSessionError::VirtualDevice(err))
}

impl InputAction {
    pub fn new(
        factory: Arc<dyn VirtualDeviceFactory>,
        layouts: Arc<LayoutRegistry>,
        toggle_button: Option<Button>,
    ) -> Self {
        Self {
            factory,
            layouts,
            joystick: None,
            mouse: None,
            timer: None,
            toggle_button,
        }
    }

    /// Layout name of the current joystick
    pub fn joystick_layout(&self) -> Option<&str> {
        self.joystick.as_ref().map(|j| j.layout().name.as_str())
    }

    pub fn has_mouse(&self) -> bool {
        self.mouse.is_some()
    }

    fn create(&self, name: &str) -> Result<Emitter, ActionError> {
        let layout = self.layouts.get(name).map_err(fatal)?;
        Emitter::create(self.factory.as_ref(), layout).map_err(fatal)
    }

    fn update_mouse(&mut self, enabled: bool) -> Result<(), ActionError> {
        if enabled && self.mouse.is_none() {
            self.mouse = Some(self.create(MOUSE_LAYOUT)?);
        } else if !enabled {
            if let Some(mut mouse) = self.mouse.take() {
                mouse.close();
            }
        }
        Ok(())
    }

    fn update_joystick(&mut self, layout: &str) -> Result<(), ActionError> {
        if self.joystick_layout() == Some(layout) {
            return Ok(());
        }

        if let Some(mut joystick) = self.joystick.take() {
            debug!("Replacing {} joystick with {}", joystick.layout().name, layout);
            joystick.close();
        }
        self.joystick = Some(self.create(layout)?);
        Ok(())
    }
}

impl Action for InputAction {
    fn name(&self) -> &'static str {
        "input"
    }

    fn subscriptions(&self) -> &'static [EventKind] {
        REPORT_EVENTS
    }

    fn init(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.timer = Some(ctx.create_timer(MOUSE_INTERVAL)?);
        Ok(())
    }

    fn setup(&mut self, _device: &DeviceInfo, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if let Some(timer) = self.timer {
            ctx.start_timer(timer)?;
        }
        Ok(())
    }

    fn disable(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if let Some(timer) = self.timer {
            ctx.stop_timer(timer)?;
        }
        if let Some(joystick) = self.joystick.as_mut() {
            joystick.emit_reset()?;
        }
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.emit_reset()?;
        }
        Ok(())
    }

    fn load_options(&mut self, options: &ProfileOptions, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.update_mouse(options.trackpad_mouse)?;
        self.update_joystick(options.layout_name())?;

        if let Some(joystick) = self.joystick.as_mut() {
            joystick.set_ignored(options.ignored());
            if let Some(button) = self.toggle_button {
                joystick.ignore(button);
            }
        }
        Ok(())
    }

    fn handle_report(&mut self, report: &Report, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if let Some(joystick) = self.joystick.as_mut() {
            joystick.emit(report)?;
        }
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.emit(report)?;
        }
        Ok(())
    }

    fn on_timer(
        &mut self,
        _timer: TimerHandle,
        report: &Report,
        _ctx: &mut ActionContext<'_>,
    ) -> Result<TimerControl, ActionError> {
        if let Some(joystick) = self.joystick.as_mut() {
            joystick.emit_mouse(report)?;
        }
        if let Some(mouse) = self.mouse.as_mut() {
            mouse.emit_mouse(report)?;
        }
        Ok(TimerControl::Continue)
    }
}
