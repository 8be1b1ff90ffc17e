//! # Virtual Output Module
//!
//! Translates reports into events on virtual input devices.
//!
//! The session never talks to uinput directly. It goes through
//! [`VirtualOutput`], created by a [`VirtualDeviceFactory`], so the input
//! action can be driven by recording outputs in tests.
//!
//! ## Event flow
//!
//! - [`Emitter::emit`]: absolute axes, keys and hats, then one sync, per report
//! - [`Emitter::emit_mouse`]: accumulated relative motion, on a timer
//! - [`Emitter::emit_reset`]: neutral state when the controller goes away

pub mod layout;
pub mod uinput;

use evdev::{AbsoluteAxisType, Key, RelativeAxisType};
use std::sync::Arc;

use crate::error::DeviceError;
use crate::report::fields::{Axis, Button};
use crate::report::protocol::Report;
use layout::{ButtonSource, Layout, A2D_DEADZONE, ANALOG_CENTER, TRACKPAD_SENSITIVITY};

/// One value written to a virtual device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    Absolute(AbsoluteAxisType, i32),
    Key(Key, bool),
    Relative(RelativeAxisType, i32),
}

/// A virtual input device
///
/// Writes are buffered until [`VirtualOutput::sync`].
pub trait VirtualOutput: Send {
    fn write(&mut self, event: OutputEvent) -> Result<(), DeviceError>;

    /// Flush buffered writes followed by a synchronization report
    fn sync(&mut self) -> Result<(), DeviceError>;

    /// Destroy the device
    fn close(&mut self);
}

/// Creates virtual devices for a layout
pub trait VirtualDeviceFactory: Send + Sync {
    fn create(&self, layout: &Layout) -> Result<Box<dyn VirtualOutput>, DeviceError>;
}

/// Drives one virtual device from reports according to its layout
pub struct Emitter {
    output: Box<dyn VirtualOutput>,
    layout: Arc<Layout>,
    ignored: Vec<Button>,

    /// Last trackpad position per mouse axis, `None` while not touching
    mouse_pos: Vec<Option<i32>>,

    /// Fractional relative motion not sent yet, per mouse axis
    mouse_rel: Vec<f64>,
}

impl Emitter {
    pub fn new(layout: Arc<Layout>, output: Box<dyn VirtualOutput>) -> Self {
        let axes = layout.mouse.len();
        Self {
            output,
            layout,
            ignored: Vec::new(),
            mouse_pos: vec![None; axes],
            mouse_rel: vec![0.0; axes],
        }
    }

    /// Create the device through `factory`
    pub fn create(factory: &dyn VirtualDeviceFactory, layout: Arc<Layout>) -> Result<Self, DeviceError> {
        let output = factory.create(&layout)?;
        Ok(Self::new(layout, output))
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Buttons always reported as released
    pub fn set_ignored(&mut self, buttons: impl IntoIterator<Item = Button>) {
        self.ignored = buttons.into_iter().collect();
    }

    pub fn ignore(&mut self, button: Button) {
        if !self.ignored.contains(&button) {
            self.ignored.push(button);
        }
    }

    pub fn ignored(&self) -> &[Button] {
        &self.ignored
    }

    fn button_value(&self, source: ButtonSource, report: &Report) -> bool {
        match source {
            ButtonSource::Button(button) => !self.ignored.contains(&button) && report.button(button),
            ButtonSource::AnalogHigh(axis) => report.axis(axis) > ANALOG_CENTER + A2D_DEADZONE,
            ButtonSource::AnalogLow(axis) => report.axis(axis) < ANALOG_CENTER - A2D_DEADZONE,
        }
    }

    /// Write axes, keys and hats of `report`
    pub fn emit(&mut self, report: &Report) -> Result<(), DeviceError> {
        let layout = Arc::clone(&self.layout);

        for &(code, axis, _) in &layout.axes {
            self.output.write(OutputEvent::Absolute(code, report.axis(axis)))?;
        }

        for &(code, source) in &layout.buttons {
            let value = self.button_value(source, report);
            self.output.write(OutputEvent::Key(code, value))?;
        }

        for &(code, negative, positive) in &layout.hats {
            let value = if report.button(negative) {
                -1
            } else if report.button(positive) {
                1
            } else {
                0
            };
            self.output.write(OutputEvent::Absolute(code, value))?;
        }

        self.output.sync()
    }

    /// Accumulate and write relative mouse motion
    ///
    /// Trackpad axes move by the touch delta since the previous call and
    /// forget their position when the finger lifts. Analog axes move while
    /// outside the deadzone, faster the further they are pushed.
    pub fn emit_mouse(&mut self, report: &Report) -> Result<(), DeviceError> {
        if self.layout.mouse.is_empty() {
            return Ok(());
        }
        let layout = Arc::clone(&self.layout);

        for (i, &(code, axis)) in layout.mouse.iter().enumerate() {
            let pos = report.axis(axis);

            if let Some(touch) = axis.touch_index() {
                if !report.trackpad_touch[touch].active {
                    self.mouse_pos[i] = None;
                    continue;
                }
                let last = self.mouse_pos[i].unwrap_or(pos);
                self.mouse_rel[i] += f64::from(pos - last) * TRACKPAD_SENSITIVITY;
                self.mouse_pos[i] = Some(pos);
            } else if axis.is_analog() {
                if (pos - ANALOG_CENTER).abs() <= layout.mouse_deadzone {
                    continue;
                }
                let accel = f64::from(pos - ANALOG_CENTER) / 10.0;
                self.mouse_rel[i] += accel * layout.mouse_sensitivity;
            } else {
                continue;
            }

            let rel = self.mouse_rel[i].trunc();
            self.mouse_rel[i] -= rel;
            self.output.write(OutputEvent::Relative(code, rel as i32))?;
        }

        self.output.sync()
    }

    /// Write a neutral state: sticks centered, everything else released
    pub fn emit_reset(&mut self) -> Result<(), DeviceError> {
        let layout = Arc::clone(&self.layout);

        for &(code, axis, range) in &layout.axes {
            self.output.write(OutputEvent::Absolute(code, neutral_value(axis, range)))?;
        }
        for &(code, _) in &layout.buttons {
            self.output.write(OutputEvent::Key(code, false))?;
        }
        for &(code, _, _) in &layout.hats {
            self.output.write(OutputEvent::Absolute(code, 0))?;
        }

        self.mouse_pos.iter_mut().for_each(|pos| *pos = None);
        self.mouse_rel.iter_mut().for_each(|rel| *rel = 0.0);

        self.output.sync()
    }

    pub fn close(&mut self) {
        self.output.close();
    }
}

fn neutral_value(axis: Axis, range: layout::AxisRange) -> i32 {
    let rest = match axis {
        Axis::LeftAnalogX | Axis::LeftAnalogY | Axis::RightAnalogX | Axis::RightAnalogY => ANALOG_CENTER,
        Axis::L2Analog | Axis::R2Analog => range.min,
        _ => 0,
    };
    rest.clamp(range.min, range.max)
}
