//! Rumble and light bar animation played when a controller connects

use std::time::Duration;

use super::{Action, ActionContext};
use crate::config::{ProfileOptions, DEFAULT_LED};
use crate::device::DeviceInfo;
use crate::error::ActionError;
use crate::event_loop::{TimerControl, TimerHandle};
use crate::report::protocol::Report;

/// Length of the whole animation
pub const SPLASH_TIME: Duration = Duration::from_millis(500);

/// Motor levels while rumbling, (strong, weak)
const HIGH_RUMBLE: (u8, u8) = (63, 255);
const LOW_RUMBLE: (u8, u8) = (0, 0);

/// Frames interpolated between consecutive key frames
const SEGMENT_FRAMES: [usize; 4] = [4, 6, 8, 4];

/// One step of the animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplashFrame {
    pub led: (u8, u8, u8),
    pub rumble: (u8, u8),
}

/// Linear steps from `from` towards `to`, excluding `to`
fn interpolate(from: (u8, u8, u8), to: (u8, u8, u8), steps: usize) -> impl Iterator<Item = (u8, u8, u8)> {
    let channel = move |a: u8, b: u8, i: usize| {
        let step = (f64::from(b) - f64::from(a)) / steps as f64;
        (f64::from(a) + step * i as f64) as u8
    };
    (0..steps).map(move |i| {
        (
            channel(from.0, to.0, i),
            channel(from.1, to.1, i),
            channel(from.2, to.2, i),
        )
    })
}

/// Every frame of the animation for a profile LED of `led`
///
/// The light bar fades from `led` through yellow, cyan and black back to
/// `led` while the motors pulse twice.
pub fn splash_frames(led: (u8, u8, u8)) -> Vec<SplashFrame> {
    let keys = [
        SplashFrame { led, rumble: HIGH_RUMBLE },
        SplashFrame { led: (255, 255, 0), rumble: LOW_RUMBLE },
        SplashFrame { led: (0, 255, 255), rumble: HIGH_RUMBLE },
        SplashFrame { led: (0, 0, 0), rumble: LOW_RUMBLE },
        SplashFrame { led, rumble: LOW_RUMBLE },
    ];

    keys.windows(2)
        .zip(SEGMENT_FRAMES)
        .flat_map(|(pair, steps)| {
            let rumble = pair[0].rumble;
            interpolate(pair[0].led, pair[1].led, steps).map(move |led| SplashFrame { led, rumble })
        })
        .collect()
}

/// Time each frame stays on
pub fn frame_interval() -> Duration {
    let total: usize = SEGMENT_FRAMES.iter().sum();
    SPLASH_TIME / total as u32
}

pub struct SplashAction {
    timer: Option<TimerHandle>,
    led: (u8, u8, u8),
    enabled: bool,
    frames: Vec<SplashFrame>,

    /// Next frame to play while the animation runs
    position: Option<usize>,
}

impl SplashAction {
    pub fn new() -> Self {
        Self {
            timer: None,
            led: DEFAULT_LED,
            enabled: true,
            frames: Vec::new(),
            position: None,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.position.is_some()
    }

    /// Send frame `index` and advance, or restore the profile LED at the end
    fn play(&mut self, index: usize, ctx: &mut ActionContext<'_>) -> Result<TimerControl, ActionError> {
        let Some(device) = ctx.device() else {
            self.position = None;
            return Ok(TimerControl::Stop);
        };

        match self.frames.get(index) {
            Some(frame) => {
                let mut control = *device.frame();
                (control.led_red, control.led_green, control.led_blue) = frame.led;
                (control.rumble_strong, control.rumble_weak) = frame.rumble;
                device.write_control(control)?;
                self.position = Some(index + 1);
                Ok(TimerControl::Continue)
            }
            None => {
                let (r, g, b) = self.led;
                device.set_led(r, g, b)?;
                self.position = None;
                Ok(TimerControl::Stop)
            }
        }
    }
}

impl Default for SplashAction {
    fn default() -> Self {
        Self::new()
    }
}

impl Action for SplashAction {
    fn name(&self) -> &'static str {
        "splash"
    }

    fn init(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.timer = Some(ctx.create_timer(frame_interval())?);
        Ok(())
    }

    fn setup(&mut self, _device: &DeviceInfo, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if !self.enabled {
            return Ok(());
        }

        self.frames = splash_frames(self.led);
        if let TimerControl::Continue = self.play(0, ctx)? {
            if let Some(timer) = self.timer {
                ctx.start_timer(timer)?;
            }
        }
        Ok(())
    }

    /// Stops the motors if the device goes away mid-animation
    fn disable(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        if let Some(timer) = self.timer {
            ctx.stop_timer(timer)?;
        }
        if self.position.take().is_some() {
            if let Some(device) = ctx.device() {
                device.rumble(0, 0)?;
            }
        }
        Ok(())
    }

    fn load_options(&mut self, options: &ProfileOptions, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        self.led = options.led_color();
        self.enabled = !options.no_splash;
        Ok(())
    }

    fn on_timer(
        &mut self,
        _timer: TimerHandle,
        _report: &Report,
        ctx: &mut ActionContext<'_>,
    ) -> Result<TimerControl, ActionError> {
        match self.position {
            Some(index) => self.play(index, ctx),
            None => Ok(TimerControl::Stop),
        }
    }
}
