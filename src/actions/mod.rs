//! # Actions
//!
//! Independent behaviors of a controller session, driven by lifecycle events
//! and timers of the session's [`EventLoop`].
//!
//! | Action | Reacts to | Does |
//! |--------|-----------|------|
//! | [`LedAction`] | setup, options | sets the light bar color |
//! | [`SplashAction`] | setup, frame timer | rumbles and fades the LED on connect |
//! | [`InputAction`] | reports, 5 ms timer | feeds virtual joystick and mouse |
//! | [`BatteryAction`] | 60 s timer | flashes the LED on low battery |
//! | [`StatusAction`] | 1 s timer | logs USB, battery and audio changes |
//! | [`BtSignalAction`] | reports, 2.5 s timer | warns about low report rates |
//! | [`DumpAction`] | 20 ms timer | logs reports as JSON |
//! | [`BindingAction`] | reports | runs commands bound to button combos |
//!
//! Every action gets `device-setup`, `device-cleanup` (mapped to
//! [`Action::disable`]) and `load-options`. Report driven actions also get
//! `device-report`. Timer callbacks only run once a report was seen and
//! receive the latest one.

pub mod battery;
pub mod binding;
pub mod btsignal;
pub mod dump;
pub mod input;
pub mod led;
pub mod splash;
pub mod status;

use std::time::Duration;

use crate::config::ProfileOptions;
use crate::device::{DeviceInfo, Ds4Device};
use crate::error::ActionError;
use crate::event_loop::{Event, EventKind, EventLoop, SubscriberId, TimerControl, TimerHandle};
use crate::report::protocol::Report;

pub use battery::BatteryAction;
pub use binding::BindingAction;
pub use btsignal::BtSignalAction;
pub use dump::DumpAction;
pub use input::InputAction;
pub use led::LedAction;
pub use splash::SplashAction;
pub use status::StatusAction;

/// Events every action subscribes to
pub const LIFECYCLE_EVENTS: &[EventKind] = &[
    EventKind::DeviceSetup,
    EventKind::DeviceCleanup,
    EventKind::LoadOptions,
    EventKind::LoadProfile,
];

/// Lifecycle events plus reports
pub const REPORT_EVENTS: &[EventKind] = &[
    EventKind::DeviceSetup,
    EventKind::DeviceCleanup,
    EventKind::LoadOptions,
    EventKind::LoadProfile,
    EventKind::DeviceReport,
];

/// Session state visible to actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Controller index, 1-based
    pub index: usize,

    /// Name of the current profile
    pub profile: String,
}

/// Requests an action makes to its session, applied after the callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    NextProfile,
    PrevProfile,
    LoadProfile(String),
}

/// What an action callback may touch
pub struct ActionContext<'a> {
    pub event_loop: &'a mut EventLoop,
    pub device: Option<&'a mut Ds4Device>,
    pub session: &'a SessionInfo,
    pub commands: &'a mut Vec<SessionCommand>,

    /// Subscriber id of the running action
    pub owner: SubscriberId,
}

impl ActionContext<'_> {
    /// The attached device, if any
    pub fn device(&mut self) -> Option<&mut Ds4Device> {
        self.device.as_deref_mut()
    }

    /// Create a disarmed timer owned by the running action
    pub fn create_timer(&mut self, interval: Duration) -> Result<TimerHandle, ActionError> {
        self.event_loop
            .create_timer(interval, self.owner)
            .map_err(ActionError::Timer)
    }

    pub fn start_timer(&mut self, timer: TimerHandle) -> Result<(), ActionError> {
        self.event_loop.start_timer(timer).map_err(ActionError::Timer)
    }

    pub fn stop_timer(&mut self, timer: TimerHandle) -> Result<(), ActionError> {
        self.event_loop.stop_timer(timer).map_err(ActionError::Timer)
    }

    /// Ask the session to run `command` once the current callback returns
    pub fn request(&mut self, command: SessionCommand) {
        self.commands.push(command);
    }
}

/// A pluggable session behavior
///
/// All methods default to doing nothing.
pub trait Action {
    /// Short name for log messages
    fn name(&self) -> &'static str;

    /// Event kinds this action is registered for
    fn subscriptions(&self) -> &'static [EventKind] {
        LIFECYCLE_EVENTS
    }

    /// Called once when the action joins a session, before any event
    fn init(&mut self, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    /// A device was attached
    fn setup(&mut self, _device: &DeviceInfo, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    fn enable(&mut self, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    /// Also called when the device goes away
    fn disable(&mut self, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    fn load_options(&mut self, _options: &ProfileOptions, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    fn load_profile(&mut self, _profile: &str, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    fn handle_report(&mut self, _report: &Report, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        Ok(())
    }

    /// One of this action's timers expired; `report` is the latest report
    fn on_timer(
        &mut self,
        _timer: TimerHandle,
        _report: &Report,
        _ctx: &mut ActionContext<'_>,
    ) -> Result<TimerControl, ActionError> {
        Ok(TimerControl::Stop)
    }
}

/// The closed set of actions a session runs
pub enum ActionKind {
    Led(LedAction),
    Splash(SplashAction),
    Input(InputAction),
    Battery(BatteryAction),
    Status(StatusAction),
    BtSignal(BtSignalAction),
    Dump(DumpAction),
    Binding(BindingAction),
}

impl ActionKind {
    pub fn action(&self) -> &dyn Action {
        match self {
            ActionKind::Led(a) => a,
            ActionKind::Splash(a) => a,
            ActionKind::Input(a) => a,
            ActionKind::Battery(a) => a,
            ActionKind::Status(a) => a,
            ActionKind::BtSignal(a) => a,
            ActionKind::Dump(a) => a,
            ActionKind::Binding(a) => a,
        }
    }

    pub fn action_mut(&mut self) -> &mut dyn Action {
        match self {
            ActionKind::Led(a) => a,
            ActionKind::Splash(a) => a,
            ActionKind::Input(a) => a,
            ActionKind::Battery(a) => a,
            ActionKind::Status(a) => a,
            ActionKind::BtSignal(a) => a,
            ActionKind::Dump(a) => a,
            ActionKind::Binding(a) => a,
        }
    }

    pub fn name(&self) -> &'static str {
        self.action().name()
    }

    pub fn subscriptions(&self) -> &'static [EventKind] {
        self.action().subscriptions()
    }

    /// Route a lifecycle event to the matching callback
    pub fn on_event(&mut self, event: &Event, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        let action = self.action_mut();
        match event {
            Event::DeviceSetup(info) => action.setup(info, ctx),
            Event::DeviceCleanup => action.disable(ctx),
            Event::LoadOptions(options) => action.load_options(options, ctx),
            Event::LoadProfile(profile) => action.load_profile(profile, ctx),
            Event::DeviceReport(report) => action.handle_report(report, ctx),
        }
    }

    /// Timer expiry; skipped until the session has seen a report
    pub fn on_timer(
        &mut self,
        timer: TimerHandle,
        report: Option<&Report>,
        ctx: &mut ActionContext<'_>,
    ) -> Result<TimerControl, ActionError> {
        match report {
            Some(report) => self.action_mut().on_timer(timer, report, ctx),
            None => Ok(TimerControl::Continue),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Owns everything an [`ActionContext`] borrows
    pub struct Harness {
        pub event_loop: EventLoop,
        pub device: Option<Ds4Device>,
        pub session: SessionInfo,
        pub commands: Vec<SessionCommand>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                event_loop: EventLoop::new().unwrap(),
                device: None,
                session: SessionInfo {
                    index: 1,
                    profile: "default".to_string(),
                },
                commands: Vec::new(),
            }
        }

        pub fn with_device(device: Ds4Device) -> Self {
            Self {
                device: Some(device),
                ..Self::new()
            }
        }

        pub fn ctx(&mut self) -> ActionContext<'_> {
            ActionContext {
                event_loop: &mut self.event_loop,
                device: self.device.as_mut(),
                session: &self.session,
                commands: &mut self.commands,
                owner: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;
    use crate::device::mocks::mock_device;
    use crate::report::protocol::TransportKind;

    #[test]
    fn test_timer_skipped_without_report() {
        let mut action = ActionKind::Status(StatusAction::new());
        let mut harness = Harness::new();
        let timer = harness.ctx().create_timer(Duration::from_secs(1)).unwrap();

        let control = action.on_timer(timer, None, &mut harness.ctx()).unwrap();
        assert_eq!(control, TimerControl::Continue);
    }

    #[test]
    fn test_event_routing() {
        let (device, handles) = mock_device("00:11:22:33:44:55", TransportKind::Usb);
        let mut harness = Harness::with_device(device);
        let mut action = ActionKind::Led(LedAction::new());

        let options = std::sync::Arc::new(ProfileOptions {
            led: "ff0000".to_string(),
            ..ProfileOptions::default()
        });
        action
            .on_event(&Event::LoadOptions(options), &mut harness.ctx())
            .unwrap();

        let written = handles.written();
        assert_eq!(written.len(), 1);
        assert_eq!(&written[0][6..9], &[255, 0, 0]);
    }

    #[test]
    fn test_subscriptions() {
        assert!(!ActionKind::Led(LedAction::new())
            .subscriptions()
            .contains(&EventKind::DeviceReport));
        assert!(ActionKind::BtSignal(BtSignalAction::new())
            .subscriptions()
            .contains(&EventKind::DeviceReport));
    }

    #[test]
    fn test_context_requests() {
        let mut harness = Harness::new();
        harness.ctx().request(SessionCommand::NextProfile);
        assert_eq!(harness.commands, vec![SessionCommand::NextProfile]);
        assert!(harness.ctx().device().is_none());
    }
}
