//! # Controller Session
//!
//! One controller slot: an [`EventLoop`], the attached [`Ds4Device`] (if any),
//! the actions and the profile state. A session runs on its own thread; the
//! supervisor talks to it only through a [`SessionHandle`].
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --assign--> Active --profile switch--> Active
//!                    |
//!                disconnect --> Idle (pinned) / stopped (dynamic)
//! ```
//!
//! Attaching fires `device-setup` then `load-options`. Losing the device fires
//! `device-cleanup` while the device is still attached, then closes it.

pub mod profile;

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::actions::{
    ActionContext, ActionKind, BatteryAction, BindingAction, BtSignalAction, DumpAction, InputAction,
    LedAction, SessionCommand, SessionInfo, SplashAction, StatusAction,
};
use crate::config::{Config, ProfileOptions};
use crate::device::Ds4Device;
use crate::error::{ActionError, FatalSessionError, ReportError};
use crate::event_loop::{Event, EventLoop, Handler, LoopHandle, SubscriberId, TimerControl, TimerHandle};
use crate::output::layout::LayoutRegistry;
use crate::output::VirtualDeviceFactory;
use crate::report::protocol::Report;
use profile::{ProfileSet, Selection};

/// State a session publishes to the supervisor
#[derive(Debug, Default)]
pub struct SessionShared {
    error: AtomicBool,

    /// Address of the attached device
    address: Mutex<Option<String>>,
}

impl SessionShared {
    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    pub fn address(&self) -> Option<String> {
        self.address.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_attached(&self) -> bool {
        self.address().is_some()
    }

    fn set_address(&self, address: Option<String>) {
        *self.address.lock().unwrap_or_else(PoisonError::into_inner) = address;
    }

    fn set_error(&self) {
        self.error.store(true, Ordering::SeqCst);
    }
}

/// Supervisor side of a session
#[derive(Clone)]
pub struct SessionHandle {
    pub index: usize,
    pub dynamic: bool,
    shared: Arc<SessionShared>,
    sender: Sender<Ds4Device>,
    loop_handle: LoopHandle,
}

impl SessionHandle {
    /// Hand `device` to the session thread
    ///
    /// The session counts as attached from here on, so a scan running before
    /// the session picks the device up does not hand it out twice. Returns
    /// the device if the session thread is gone.
    pub fn assign(&self, device: Ds4Device) -> Result<(), Ds4Device> {
        self.shared.set_address(Some(device.address().to_string()));
        if let Err(mpsc::SendError(device)) = self.sender.send(device) {
            self.shared.set_address(None);
            return Err(device);
        }
        self.loop_handle.wake();
        Ok(())
    }

    pub fn stop(&self) {
        self.loop_handle.stop();
    }

    /// Waiting for a device and able to take one
    pub fn is_idle(&self) -> bool {
        !self.shared.is_attached() && !self.shared.has_error() && !self.loop_handle.is_stopped()
    }

    pub fn has_error(&self) -> bool {
        self.shared.has_error()
    }

    pub fn address(&self) -> Option<String> {
        self.shared.address()
    }
}

/// A controller session, ready to [`run`](Session::run) on its own thread
pub struct Session {
    event_loop: EventLoop,
    core: SessionCore,
}

struct SessionCore {
    info: SessionInfo,
    dynamic: bool,
    actions: Vec<ActionKind>,
    profiles: ProfileSet,
    device: Option<Ds4Device>,
    last_report: Option<Report>,
    inbox: Receiver<Ds4Device>,
    shared: Arc<SessionShared>,

    /// Signalled after every device cleanup
    disconnect: Option<Arc<Notify>>,

    failure: Option<FatalSessionError>,
}

fn init_error(err: ActionError) -> FatalSessionError {
    match err {
        ActionError::Fatal(fatal) => fatal,
        ActionError::Timer(e) => FatalSessionError::EventLoop(e),
        other => FatalSessionError::EventLoop(io::Error::other(other.to_string())),
    }
}

impl Session {
    /// Build a session and load its default profile
    ///
    /// # Errors
    ///
    /// Fails if the loop, an action timer or the virtual joystick cannot be
    /// created.
    pub fn new(
        index: usize,
        dynamic: bool,
        options: &ProfileOptions,
        config: &Config,
        layouts: Arc<LayoutRegistry>,
        factory: Arc<dyn VirtualDeviceFactory>,
        disconnect: Option<Arc<Notify>>,
    ) -> Result<(Session, SessionHandle), FatalSessionError> {
        let mut event_loop = EventLoop::new().map_err(FatalSessionError::EventLoop)?;
        let profiles = ProfileSet::new(options, config);

        let toggle = if profiles.has_toggle() {
            options.toggle_combo()
        } else {
            None
        };
        let toggle_button = toggle
            .as_ref()
            .filter(|combo| combo.modifiers().is_empty())
            .map(|combo| combo.trigger());

        let actions = vec![
            ActionKind::Led(LedAction::new()),
            ActionKind::Splash(SplashAction::new()),
            ActionKind::Input(InputAction::new(factory, layouts, toggle_button)),
            ActionKind::Battery(BatteryAction::new()),
            ActionKind::Status(StatusAction::new()),
            ActionKind::BtSignal(BtSignalAction::new()),
            ActionKind::Dump(DumpAction::new()),
            ActionKind::Binding(BindingAction::new(Arc::new(config.bindings.clone()), toggle)),
        ];

        let (sender, inbox) = mpsc::channel();
        let shared = Arc::new(SessionShared::default());
        let handle = SessionHandle {
            index,
            dynamic,
            shared: shared.clone(),
            sender,
            loop_handle: event_loop.handle(),
        };

        let mut core = SessionCore {
            info: SessionInfo {
                index,
                profile: profiles.current().to_string(),
            },
            dynamic,
            actions,
            profiles,
            device: None,
            last_report: None,
            inbox,
            shared,
            disconnect,
            failure: None,
        };

        for id in 0..core.actions.len() {
            for &kind in core.actions[id].subscriptions() {
                event_loop.register_event(kind, id);
            }
            let mut commands = Vec::new();
            let mut ctx = ActionContext {
                event_loop: &mut event_loop,
                device: None,
                session: &core.info,
                commands: &mut commands,
                owner: id,
            };
            core.actions[id].action_mut().init(&mut ctx).map_err(init_error)?;
        }

        event_loop.fire_event(Event::LoadOptions(core.profiles.current_options()));
        event_loop.process_events(&mut core);
        if let Some(err) = core.failure.take() {
            return Err(err);
        }

        Ok((Session { event_loop, core }, handle))
    }

    pub fn index(&self) -> usize {
        self.core.info.index
    }

    /// Run until stopped, the device of a dynamic session disconnects, or a
    /// fatal error
    ///
    /// A device still attached when the loop stops is cleaned up first.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the session.
    pub fn run(mut self) -> Result<(), FatalSessionError> {
        debug!("Session {} started", self.core.info.index);
        let result = self.event_loop.run(&mut self.core);

        if self.core.device.is_some() {
            self.core.detach(&mut self.event_loop);
        }
        if let Err(e) = result {
            self.core.fail(&mut self.event_loop, FatalSessionError::EventLoop(e));
        }

        match self.core.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl SessionCore {
    /// Run `f` against action `id` with a fresh context, then apply whatever
    /// the action requested
    fn with_action<T>(
        &mut self,
        event_loop: &mut EventLoop,
        id: SubscriberId,
        f: impl FnOnce(&mut ActionKind, &mut ActionContext<'_>) -> Result<T, ActionError>,
    ) -> Option<T> {
        let mut commands = Vec::new();
        let Some(action) = self.actions.get_mut(id) else {
            return None;
        };
        let name = action.name();

        let result = {
            let mut ctx = ActionContext {
                event_loop: &mut *event_loop,
                device: self.device.as_mut(),
                session: &self.info,
                commands: &mut commands,
                owner: id,
            };
            f(action, &mut ctx)
        };

        let value = match result {
            Ok(value) => Some(value),
            Err(ActionError::Fatal(err)) => {
                self.fail(event_loop, err);
                None
            }
            Err(err) => {
                warn!("{}: {}", name, err);
                None
            }
        };

        self.apply_commands(event_loop, commands);
        value
    }

    fn apply_commands(&mut self, event_loop: &mut EventLoop, commands: Vec<SessionCommand>) {
        for command in commands {
            let target = match command {
                SessionCommand::NextProfile => self.profiles.next().to_string(),
                SessionCommand::PrevProfile => self.profiles.prev().to_string(),
                SessionCommand::LoadProfile(name) => name,
            };
            self.load_profile(event_loop, &target);
        }
    }

    fn load_profile(&mut self, event_loop: &mut EventLoop, name: &str) {
        match self.profiles.select(name) {
            Selection::Unchanged => {}
            Selection::Unknown => warn!("Ignoring invalid profile: {}", name),
            Selection::Switched(options) => {
                info!("Switching to profile: {}", name);
                self.info.profile = name.to_string();
                event_loop.fire_event(Event::LoadOptions(options));
                event_loop.fire_event(Event::LoadProfile(name.to_string()));
            }
        }
    }

    fn attach(&mut self, event_loop: &mut EventLoop, device: Ds4Device) {
        if let Some(current) = &self.device {
            warn!("Ignoring {}, {} is attached", device.name(), current.name());
            self.shared.set_address(Some(current.address().to_string()));
            return;
        }

        info!("Connected to {}", device.name());
        if let Err(e) = event_loop.watch(device.pollable_fd()) {
            self.fail(event_loop, FatalSessionError::EventLoop(e));
            return;
        }

        self.shared.set_address(Some(device.address().to_string()));
        self.last_report = None;
        let info = device.info().clone();
        self.device = Some(device);

        event_loop.fire_event(Event::DeviceSetup(info));
        event_loop.fire_event(Event::LoadOptions(self.profiles.current_options()));
        event_loop.process_events(self);
    }

    fn detach(&mut self, event_loop: &mut EventLoop) {
        let Some(device) = &self.device else {
            return;
        };
        info!("Disconnected");
        event_loop.unwatch(device.pollable_fd());

        event_loop.fire_event(Event::DeviceCleanup);
        event_loop.process_events(self);

        if let Some(mut device) = self.device.take() {
            device.close();
        }
        self.last_report = None;
        self.shared.set_address(None);

        if let Some(disconnect) = &self.disconnect {
            disconnect.notify_one();
        }
        if self.dynamic {
            event_loop.stop();
        }
    }

    fn fail(&mut self, event_loop: &mut EventLoop, err: FatalSessionError) {
        error!("{}", err);
        self.shared.set_error();
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        event_loop.stop();
    }
}

impl Handler for SessionCore {
    fn on_readable(&mut self, event_loop: &mut EventLoop, fd: RawFd) {
        // Edge triggered: drain everything that is buffered
        loop {
            let Some(device) = self.device.as_mut() else {
                return;
            };
            if device.pollable_fd() != fd {
                return;
            }

            match device.read_report() {
                Ok(report) => {
                    self.last_report = Some(report);
                    event_loop.fire_event(Event::DeviceReport(report));
                    event_loop.process_events(self);
                    if event_loop.is_stopped() {
                        return;
                    }
                }
                Err(ReportError::WouldBlock) => return,
                Err(ReportError::Disconnected) => {
                    self.detach(event_loop);
                    return;
                }
                Err(e) => warn!("Invalid report: {}", e),
            }
        }
    }

    fn on_timer(&mut self, event_loop: &mut EventLoop, owner: SubscriberId, timer: TimerHandle) -> TimerControl {
        let report = self.last_report;
        self.with_action(event_loop, owner, |action, ctx| {
            action.on_timer(timer, report.as_ref(), ctx)
        })
        .unwrap_or(TimerControl::Continue)
    }

    fn on_event(&mut self, event_loop: &mut EventLoop, subscriber: SubscriberId, event: &Event) {
        self.with_action(event_loop, subscriber, |action, ctx| action.on_event(event, ctx));
    }

    fn on_wake(&mut self, event_loop: &mut EventLoop) {
        while let Ok(device) = self.inbox.try_recv() {
            self.attach(event_loop, device);
        }
    }
}
