//! # Session Event Loop
//!
//! Single-threaded readiness loop run by every controller session.
//!
//! This module handles:
//! - Watching file descriptors (the controller's report fd)
//! - Periodic timers owned by actions
//! - A FIFO queue of lifecycle [`Event`]s delivered to subscribers in
//!   registration order
//!
//! Callbacks are methods of a [`Handler`] borrowed by [`EventLoop::run`], so a
//! callback can freely mutate its own state and schedule more work on the
//! loop. Events fired from inside a callback are queued and drained as soon
//! as that callback returns, always before the next poll.
//!
//! ## Cross-thread stop
//!
//! [`LoopHandle`] is the only part of a loop that may leave its thread. It
//! sets a flag checked once per iteration and wakes the poll.

pub mod timer;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ProfileOptions;
use crate::device::DeviceInfo;
use crate::report::protocol::Report;
use timer::Timer;
pub use timer::{TimerControl, TimerHandle};

/// Identifies an event subscriber (an action slot within a session)
pub type SubscriberId = usize;

/// Token reserved for the cross-thread waker
const WAKE_TOKEN: Token = Token(0);

/// Readiness events fetched per poll
const EVENTS_CAPACITY: usize = 64;

/// Lifecycle event kinds subscribers register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DeviceSetup,
    DeviceCleanup,
    LoadOptions,
    LoadProfile,
    DeviceReport,
}

/// A lifecycle event with its payload
#[derive(Debug, Clone)]
pub enum Event {
    /// A device was attached to the session
    DeviceSetup(DeviceInfo),

    /// The attached device is going away
    DeviceCleanup,

    /// Profile options were (re)loaded
    LoadOptions(Arc<ProfileOptions>),

    /// The named profile became current
    LoadProfile(String),

    /// A report was read from the device
    DeviceReport(Report),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::DeviceSetup(_) => EventKind::DeviceSetup,
            Event::DeviceCleanup => EventKind::DeviceCleanup,
            Event::LoadOptions(_) => EventKind::LoadOptions,
            Event::LoadProfile(_) => EventKind::LoadProfile,
            Event::DeviceReport(_) => EventKind::DeviceReport,
        }
    }
}

/// Receives everything the loop dispatches
pub trait Handler {
    /// A watched fd became readable
    fn on_readable(&mut self, event_loop: &mut EventLoop, fd: RawFd);

    /// A timer owned by `owner` expired
    fn on_timer(
        &mut self,
        event_loop: &mut EventLoop,
        owner: SubscriberId,
        timer: TimerHandle,
    ) -> TimerControl;

    /// `event` is delivered to `subscriber`
    fn on_event(&mut self, event_loop: &mut EventLoop, subscriber: SubscriberId, event: &Event);

    /// Another thread woke the loop through its [`LoopHandle`]
    fn on_wake(&mut self, _event_loop: &mut EventLoop) {}
}

/// Thread-safe stop and wake-up handle for one loop
#[derive(Clone)]
pub struct LoopHandle {
    stopped: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl LoopHandle {
    /// Ask the loop to return from [`EventLoop::run`]
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake();
    }

    /// Interrupt the poll so [`Handler::on_wake`] runs
    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake event loop: {}", e);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Watch(RawFd),
    Timer(TimerHandle),
}

/// Readiness loop with timers and a lifecycle event queue
pub struct EventLoop {
    poll: Poll,
    handle: LoopHandle,
    sources: HashMap<Token, Source>,
    watches: HashMap<RawFd, Token>,
    timers: Vec<Timer>,
    next_token: usize,
    subscriptions: Vec<(EventKind, SubscriberId)>,
    queue: VecDeque<Event>,
    draining: bool,
}

impl EventLoop {
    /// Create an idle loop
    ///
    /// # Errors
    ///
    /// Returns error if the poll instance or its waker cannot be created
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        Ok(Self {
            poll,
            handle: LoopHandle {
                stopped: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
            sources: HashMap::new(),
            watches: HashMap::new(),
            timers: Vec::new(),
            next_token: WAKE_TOKEN.0 + 1,
            subscriptions: Vec::new(),
            queue: VecDeque::new(),
            draining: false,
        })
    }

    /// Handle usable from other threads
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_stopped()
    }

    /// Stop after the current callback returns
    pub fn stop(&self) {
        self.handle.stop();
    }

    fn allocate_token(&mut self, source: Source) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.sources.insert(token, source);
        token
    }

    /// Deliver readiness of `fd` to [`Handler::on_readable`]
    ///
    /// Watching an fd twice replaces the earlier registration.
    pub fn watch(&mut self, fd: RawFd) -> io::Result<()> {
        self.unwatch(fd);

        let token = self.allocate_token(Source::Watch(fd));
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut SourceFd(&fd), token, Interest::READABLE)
        {
            self.sources.remove(&token);
            return Err(e);
        }
        self.watches.insert(fd, token);
        Ok(())
    }

    /// Stop watching `fd`; must be called before the fd is closed
    pub fn unwatch(&mut self, fd: RawFd) {
        if let Some(token) = self.watches.remove(&fd) {
            self.sources.remove(&token);
            if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
                debug!("Deregistering fd {} failed: {}", fd, e);
            }
        }
    }

    pub fn is_watching(&self, fd: RawFd) -> bool {
        self.watches.contains_key(&fd)
    }

    /// Create a disarmed periodic timer whose expirations go to `owner`
    pub fn create_timer(&mut self, interval: Duration, owner: SubscriberId) -> io::Result<TimerHandle> {
        let timer = Timer::new(interval, owner)?;
        let handle = TimerHandle(self.timers.len());
        let token = self.allocate_token(Source::Timer(handle));

        let fd = timer.raw_fd();
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, Interest::READABLE)?;
        self.timers.push(timer);

        Ok(handle)
    }

    /// Arm a timer; restarting an armed timer resets its period
    pub fn start_timer(&mut self, handle: TimerHandle) -> io::Result<()> {
        match self.timers.get_mut(handle.0) {
            Some(timer) => timer.start(),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "unknown timer")),
        }
    }

    /// Disarm a timer; stopping a stopped timer is a no-op
    pub fn stop_timer(&mut self, handle: TimerHandle) -> io::Result<()> {
        match self.timers.get_mut(handle.0) {
            Some(timer) => timer.stop(),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "unknown timer")),
        }
    }

    pub fn is_timer_armed(&self, handle: TimerHandle) -> bool {
        self.timers.get(handle.0).is_some_and(Timer::is_armed)
    }

    /// Subscribe `subscriber` to events of `kind`
    pub fn register_event(&mut self, kind: EventKind, subscriber: SubscriberId) {
        if !self.is_subscribed(kind, subscriber) {
            self.subscriptions.push((kind, subscriber));
        }
    }

    pub fn unregister_event(&mut self, kind: EventKind, subscriber: SubscriberId) {
        self.subscriptions.retain(|&entry| entry != (kind, subscriber));
    }

    fn is_subscribed(&self, kind: EventKind, subscriber: SubscriberId) -> bool {
        self.subscriptions.contains(&(kind, subscriber))
    }

    /// Queue an event
    ///
    /// Inside a callback it is delivered once the callback returns. Outside
    /// the loop, follow with [`EventLoop::process_events`].
    pub fn fire_event(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Drain the event queue in FIFO order
    ///
    /// Events fired by subscribers are appended and drained in the same call.
    /// A nested call while draining returns immediately.
    pub fn process_events<H: Handler>(&mut self, handler: &mut H) {
        if self.draining {
            return;
        }
        self.draining = true;

        while let Some(event) = self.queue.pop_front() {
            let kind = event.kind();
            let subscribers: Vec<SubscriberId> = self
                .subscriptions
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|&(_, id)| id)
                .collect();

            for id in subscribers {
                // Skip subscribers removed by an earlier one in this round
                if self.is_subscribed(kind, id) {
                    handler.on_event(self, id, &event);
                }
            }
        }

        self.draining = false;
    }

    /// Run until [`EventLoop::stop`] or [`LoopHandle::stop`]
    ///
    /// # Errors
    ///
    /// Returns error if polling fails for a reason other than a signal
    pub fn run<H: Handler>(&mut self, handler: &mut H) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        self.process_events(handler);

        while !self.is_stopped() {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            let ready: Vec<Token> = events.iter().map(|event| event.token()).collect();
            for token in ready {
                if self.is_stopped() {
                    break;
                }
                self.dispatch(token, handler);
                self.process_events(handler);
            }
        }

        Ok(())
    }

    fn dispatch<H: Handler>(&mut self, token: Token, handler: &mut H) {
        if token == WAKE_TOKEN {
            handler.on_wake(self);
            return;
        }

        match self.sources.get(&token).copied() {
            Some(Source::Watch(fd)) => handler.on_readable(self, fd),
            Some(Source::Timer(handle)) => self.expire_timer(handle, handler),
            // Unwatched earlier in this iteration
            None => {}
        }
    }

    fn expire_timer<H: Handler>(&mut self, handle: TimerHandle, handler: &mut H) {
        let Some(timer) = self.timers.get(handle.0) else {
            return;
        };
        if !timer.acknowledge() || !timer.is_armed() {
            return;
        }

        let owner = timer.owner();
        if handler.on_timer(self, owner, handle) == TimerControl::Stop {
            if let Err(e) = self.stop_timer(handle) {
                warn!("Failed to stop timer: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Records dispatches and stops the loop after a number of timer ticks
    #[derive(Default)]
    struct Recorder {
        events: Vec<(SubscriberId, EventKind)>,
        ticks: Vec<(SubscriberId, TimerHandle)>,
        readable: Vec<RawFd>,
        wakes: usize,
        stop_after_ticks: usize,
        refire: Option<Event>,
        tick_control: Option<TimerControl>,
    }

    impl Handler for Recorder {
        fn on_readable(&mut self, event_loop: &mut EventLoop, fd: RawFd) {
            self.readable.push(fd);
            event_loop.stop();
        }

        fn on_timer(&mut self, event_loop: &mut EventLoop, owner: SubscriberId, timer: TimerHandle) -> TimerControl {
            self.ticks.push((owner, timer));
            if self.ticks.len() >= self.stop_after_ticks {
                event_loop.stop();
            }
            self.tick_control.unwrap_or(TimerControl::Continue)
        }

        fn on_event(&mut self, event_loop: &mut EventLoop, subscriber: SubscriberId, event: &Event) {
            self.events.push((subscriber, event.kind()));
            if let Some(next) = self.refire.take() {
                event_loop.fire_event(next);
            }
        }

        fn on_wake(&mut self, _event_loop: &mut EventLoop) {
            self.wakes += 1;
        }
    }

    #[test]
    fn test_events_in_registration_order() {
        let mut event_loop = EventLoop::new().unwrap();
        event_loop.register_event(EventKind::DeviceCleanup, 2);
        event_loop.register_event(EventKind::DeviceCleanup, 0);
        event_loop.register_event(EventKind::DeviceReport, 1);
        event_loop.register_event(EventKind::DeviceCleanup, 1);

        let mut recorder = Recorder::default();
        event_loop.fire_event(Event::DeviceCleanup);
        event_loop.process_events(&mut recorder);

        assert_eq!(
            recorder.events,
            vec![
                (2, EventKind::DeviceCleanup),
                (0, EventKind::DeviceCleanup),
                (1, EventKind::DeviceCleanup),
            ]
        );
        assert_eq!(event_loop.pending_events(), 0);
    }

    #[test]
    fn test_reentrant_fire_is_queued() {
        let mut event_loop = EventLoop::new().unwrap();
        event_loop.register_event(EventKind::DeviceCleanup, 0);
        event_loop.register_event(EventKind::DeviceCleanup, 1);
        event_loop.register_event(EventKind::LoadProfile, 0);

        let mut recorder = Recorder {
            refire: Some(Event::LoadProfile("a".to_string())),
            ..Default::default()
        };
        event_loop.fire_event(Event::DeviceCleanup);
        event_loop.process_events(&mut recorder);

        // The refired event runs after every cleanup subscriber, not in between
        assert_eq!(
            recorder.events,
            vec![
                (0, EventKind::DeviceCleanup),
                (1, EventKind::DeviceCleanup),
                (0, EventKind::LoadProfile),
            ]
        );
    }

    #[test]
    fn test_unregister_event() {
        let mut event_loop = EventLoop::new().unwrap();
        event_loop.register_event(EventKind::DeviceCleanup, 0);
        event_loop.register_event(EventKind::DeviceCleanup, 0);
        event_loop.unregister_event(EventKind::DeviceCleanup, 0);

        let mut recorder = Recorder::default();
        event_loop.fire_event(Event::DeviceCleanup);
        event_loop.process_events(&mut recorder);
        assert!(recorder.events.is_empty());
    }

    #[test]
    fn test_timer_fires_until_stopped() {
        let mut event_loop = EventLoop::new().unwrap();
        let timer = event_loop.create_timer(Duration::from_millis(1), 3).unwrap();
        assert!(!event_loop.is_timer_armed(timer));
        event_loop.start_timer(timer).unwrap();
        assert!(event_loop.is_timer_armed(timer));

        let mut recorder = Recorder {
            stop_after_ticks: 3,
            ..Default::default()
        };
        event_loop.run(&mut recorder).unwrap();

        assert_eq!(recorder.ticks.len(), 3);
        assert!(recorder.ticks.iter().all(|&(owner, t)| owner == 3 && t == timer));
    }

    #[test]
    fn test_timer_stop_control_disarms() {
        let mut event_loop = EventLoop::new().unwrap();
        let timer = event_loop.create_timer(Duration::from_millis(1), 0).unwrap();
        event_loop.start_timer(timer).unwrap();

        let mut recorder = Recorder {
            stop_after_ticks: 1,
            tick_control: Some(TimerControl::Stop),
            ..Default::default()
        };
        event_loop.run(&mut recorder).unwrap();

        assert_eq!(recorder.ticks.len(), 1);
        assert!(!event_loop.is_timer_armed(timer));
    }

    #[test]
    fn test_watch_readable() {
        let (mut sender, receiver) = mio::unix::pipe::new().unwrap();
        let fd = std::os::fd::AsRawFd::as_raw_fd(&receiver);

        let mut event_loop = EventLoop::new().unwrap();
        event_loop.watch(fd).unwrap();
        assert!(event_loop.is_watching(fd));

        sender.write_all(b"x").unwrap();
        let mut recorder = Recorder::default();
        event_loop.run(&mut recorder).unwrap();
        assert_eq!(recorder.readable, vec![fd]);

        event_loop.unwatch(fd);
        assert!(!event_loop.is_watching(fd));
    }

    #[test]
    fn test_stop_from_other_thread() {
        let mut event_loop = EventLoop::new().unwrap();
        let handle = event_loop.handle();

        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.stop();
        });

        let mut recorder = Recorder::default();
        event_loop.run(&mut recorder).unwrap();
        stopper.join().unwrap();

        assert!(event_loop.is_stopped());
        assert!(recorder.wakes <= 1);
    }

    #[test]
    fn test_wake_dispatches_on_wake() {
        let mut event_loop = EventLoop::new().unwrap();
        let timer = event_loop.create_timer(Duration::from_millis(50), 0).unwrap();
        event_loop.start_timer(timer).unwrap();
        event_loop.handle().wake();

        let mut recorder = Recorder {
            stop_after_ticks: 1,
            ..Default::default()
        };
        event_loop.run(&mut recorder).unwrap();
        assert_eq!(recorder.wakes, 1);
    }
}
