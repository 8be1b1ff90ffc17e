//! # Session Supervisor
//!
//! Owns the controller session threads and hands discovered devices to them.
//!
//! Pinned sessions come from `[[controllers]]` and live for the whole
//! process. When a device shows up and no session is idle, a dynamic session
//! is spawned for it (if enabled) and exits once that device disconnects.
//!
//! Every scan tick first reaps finished threads and checks the error flags;
//! a flagged session stops the whole process.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::Notify;
use tracing::{debug, info, info_span, warn};

use crate::config::{Config, ProfileOptions};
use crate::device::discovery::Discovery;
use crate::device::Ds4Device;
use crate::error::FatalSessionError;
use crate::output::layout::LayoutRegistry;
use crate::output::VirtualDeviceFactory;
use crate::session::{Session, SessionHandle};

struct SessionThread {
    handle: SessionHandle,
    thread: JoinHandle<Result<(), FatalSessionError>>,
}

pub struct Supervisor {
    config: Arc<Config>,
    layouts: Arc<LayoutRegistry>,
    factory: Arc<dyn VirtualDeviceFactory>,
    sessions: Vec<SessionThread>,

    /// Index of the next dynamic session, never reused
    next_index: usize,

    /// Signalled by sessions after every device cleanup
    disconnect: Arc<Notify>,
}

impl Supervisor {
    pub fn new(config: Arc<Config>, layouts: Arc<LayoutRegistry>, factory: Arc<dyn VirtualDeviceFactory>) -> Self {
        let next_index = config.controllers.len() + 1;
        Self {
            config,
            layouts,
            factory,
            next_index,
            sessions: Vec::new(),
            disconnect: Arc::new(Notify::new()),
        }
    }

    /// Spawn one session per `[[controllers]]` entry, indexed from 1
    ///
    /// # Errors
    ///
    /// Fails if any session cannot be created.
    pub fn start(&mut self) -> Result<(), FatalSessionError> {
        let config = self.config.clone();
        for (i, options) in config.controllers.iter().enumerate() {
            self.spawn(i + 1, false, options)?;
        }
        Ok(())
    }

    fn spawn(&mut self, index: usize, dynamic: bool, options: &ProfileOptions) -> Result<SessionHandle, FatalSessionError> {
        let span = info_span!("controller", index);
        let (session, handle) = span.in_scope(|| {
            Session::new(
                index,
                dynamic,
                options,
                &self.config,
                self.layouts.clone(),
                self.factory.clone(),
                Some(self.disconnect.clone()),
            )
        })?;

        let thread = std::thread::Builder::new()
            .name(format!("controller-{}", index))
            .spawn(move || {
                let _enter = span.enter();
                session.run()
            })
            .map_err(FatalSessionError::EventLoop)?;

        debug!("Spawned {} session {}", if dynamic { "dynamic" } else { "pinned" }, index);
        self.sessions.push(SessionThread {
            handle: handle.clone(),
            thread,
        });
        Ok(handle)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Addresses of every attached device
    pub fn connected(&self) -> HashSet<String> {
        self.sessions
            .iter()
            .filter_map(|s| s.handle.address())
            .collect()
    }

    /// False while `max_devices` controllers are attached
    pub fn has_room(&self) -> bool {
        let max = self.config.driver.max_devices;
        max == 0 || self.connected().len() < max
    }

    /// Wait until another device may be admitted
    pub async fn wait_for_slot(&self) {
        while !self.has_room() {
            self.disconnect.notified().await;
        }
    }

    /// Check error flags and drop sessions whose thread exited
    ///
    /// # Errors
    ///
    /// Returns the first fatal session error found.
    pub fn reap(&mut self) -> Result<(), FatalSessionError> {
        if let Some(flagged) = self.sessions.iter().find(|s| s.handle.has_error()) {
            return Err(FatalSessionError::Flagged {
                index: flagged.handle.index,
            });
        }

        let (finished, running): (Vec<_>, Vec<_>) =
            self.sessions.drain(..).partition(|s| s.thread.is_finished());
        self.sessions = running;

        for session in finished {
            let index = session.handle.index;
            match session.thread.join() {
                Ok(Ok(())) => debug!("Session {} exited", index),
                Ok(Err(err)) => return Err(err),
                Err(_) => return Err(FatalSessionError::Flagged { index }),
            }
        }
        Ok(())
    }

    /// Give `device` to an idle session, spawning a dynamic one if needed
    ///
    /// # Errors
    ///
    /// Fails if a needed dynamic session cannot be created.
    pub fn assign(&mut self, device: Ds4Device) -> Result<(), FatalSessionError> {
        if self.connected().contains(device.address()) {
            warn!("Ignoring already connected device: {}", device.address());
            return Ok(());
        }

        let address = device.address().to_string();
        let mut device = device;
        for session in self.sessions.iter().filter(|s| s.handle.is_idle()) {
            match session.handle.assign(device) {
                Ok(()) => {
                    debug!("Assigned {} to session {}", address, session.handle.index);
                    return Ok(());
                }
                Err(returned) => device = returned,
            }
        }

        if !self.config.driver.dynamic_sessions {
            warn!("No free controller slot for {}", device.name());
            return Ok(());
        }

        let index = self.next_index;
        self.next_index += 1;
        let options = self.config.default.clone();
        let handle = self.spawn(index, true, &options)?;
        if let Err(device) = handle.assign(device) {
            warn!("Session {} exited before taking {}", index, device.name());
        }
        Ok(())
    }

    /// Stop every session and wait for the threads
    ///
    /// # Errors
    ///
    /// Returns the first fatal error a session exited with.
    pub fn shutdown(&mut self) -> Result<(), FatalSessionError> {
        for session in &self.sessions {
            session.handle.stop();
        }

        let mut first = None;
        for session in self.sessions.drain(..) {
            let index = session.handle.index;
            let result = match session.thread.join() {
                Ok(result) => result,
                Err(_) => Err(FatalSessionError::Flagged { index }),
            };
            if let Err(err) = result {
                first.get_or_insert(err);
            }
        }

        info!("All controller sessions stopped");
        first.map_or(Ok(()), Err)
    }
}

/// Run every discovery source once, off the async runtime
///
/// Returns the sources for the next tick along with the found devices.
pub async fn discover(
    mut sources: Vec<Box<dyn Discovery>>,
    connected: HashSet<String>,
) -> (Vec<Box<dyn Discovery>>, Vec<Ds4Device>) {
    let scan = tokio::task::spawn_blocking(move || {
        let mut devices = Vec::new();
        for source in sources.iter_mut() {
            devices.extend(source.scan(&connected));
        }
        (sources, devices)
    });

    match scan.await {
        Ok(result) => result,
        Err(e) => {
            warn!("Device scan failed: {}", e);
            (Vec::new(), Vec::new())
        }
    }
}
