//! Indicator actuation on lock.
//!
//! The first lock of a session switches the indicator on at once and arms a
//! background timer that switches it off after a fixed delay. The caller is
//! never blocked by the delay.

use crate::link::{Command, Delivery, HardwareLink};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const DEFAULT_DEACTIVATE_AFTER: Duration = Duration::from_secs(10);

/// Send a command and log the outcome. Write failures are not fatal.
fn deliver(link: &HardwareLink, command: Command) {
    match link.send(command) {
        Ok(Delivery::Sent) => {
            tracing::info!(?command, link = link.name(), "indicator command sent")
        }
        Ok(Delivery::Simulated) => {}
        Err(e) => tracing::warn!(?command, error = %e, "indicator command lost"),
    }
}

/// Pending deactivation running on its own thread.
pub struct DeactivationTimer {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl DeactivationTimer {
    /// Start a timer that sends [`Command::Deactivate`] after `delay`.
    pub fn start(link: Arc<HardwareLink>, delay: Duration) -> std::io::Result<Self> {
        let (cancel, rx) = mpsc::channel::<()>();
        let deadline = Instant::now() + delay;
        let handle = std::thread::Builder::new()
            .name("warden-deactivate".into())
            .spawn(move || {
                match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(()) => {
                        tracing::debug!("deactivation cancelled");
                        return;
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    // Owner let go of the handle; the timer still runs out.
                    Err(RecvTimeoutError::Disconnected) => {
                        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    }
                }
                deliver(&link, Command::Deactivate);
            })?;
        Ok(Self { cancel, handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the timer before it fires.
    pub fn cancel(self) {
        let _ = self.cancel.send(());
        let _ = self.handle.join();
    }

    /// Block until the timer has fired.
    pub fn wait(self) {
        let Self { cancel, handle } = self;
        drop(cancel);
        if handle.join().is_err() {
            tracing::error!("deactivation thread panicked");
        }
    }
}

/// Reacts to locks by driving the indicator.
pub struct ActuationController {
    link: Arc<HardwareLink>,
    delay: Duration,
    armed: bool,
    timer: Option<DeactivationTimer>,
}

impl ActuationController {
    pub fn new(link: Arc<HardwareLink>, delay: Duration) -> Self {
        Self {
            link,
            delay,
            armed: false,
            timer: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Handle a lock. Returns `false` when the controller already fired.
    pub fn on_locked(&mut self) -> bool {
        if self.armed {
            tracing::debug!("indicator already armed, ignoring lock");
            return false;
        }
        self.armed = true;

        deliver(&self.link, Command::Activate);
        match DeactivationTimer::start(Arc::clone(&self.link), self.delay) {
            Ok(timer) => {
                tracing::info!(delay_secs = self.delay.as_secs_f32(), "deactivation scheduled");
                self.timer = Some(timer);
            }
            Err(e) => tracing::error!(error = %e, "failed to start deactivation timer"),
        }
        true
    }

    /// Cancel a pending deactivation. Returns `true` if one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.cancel();
                true
            }
            None => false,
        }
    }

    /// Hand over the pending timer, if any, so it can outlive the controller.
    pub fn into_pending(mut self) -> Option<DeactivationTimer> {
        self.timer.take()
    }
}
