use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use velux_common::{PositionTracker, RemoteAction, RemoteButton, RemoteConfig};

use crate::hw::RemoteOutputs;

/// The remote's contacts together with the believed selector cursor. Only
/// reachable through [`ActuationSerializer::acquire`].
pub struct Actuator {
    remote: Box<dyn RemoteOutputs>,
    tracker: PositionTracker,
    config: RemoteConfig,
}

impl Actuator {
    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut PositionTracker {
        &mut self.tracker
    }

    /// Releases every contact.
    pub fn park(&mut self) {
        for button in RemoteButton::ALL {
            self.set(button, false);
        }
    }

    /// Runs a press sequence to completion. A failed pin write is logged and
    /// the rest of the sequence still runs so nothing stays asserted.
    pub async fn run(&mut self, actions: Vec<RemoteAction>) {
        for action in actions {
            match action {
                RemoteAction::Press(button) => self.set(button, true),
                RemoteAction::Release(button) => self.set(button, false),
                RemoteAction::Delay(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            }
        }
    }

    fn set(&mut self, button: RemoteButton, pressed: bool) {
        let level = button.level(pressed);
        if let Err(err) = self.remote.set_level(button, level) {
            warn!("remote contact write failed: {err}");
        } else {
            debug!(?button, pressed, level, "remote contact");
        }
    }
}

/// Guarantees at most one physical operation on the remote at a time.
///
/// Waiters queue in arrival order and are woken as soon as the holder drops
/// its guard.
pub struct ActuationSerializer {
    actuator: Mutex<Actuator>,
}

pub type ActuationGuard<'a> = MutexGuard<'a, Actuator>;

impl ActuationSerializer {
    pub fn new(remote: Box<dyn RemoteOutputs>, config: RemoteConfig) -> Self {
        let tracker = PositionTracker::new(config.window_count);
        Self {
            actuator: Mutex::new(Actuator {
                remote,
                tracker,
                config,
            }),
        }
    }

    /// Blocks until no other operation holds the remote. Dropping the guard
    /// releases it.
    pub async fn acquire(&self) -> ActuationGuard<'_> {
        self.actuator.lock().await
    }

    pub fn is_busy(&self) -> bool {
        self.actuator.try_lock().is_err()
    }
}
