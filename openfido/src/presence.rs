//! User presence sources for hosted devices

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use openfido_ctap::{KeepaliveStatus, UserPresence};

/// Approves every presence test at once
///
/// For unattended test rigs; a real device must ask a human.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl UserPresence for AutoApprove {
    fn poll_presence(&mut self) -> bool {
        true
    }

    fn prompt(&mut self) {
        log::info!("user presence auto-approved");
    }

    fn wink(&mut self) {
        log::info!("wink");
    }
}

/// A touch sensor that another thread presses
///
/// Each press satisfies exactly one presence test.
#[derive(Debug, Clone)]
pub struct PresenceButton {
    pressed: Arc<AtomicBool>,
    idle: Duration,
}

impl PresenceButton {
    pub fn new() -> Self {
        Self {
            pressed: Arc::new(AtomicBool::new(false)),
            idle: Duration::from_millis(10),
        }
    }

    /// Handle to press the button from elsewhere
    pub fn handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.pressed)
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::SeqCst);
    }
}

impl Default for PresenceButton {
    fn default() -> Self {
        Self::new()
    }
}

impl UserPresence for PresenceButton {
    fn poll_presence(&mut self) -> bool {
        self.pressed.swap(false, Ordering::SeqCst)
    }

    fn prompt(&mut self) {
        // a press left over from an earlier request must not count
        self.pressed.store(false, Ordering::SeqCst);
        log::info!("waiting for user presence");
    }

    fn keepalive(&mut self, status: KeepaliveStatus) {
        log::debug!("keepalive {status:?}");
    }

    fn idle(&mut self) {
        std::thread::sleep(self.idle);
    }

    fn done(&mut self) {
        log::debug!("presence wait finished");
    }

    fn wink(&mut self) {
        log::info!("wink");
    }
}
