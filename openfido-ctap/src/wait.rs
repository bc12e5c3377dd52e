//! Cooperative waits
//!
//! Every blocking point of the engine is a bounded polling loop that yields
//! to an idle hook between samples. The loop ends on one of a fixed set of
//! named conditions.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

/// Millisecond time source
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Monotonic clock backed by [`std::time::Instant`]
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Shared cancel flag
///
/// Transports hold a clone and raise it when a CANCEL command arrives. The
/// presence wait consumes it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Read and clear the flag
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Why a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    /// The awaited event happened
    Completion,
    /// The deadline passed first
    Timeout,
    /// The cancel token was raised
    Cancelled,
}

/// A bounded wait: optional deadline plus optional cancel token
pub struct Wait<'a> {
    clock: &'a dyn Clock,
    deadline: Option<u64>,
    cancel: Option<&'a CancelToken>,
}

impl<'a> Wait<'a> {
    pub fn new(clock: &'a dyn Clock) -> Self {
        Self {
            clock,
            deadline: None,
            cancel: None,
        }
    }

    pub fn timeout_ms(mut self, timeout: u64) -> Self {
        self.deadline = Some(self.clock.now_ms().saturating_add(timeout));
        self
    }

    pub fn cancel_on(mut self, token: &'a CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll `done` on `target` until it returns true, calling `idle` between
    /// samples.
    ///
    /// Cancellation is checked before completion; the deadline last.
    pub fn until<T: ?Sized>(
        self,
        target: &mut T,
        mut done: impl FnMut(&mut T) -> bool,
        mut idle: impl FnMut(&mut T),
    ) -> WaitCondition {
        loop {
            if let Some(token) = self.cancel {
                if token.take() {
                    return WaitCondition::Cancelled;
                }
            }
            if done(target) {
                return WaitCondition::Completion;
            }
            if let Some(deadline) = self.deadline {
                if self.clock.now_ms() >= deadline {
                    return WaitCondition::Timeout;
                }
            }
            idle(target);
        }
    }
}
