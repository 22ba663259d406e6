//! Cancellation Token
//!
//! Cooperative stop signal shared between a controller and the thread doing
//! the work. Every sleep in playback goes through [`CancelToken::sleep`], so a
//! stop request wakes the sleeper immediately instead of waiting the delay out.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Delays at or above this length are slept in [`SLICE`] chunks
pub const SLICED_THRESHOLD: Duration = Duration::from_secs(2);

/// Slice length for long sleeps
pub const SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct Signal {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Clonable stop signal
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    signal: Arc<Signal>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every sleeper
    pub fn cancel(&self) {
        *self.signal.cancelled.lock() = true;
        self.signal.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.cancelled.lock()
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` when the full duration elapsed, `false` on cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.signal.cancelled.lock();
        while !*cancelled {
            if self.signal.wake.wait_until(&mut cancelled, deadline).timed_out() {
                return !*cancelled;
            }
        }
        false
    }

    /// Like [`sleep`](Self::sleep) but long delays are taken one slice at a
    /// time with a cancellation check between slices.
    pub fn sleep_sliced(&self, duration: Duration) -> bool {
        if duration < SLICED_THRESHOLD {
            return self.sleep(duration);
        }

        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let slice = remaining.min(SLICE);
            if !self.sleep(slice) {
                return false;
            }
            remaining -= slice;
        }
        !self.is_cancelled()
    }
}
