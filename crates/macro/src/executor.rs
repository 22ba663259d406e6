//! Playback Executor - Emits mapped step sequences
//!
//! Taps each step's key (combos hold their modifiers for the duration of the
//! tap), then waits the step's delay on the cancellation token. Cancellation
//! is checked before every emit and wakes any sleep immediately.
//!
//! An executor never re-enters itself: a second `play` while one is in flight
//! fails with `Busy`. Executors created with [`PlaybackExecutor::sibling`]
//! share the emitter, whose lock keeps individual keystrokes from interleaving.

use crate::input_sender::{EmitError, SharedEmitter};
use keyrelay_core::cancel::CancelToken;
use keyrelay_core::keys::{KeyToken, MappedStep};
use keyrelay_core::mapping::Mapping;
use keyrelay_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay handling for a playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// User trigger: the last step's delay is skipped
    Trigger,
    /// Built-in recipe: every delay is observed, long ones in 1 s slices
    Recipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed { emitted: usize },
    Cancelled { emitted: usize },
}

/// Synthesises step sequences into the OS input stream
pub struct PlaybackExecutor {
    emitter: SharedEmitter,
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PlaybackExecutor {
    pub fn new(emitter: SharedEmitter) -> Self {
        Self {
            emitter,
            busy: AtomicBool::new(false),
        }
    }

    /// A separate executor writing through the same emitter
    pub fn sibling(&self) -> Self {
        Self::new(Arc::clone(&self.emitter))
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Play a mapping with trigger pacing
    pub fn play_mapping(&self, mapping: &Mapping, cancel: &CancelToken) -> Result<PlaybackOutcome> {
        debug!("Playing mapping '{}' ({} steps)", mapping.name, mapping.steps.len());
        self.play(&mapping.steps, cancel, Pacing::Trigger)
    }

    /// Emit `steps` in order.
    ///
    /// Returns `Busy` if this executor is already playing and
    /// `EmitFailed { step_index }` when the OS rejects a keystroke; no
    /// further steps are emitted after a failure.
    pub fn play(&self, steps: &[MappedStep], cancel: &CancelToken, pacing: Pacing) -> Result<PlaybackOutcome> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        for (index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("Playback cancelled before step {}", index);
                return Ok(PlaybackOutcome::Cancelled { emitted: index });
            }

            if let Err(e) = self.emit(&step.key) {
                warn!("Emit failed at step {} ({}): {}", index, step.key, e);
                return Err(Error::EmitFailed {
                    step_index: index,
                    reason: e.to_string(),
                });
            }

            let last = index + 1 == steps.len();
            if step.delay_ms == 0 || (last && pacing == Pacing::Trigger) {
                continue;
            }

            let delay = Duration::from_millis(u64::from(step.delay_ms));
            let slept = match pacing {
                Pacing::Trigger => cancel.sleep(delay),
                Pacing::Recipe => cancel.sleep_sliced(delay),
            };
            if !slept {
                debug!("Playback cancelled during delay after step {}", index);
                return Ok(PlaybackOutcome::Cancelled { emitted: index + 1 });
            }
        }

        Ok(PlaybackOutcome::Completed {
            emitted: steps.len(),
        })
    }

    fn emit(&self, key: &KeyToken) -> std::result::Result<(), EmitError> {
        let mut emitter = self.emitter.lock();
        match key {
            KeyToken::Simple(code) => emitter.tap(*code),
            KeyToken::Combo { key: main, .. } => emitter.tap_with_modifiers(*main, &key.modifiers()),
        }
    }
}
