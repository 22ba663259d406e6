//! Input Reading Module
//!
//! OS-global keyboard listeners. Each backend forwards [`KeyEvent`]s into a
//! [`HookSink`]; the sink never blocks the OS callback. When the bounded
//! channel is full the oldest unread event is discarded and counted.

#[cfg(windows)]
mod input_listener;
#[cfg(windows)]
mod keyboard_hook;
#[cfg(not(windows))]
mod rdev_listener;

#[cfg(windows)]
pub use input_listener::InputListener;
#[cfg(not(windows))]
pub use rdev_listener::RdevListener;

use crate::types::KeyEvent;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("keyboard hook is already installed")]
    AlreadyRunning,

    #[error("failed to install keyboard hook: {0}")]
    Install(String),
}

impl From<HookError> for keyrelay_core::Error {
    fn from(e: HookError) -> Self {
        match e {
            HookError::AlreadyRunning => keyrelay_core::Error::AlreadyRunning("keyboard hook"),
            HookError::Install(reason) => keyrelay_core::Error::Conflict(format!(
                "keyboard hook could not be installed: {}",
                reason
            )),
        }
    }
}

/// A process-wide keyboard listener
pub trait InputHook: Send {
    /// Install the listener; fails with `AlreadyRunning` if one is installed
    fn start(&mut self, sink: HookSink) -> Result<(), HookError>;

    /// Remove the listener; idempotent
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Producer side of the hook -> dispatcher channels
#[derive(Clone)]
pub struct HookSink {
    events: Sender<KeyEvent>,
    overflow: Receiver<KeyEvent>,
    faults: Sender<String>,
    dropped: Arc<AtomicU64>,
}

/// Consumer side handed to the dispatcher
pub struct HookChannels {
    pub events: Receiver<KeyEvent>,
    pub faults: Receiver<String>,
    pub dropped: Arc<AtomicU64>,
}

impl HookSink {
    /// Create a sink with an event buffer of `capacity`
    pub fn channel(capacity: usize) -> (HookSink, HookChannels) {
        let (events_tx, events_rx) = bounded(capacity.max(1));
        let (faults_tx, faults_rx) = bounded(4);
        let dropped = Arc::new(AtomicU64::new(0));

        let sink = HookSink {
            events: events_tx,
            overflow: events_rx.clone(),
            faults: faults_tx,
            dropped: Arc::clone(&dropped),
        };
        let channels = HookChannels {
            events: events_rx,
            faults: faults_rx,
            dropped,
        };
        (sink, channels)
    }

    /// Forward an event without blocking; on overflow the oldest unread event is dropped
    pub fn deliver(&self, event: KeyEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let _ = self.overflow.try_recv();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                let _ = self.events.try_send(event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Report that the listener died and needs teardown
    pub fn fault(&self, message: impl Into<String>) {
        let _ = self.faults.try_send(message.into());
    }
}

/// The listener for the current platform
pub fn platform_hook() -> Box<dyn InputHook> {
    #[cfg(windows)]
    {
        Box::new(InputListener::new())
    }
    #[cfg(not(windows))]
    {
        Box::new(RdevListener::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_drops_oldest() {
        let (sink, channels) = HookSink::channel(2);
        sink.deliver(KeyEvent::down(0x41));
        sink.deliver(KeyEvent::down(0x42));
        sink.deliver(KeyEvent::down(0x43));

        assert_eq!(channels.dropped.load(Ordering::Relaxed), 1);
        let codes: Vec<u16> = channels.events.try_iter().map(|e| e.raw_code).collect();
        assert_eq!(codes, vec![0x42, 0x43]);
    }

    #[test]
    fn test_fault_is_reported() {
        let (sink, channels) = HookSink::channel(1);
        sink.fault("boom");
        assert_eq!(channels.faults.try_recv().unwrap(), "boom");
    }
}
