//! Test doubles for the OS edges: a recording emitter and a channel-driven hook.

use crate::input_hooks::{HookError, HookSink, InputHook};
use crate::input_sender::{EmitError, KeyEmitter};
use crate::types::{KeyEvent, KeyKind};
use keyrelay_core::keys::{KeyCode, Modifier};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emitted {
    Tap(KeyCode),
    Combo(Vec<Modifier>, KeyCode),
}

/// Shared view of what a [`RecordingEmitter`] produced
#[derive(Clone, Default)]
pub struct EmitLog(Arc<Mutex<Vec<(Emitted, Instant)>>>);

impl EmitLog {
    pub fn keys(&self) -> Vec<Emitted> {
        self.0.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.0.lock().iter().map(|(_, t)| *t).collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Records every keystroke; optionally rejects the n-th call
pub struct RecordingEmitter {
    log: EmitLog,
    fail_on_call: Option<usize>,
    calls: usize,
}

impl RecordingEmitter {
    pub fn new() -> (Self, EmitLog) {
        Self::build(None)
    }

    /// Reject the call with zero-based index `n`
    pub fn failing_on(n: usize) -> (Self, EmitLog) {
        Self::build(Some(n))
    }

    fn build(fail_on_call: Option<usize>) -> (Self, EmitLog) {
        let log = EmitLog::default();
        let emitter = Self {
            log: log.clone(),
            fail_on_call,
            calls: 0,
        };
        (emitter, log)
    }

    fn record(&mut self, emitted: Emitted) -> Result<(), EmitError> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_on_call == Some(call) {
            return Err(EmitError::Rejected("simulated failure".into()));
        }
        self.log.0.lock().push((emitted, Instant::now()));
        Ok(())
    }
}

impl KeyEmitter for RecordingEmitter {
    fn tap(&mut self, key: KeyCode) -> Result<(), EmitError> {
        self.record(Emitted::Tap(key))
    }

    fn tap_with_modifiers(&mut self, key: KeyCode, modifiers: &[Modifier]) -> Result<(), EmitError> {
        self.record(Emitted::Combo(modifiers.to_vec(), key))
    }
}

/// Hook whose events are pushed by the test through a [`HookDriver`]
pub struct ChannelHook {
    slot: Arc<Mutex<Option<HookSink>>>,
}

#[derive(Clone)]
pub struct HookDriver {
    slot: Arc<Mutex<Option<HookSink>>>,
}

impl ChannelHook {
    pub fn new() -> (Self, HookDriver) {
        let slot = Arc::new(Mutex::new(None));
        (
            Self {
                slot: Arc::clone(&slot),
            },
            HookDriver { slot },
        )
    }
}

impl InputHook for ChannelHook {
    fn start(&mut self, sink: HookSink) -> Result<(), HookError> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(HookError::AlreadyRunning);
        }
        *slot = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.slot.lock().take();
    }

    fn is_running(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl HookDriver {
    fn send(&self, kind: KeyKind, code: KeyCode) {
        if let Some(sink) = self.slot.lock().as_ref() {
            sink.deliver(KeyEvent::new(kind, code.vk()));
        }
    }

    pub fn press(&self, code: KeyCode) {
        self.send(KeyKind::Down, code);
    }

    pub fn release(&self, code: KeyCode) {
        self.send(KeyKind::Up, code);
    }

    /// Simulate the listener dying: report a fault and detach like a real hook
    pub fn crash(&self, message: &str) {
        if let Some(sink) = self.slot.lock().take() {
            sink.fault(message);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Poll `condition` every 10 ms until it holds or `timeout` passes
pub fn wait_until(timeout: std::time::Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    condition()
}
