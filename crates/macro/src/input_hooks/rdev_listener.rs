//! rdev Listener
//!
//! Global keyboard listener for non-Windows platforms built on `rdev::listen`.
//! rdev cannot be unregistered once listening, so a single listener thread
//! is spawned for the life of the process and `stop` simply detaches the sink.
//! Keys are translated into Windows virtual-key codes; keys outside the key
//! table are not forwarded.

use super::{HookError, HookSink, InputHook};
use crate::types::{KeyEvent, KeyKind};
use parking_lot::Mutex;
use rdev::{EventType, Key};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread;
use tracing::{error, info};

static RDEV_SINK: OnceLock<Mutex<Option<HookSink>>> = OnceLock::new();
static LISTENER_SPAWNED: AtomicBool = AtomicBool::new(false);

fn sink_slot() -> &'static Mutex<Option<HookSink>> {
    RDEV_SINK.get_or_init(|| Mutex::new(None))
}

/// rdev-backed keyboard listener
#[derive(Debug, Default)]
pub struct RdevListener {
    attached: bool,
}

impl RdevListener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputHook for RdevListener {
    fn start(&mut self, sink: HookSink) -> Result<(), HookError> {
        {
            let mut slot = sink_slot().lock();
            if slot.is_some() {
                return Err(HookError::AlreadyRunning);
            }
            *slot = Some(sink);
        }
        self.attached = true;

        if !LISTENER_SPAWNED.swap(true, Ordering::SeqCst) {
            let spawned = thread::Builder::new()
                .name("keyrelay-rdev".into())
                .spawn(|| {
                    info!("rdev listener started");
                    if let Err(e) = rdev::listen(on_event) {
                        error!("rdev listener failed: {:?}", e);
                        LISTENER_SPAWNED.store(false, Ordering::SeqCst);
                        if let Some(sink) = sink_slot().lock().take() {
                            sink.fault(format!("rdev listener failed: {:?}", e));
                        }
                    }
                });
            if let Err(e) = spawned {
                LISTENER_SPAWNED.store(false, Ordering::SeqCst);
                sink_slot().lock().take();
                self.attached = false;
                return Err(HookError::Install(e.to_string()));
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.attached {
            sink_slot().lock().take();
            self.attached = false;
        }
    }

    fn is_running(&self) -> bool {
        self.attached && sink_slot().lock().is_some()
    }
}

fn on_event(event: rdev::Event) {
    let forwarded = panic::catch_unwind(AssertUnwindSafe(|| {
        let (kind, key) = match event.event_type {
            EventType::KeyPress(key) => (KeyKind::Down, key),
            EventType::KeyRelease(key) => (KeyKind::Up, key),
            _ => return,
        };
        let Some(raw_code) = vk_for(key) else {
            return;
        };
        if let Some(sink) = sink_slot().lock().as_ref() {
            sink.deliver(KeyEvent::new(kind, raw_code));
        }
    }));

    if forwarded.is_err() {
        if let Some(sink) = sink_slot().lock().take() {
            sink.fault("rdev callback panicked");
        }
    }
}

/// Windows virtual-key code for an rdev key
fn vk_for(key: Key) -> Option<u16> {
    let vk = match key {
        Key::Num0 => 0x30,
        Key::Num1 => 0x31,
        Key::Num2 => 0x32,
        Key::Num3 => 0x33,
        Key::Num4 => 0x34,
        Key::Num5 => 0x35,
        Key::Num6 => 0x36,
        Key::Num7 => 0x37,
        Key::Num8 => 0x38,
        Key::Num9 => 0x39,
        Key::KeyA => 0x41,
        Key::KeyB => 0x42,
        Key::KeyC => 0x43,
        Key::KeyD => 0x44,
        Key::KeyE => 0x45,
        Key::KeyF => 0x46,
        Key::KeyG => 0x47,
        Key::KeyH => 0x48,
        Key::KeyI => 0x49,
        Key::KeyJ => 0x4A,
        Key::KeyK => 0x4B,
        Key::KeyL => 0x4C,
        Key::KeyM => 0x4D,
        Key::KeyN => 0x4E,
        Key::KeyO => 0x4F,
        Key::KeyP => 0x50,
        Key::KeyQ => 0x51,
        Key::KeyR => 0x52,
        Key::KeyS => 0x53,
        Key::KeyT => 0x54,
        Key::KeyU => 0x55,
        Key::KeyV => 0x56,
        Key::KeyW => 0x57,
        Key::KeyX => 0x58,
        Key::KeyY => 0x59,
        Key::KeyZ => 0x5A,
        Key::F1 => 0x70,
        Key::F2 => 0x71,
        Key::F3 => 0x72,
        Key::F4 => 0x73,
        Key::F5 => 0x74,
        Key::F6 => 0x75,
        Key::F7 => 0x76,
        Key::F8 => 0x77,
        Key::F9 => 0x78,
        Key::F10 => 0x79,
        Key::F11 => 0x7A,
        Key::F12 => 0x7B,
        Key::LeftArrow => 0x25,
        Key::UpArrow => 0x26,
        Key::RightArrow => 0x27,
        Key::DownArrow => 0x28,
        Key::Space => 0x20,
        Key::Return => 0x0D,
        Key::Escape => 0x1B,
        Key::Tab => 0x09,
        Key::Backspace => 0x08,
        Key::Delete => 0x2E,
        Key::Home => 0x24,
        Key::End => 0x23,
        Key::PageUp => 0x21,
        Key::PageDown => 0x22,
        Key::Insert => 0x2D,
        Key::Kp0 => 0x60,
        Key::Kp1 => 0x61,
        Key::Kp2 => 0x62,
        Key::Kp3 => 0x63,
        Key::Kp4 => 0x64,
        Key::Kp5 => 0x65,
        Key::Kp6 => 0x66,
        Key::Kp7 => 0x67,
        Key::Kp8 => 0x68,
        Key::Kp9 => 0x69,
        Key::KpMultiply => 0x6A,
        Key::KpPlus => 0x6B,
        Key::KpMinus => 0x6D,
        Key::KpDelete => 0x6E,
        Key::KpDivide => 0x6F,
        Key::ShiftLeft | Key::ShiftRight => 0x10,
        Key::ControlLeft | Key::ControlRight => 0x11,
        Key::Alt | Key::AltGr => 0x12,
        Key::MetaLeft | Key::MetaRight => 0x5B,
        _ => return None,
    };
    Some(vk)
}
