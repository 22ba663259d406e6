//! Input Sending Module
//!
//! Keystroke synthesis behind the [`KeyEmitter`] trait. Windows uses
//! `SendInput` directly; other platforms go through enigo.

mod enigo_sender;
#[cfg(windows)]
mod keyboard;

pub use enigo_sender::EnigoEmitter;
#[cfg(windows)]
pub use keyboard::SendInputEmitter;

use keyrelay_core::keys::{KeyCode, Modifier};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("input rejected by the OS: {0}")]
    Rejected(String),

    #[error("key '{0}' cannot be emitted on this platform")]
    Unsupported(KeyCode),
}

/// OS keystroke output
pub trait KeyEmitter: Send {
    /// Press and release a single key
    fn tap(&mut self, key: KeyCode) -> Result<(), EmitError>;

    /// Press modifiers in order, tap `key`, release modifiers in reverse
    fn tap_with_modifiers(&mut self, key: KeyCode, modifiers: &[Modifier]) -> Result<(), EmitError>;
}

/// One low-level key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub vk: u16,
    pub up: bool,
}

/// Down/up order for a combo: modifiers down, key down, key up, modifiers up in reverse
pub fn combo_strokes(key: KeyCode, modifiers: &[Modifier]) -> Vec<KeyStroke> {
    let mut strokes = Vec::with_capacity(modifiers.len() * 2 + 2);
    strokes.extend(modifiers.iter().map(|m| KeyStroke { vk: m.vk(), up: false }));
    strokes.push(KeyStroke { vk: key.vk(), up: false });
    strokes.push(KeyStroke { vk: key.vk(), up: true });
    strokes.extend(modifiers.iter().rev().map(|m| KeyStroke { vk: m.vk(), up: true }));
    strokes
}

/// Keys that live on the extended (E0-prefixed) scan-code set. Without the
/// extended flag `SendInput` may deliver the numpad twin, e.g. num7 for home.
pub fn is_extended_vk(vk: u16) -> bool {
    matches!(
        vk,
        0x21..=0x28 // pageup, pagedown, end, home, arrows
            | 0x2C // print screen
            | 0x2D // insert
            | 0x2E // delete
            | 0x5B..=0x5D // lwin, rwin, apps
            | 0x6F // numdiv
            | 0x90 // numlock
            | 0xA3 // rctrl
            | 0xA5 // ralt
    )
}

/// Emitter shared by every executor; the lock serialises emission
pub type SharedEmitter = Arc<Mutex<Box<dyn KeyEmitter>>>;

pub fn shared(emitter: Box<dyn KeyEmitter>) -> SharedEmitter {
    Arc::new(Mutex::new(emitter))
}

/// The emitter for the current platform
pub fn platform_emitter() -> Box<dyn KeyEmitter> {
    #[cfg(windows)]
    {
        Box::new(SendInputEmitter::new())
    }
    #[cfg(not(windows))]
    {
        Box::new(EnigoEmitter::new())
    }
}
