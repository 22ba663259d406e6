//! enigo Emitter
//!
//! Cross-platform keystroke emitter. An Enigo instance is created per call,
//! which keeps the emitter `Send` on every backend.

use super::{EmitError, KeyEmitter};
use enigo::{
    Direction::{Click, Press, Release},
    Enigo, Key, Keyboard, Settings,
};
use keyrelay_core::keys::{KeyCategory, KeyCode, Modifier};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct EnigoEmitter;

impl EnigoEmitter {
    pub fn new() -> Self {
        Self
    }

    fn connect() -> Result<Enigo, EmitError> {
        Enigo::new(&Settings::default())
            .map_err(|e| EmitError::Rejected(format!("failed to create input connection: {}", e)))
    }
}

impl KeyEmitter for EnigoEmitter {
    fn tap(&mut self, key: KeyCode) -> Result<(), EmitError> {
        let mut enigo = Self::connect()?;
        enigo
            .key(to_enigo_key(key), Click)
            .map_err(|e| EmitError::Rejected(e.to_string()))?;
        debug!("Key tapped: {}", key);
        Ok(())
    }

    fn tap_with_modifiers(&mut self, key: KeyCode, modifiers: &[Modifier]) -> Result<(), EmitError> {
        let mut enigo = Self::connect()?;
        let mut pressed = Vec::with_capacity(modifiers.len());

        let mut result = Ok(());
        for modifier in modifiers {
            if let Err(e) = enigo.key(modifier_key(*modifier), Press) {
                result = Err(EmitError::Rejected(e.to_string()));
                break;
            }
            pressed.push(*modifier);
        }
        if result.is_ok() {
            result = enigo
                .key(to_enigo_key(key), Click)
                .map_err(|e| EmitError::Rejected(e.to_string()));
        }

        // Release whatever was pressed, even after a failure
        for modifier in pressed.iter().rev() {
            if let Err(e) = enigo.key(modifier_key(*modifier), Release) {
                warn!("Failed to release modifier {}: {}", modifier, e);
            }
        }

        if result.is_ok() {
            debug!("Combo tapped: {:?}+{}", modifiers, key);
        }
        result
    }
}

fn modifier_key(modifier: Modifier) -> Key {
    match modifier {
        Modifier::Ctrl => Key::Control,
        Modifier::Shift => Key::Shift,
        Modifier::Alt => Key::Alt,
        Modifier::Cmd => Key::Meta,
    }
}

/// Convert a key to the enigo key
fn to_enigo_key(key: KeyCode) -> Key {
    match key {
        KeyCode::F1 => Key::F1,
        KeyCode::F2 => Key::F2,
        KeyCode::F3 => Key::F3,
        KeyCode::F4 => Key::F4,
        KeyCode::F5 => Key::F5,
        KeyCode::F6 => Key::F6,
        KeyCode::F7 => Key::F7,
        KeyCode::F8 => Key::F8,
        KeyCode::F9 => Key::F9,
        KeyCode::F10 => Key::F10,
        KeyCode::F11 => Key::F11,
        KeyCode::F12 => Key::F12,
        KeyCode::Left => Key::LeftArrow,
        KeyCode::Up => Key::UpArrow,
        KeyCode::Right => Key::RightArrow,
        KeyCode::Down => Key::DownArrow,
        KeyCode::Space => Key::Space,
        KeyCode::Enter => Key::Return,
        KeyCode::Esc => Key::Escape,
        KeyCode::Tab => Key::Tab,
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Delete => Key::Delete,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        #[cfg(not(target_os = "macos"))]
        KeyCode::Insert => Key::Insert,
        // macOS has no Insert; kVK_Help sits in its place
        #[cfg(target_os = "macos")]
        KeyCode::Insert => Key::Other(0x72),
        other => match (keypad_code(other), unicode_for(other)) {
            (Some(code), _) => Key::Other(code),
            (None, Some(c)) => Key::Unicode(c),
            (None, None) => Key::Other(u32::from(other.vk())),
        },
    }
}

/// Character produced by digit and letter keys
fn unicode_for(key: KeyCode) -> Option<char> {
    match key.category() {
        KeyCategory::Digits | KeyCategory::Letters => key.name().chars().next(),
        _ => None,
    }
}

// num0..num9, nummul, numadd, numsub, numdec, numdiv
#[cfg(target_os = "windows")]
const KEYPAD_CODES: [u32; 15] = [
    0x60, 0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6A, 0x6B, 0x6D, 0x6E, 0x6F,
];
#[cfg(target_os = "macos")]
const KEYPAD_CODES: [u32; 15] = [
    0x52, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5B, 0x5C, 0x43, 0x45, 0x4E, 0x41, 0x4B,
];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const KEYPAD_CODES: [u32; 15] = [
    0xFFB0, 0xFFB1, 0xFFB2, 0xFFB3, 0xFFB4, 0xFFB5, 0xFFB6, 0xFFB7, 0xFFB8, 0xFFB9, 0xFFAA, 0xFFAB,
    0xFFAD, 0xFFAE, 0xFFAF,
];

/// Native keypad code (VK, kVK or X keysym) so numpad keys are not typed as
/// main-row characters
fn keypad_code(key: KeyCode) -> Option<u32> {
    let index = match key {
        KeyCode::Num0 => 0,
        KeyCode::Num1 => 1,
        KeyCode::Num2 => 2,
        KeyCode::Num3 => 3,
        KeyCode::Num4 => 4,
        KeyCode::Num5 => 5,
        KeyCode::Num6 => 6,
        KeyCode::Num7 => 7,
        KeyCode::Num8 => 8,
        KeyCode::Num9 => 9,
        KeyCode::NumMul => 10,
        KeyCode::NumAdd => 11,
        KeyCode::NumSub => 12,
        KeyCode::NumDec => 13,
        KeyCode::NumDiv => 14,
        _ => return None,
    };
    Some(KEYPAD_CODES[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unicode_keys() {
        assert_eq!(unicode_for(KeyCode::A), Some('a'));
        assert_eq!(unicode_for(KeyCode::Digit5), Some('5'));
        assert_eq!(unicode_for(KeyCode::Num7), None);
        assert_eq!(unicode_for(KeyCode::F1), None);
    }

    #[test]
    fn test_numpad_keys_use_keypad_codes() {
        assert_eq!(to_enigo_key(KeyCode::Num0), Key::Other(KEYPAD_CODES[0]));
        assert_eq!(to_enigo_key(KeyCode::Num7), Key::Other(KEYPAD_CODES[7]));
        assert_eq!(to_enigo_key(KeyCode::NumDiv), Key::Other(KEYPAD_CODES[14]));
        assert_ne!(to_enigo_key(KeyCode::Num7), Key::Unicode('7'));
        assert_ne!(to_enigo_key(KeyCode::NumAdd), Key::Unicode('+'));
        assert_eq!(keypad_code(KeyCode::Digit7), None);

        let distinct: std::collections::HashSet<u32> = KEYPAD_CODES.iter().copied().collect();
        assert_eq!(distinct.len(), KEYPAD_CODES.len());
    }

    #[test]
    fn test_named_keys() {
        assert_eq!(to_enigo_key(KeyCode::Enter), Key::Return);
        assert_eq!(to_enigo_key(KeyCode::Esc), Key::Escape);
        assert_eq!(to_enigo_key(KeyCode::X), Key::Unicode('x'));
        assert_eq!(modifier_key(Modifier::Cmd), Key::Meta);
    }
}
