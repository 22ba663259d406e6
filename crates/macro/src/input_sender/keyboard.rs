//! Keyboard Input Sending
//!
//! `SendInput`-based emitter. A tap or a whole combo goes out as one batch so
//! other input cannot interleave between its down and up events.

use super::{combo_strokes, is_extended_vk, EmitError, KeyEmitter};
use keyrelay_core::keys::{KeyCode, Modifier};
use tracing::debug;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS, KEYEVENTF_EXTENDEDKEY,
    KEYEVENTF_KEYUP, VIRTUAL_KEY,
};

/// Windows keystroke emitter
#[derive(Debug, Default)]
pub struct SendInputEmitter;

impl SendInputEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl KeyEmitter for SendInputEmitter {
    fn tap(&mut self, key: KeyCode) -> Result<(), EmitError> {
        let vk = key.vk();
        send_batch(&[key_input(vk, false), key_input(vk, true)])?;
        debug!("Key tapped: {}", key);
        Ok(())
    }

    fn tap_with_modifiers(&mut self, key: KeyCode, modifiers: &[Modifier]) -> Result<(), EmitError> {
        let inputs: Vec<INPUT> = combo_strokes(key, modifiers)
            .into_iter()
            .map(|stroke| key_input(stroke.vk, stroke.up))
            .collect();

        send_batch(&inputs)?;
        debug!("Combo tapped: {:?}+{}", modifiers, key);
        Ok(())
    }
}

fn key_input(vk: u16, key_up: bool) -> INPUT {
    let mut flags = if key_up {
        KEYEVENTF_KEYUP
    } else {
        KEYBD_EVENT_FLAGS(0)
    };
    if is_extended_vk(vk) {
        flags |= KEYEVENTF_EXTENDEDKEY;
    }

    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(vk),
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn send_batch(inputs: &[INPUT]) -> Result<(), EmitError> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(EmitError::Rejected(format!(
            "SendInput accepted {} of {} events",
            sent,
            inputs.len()
        )));
    }
    Ok(())
}
