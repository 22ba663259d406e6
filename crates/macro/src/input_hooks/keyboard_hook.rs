//! Keyboard Hook Implementation
//!
//! Windows low-level keyboard hook. The callback only classifies the event and
//! hands it to the installed [`HookSink`]; it never logs or blocks. Injected
//! (synthetic) events are ignored so playback cannot re-trigger itself.

use super::HookSink;
use crate::types::{KeyEvent, KeyKind};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing::debug;
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, PostQuitMessage, SetWindowsHookExW, UnhookWindowsHookEx, HHOOK,
    KBDLLHOOKSTRUCT, LLKHF_INJECTED, WH_KEYBOARD_LL, WM_KEYDOWN, WM_KEYUP, WM_SYSKEYDOWN,
    WM_SYSKEYUP,
};

/// Sink the hook callback forwards into
static KEYBOARD_SINK: OnceLock<Mutex<Option<HookSink>>> = OnceLock::new();

/// Set when the callback panicked; the message loop then tears the hook down
static HOOK_PANICKED: AtomicBool = AtomicBool::new(false);

fn sink_slot() -> &'static Mutex<Option<HookSink>> {
    KEYBOARD_SINK.get_or_init(|| Mutex::new(None))
}

/// Claim the process-wide sink slot; `false` if a hook already owns it
pub(super) fn claim_sink(sink: HookSink) -> bool {
    let mut slot = sink_slot().lock();
    if slot.is_some() {
        return false;
    }
    *slot = Some(sink);
    HOOK_PANICKED.store(false, Ordering::SeqCst);
    true
}

/// Release the sink slot, returning the sink if one was installed
pub(super) fn release_sink() -> Option<HookSink> {
    sink_slot().lock().take()
}

pub(super) fn hook_panicked() -> bool {
    HOOK_PANICKED.load(Ordering::SeqCst)
}

/// Install the low-level keyboard hook on the calling thread.
///
/// The calling thread must pump messages until the hook is removed.
pub(super) fn install_keyboard_hook() -> Result<HHOOK, String> {
    let hook = unsafe {
        SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), None, 0)
            .map_err(|e| format!("SetWindowsHookExW failed: {}", e))?
    };
    debug!("Keyboard hook installed");
    Ok(hook)
}

pub(super) fn uninstall_keyboard_hook(hook: HHOOK) {
    unsafe {
        let _ = UnhookWindowsHookEx(hook);
    }
    debug!("Keyboard hook uninstalled");
}

/// Keyboard hook callback procedure
unsafe extern "system" fn keyboard_proc(n_code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if n_code >= 0 && !HOOK_PANICKED.load(Ordering::Relaxed) {
        let forwarded = panic::catch_unwind(AssertUnwindSafe(|| forward(w_param, l_param)));
        if forwarded.is_err() {
            HOOK_PANICKED.store(true, Ordering::SeqCst);
            PostQuitMessage(0);
        }
    }

    // Always pass to next hook - don't block input
    CallNextHookEx(None, n_code, w_param, l_param)
}

unsafe fn forward(w_param: WPARAM, l_param: LPARAM) {
    let kb = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
    if kb.flags.0 & LLKHF_INJECTED.0 != 0 {
        return;
    }

    let kind = match w_param.0 as u32 {
        WM_KEYDOWN | WM_SYSKEYDOWN => KeyKind::Down,
        WM_KEYUP | WM_SYSKEYUP => KeyKind::Up,
        _ => return,
    };

    if let Some(sink) = sink_slot().lock().as_ref() {
        sink.deliver(KeyEvent::new(kind, kb.vkCode as u16));
    }
}
