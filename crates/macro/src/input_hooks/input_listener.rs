//! Input Listener
//!
//! Owns the thread that installs the Windows keyboard hook and pumps its
//! message loop. Stopping posts `WM_QUIT` to that thread and joins it.

use super::keyboard_hook::{
    claim_sink, hook_panicked, install_keyboard_hook, release_sink, uninstall_keyboard_hook,
};
use super::{HookError, HookSink, InputHook};
use crossbeam_channel::bounded;
use keyrelay_core::keys::KeyCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use windows::Win32::Foundation::{LPARAM, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW, TranslateMessage, MSG,
    PM_NOREMOVE, WM_QUIT,
};

/// Windows low-level keyboard listener
pub struct InputListener {
    /// Message loop thread handle
    message_thread: Option<JoinHandle<()>>,
    /// Win32 id of the message loop thread
    thread_id: Arc<AtomicU32>,
}

impl Default for InputListener {
    fn default() -> Self {
        Self::new()
    }
}

impl InputListener {
    pub fn new() -> Self {
        Self {
            message_thread: None,
            thread_id: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl InputHook for InputListener {
    fn start(&mut self, sink: HookSink) -> Result<(), HookError> {
        if self.message_thread.is_some() || !claim_sink(sink) {
            return Err(HookError::AlreadyRunning);
        }
        // Build the key lookup table before the first callback needs it
        let _ = KeyCode::from_vk(0);

        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let thread_id = Arc::clone(&self.thread_id);
        let spawned = thread::Builder::new()
            .name("keyrelay-hook".into())
            .spawn(move || {
                thread_id.store(unsafe { GetCurrentThreadId() }, Ordering::SeqCst);
                // Force creation of the thread's message queue before reporting ready
                let mut msg = MSG::default();
                unsafe {
                    let _ = PeekMessageW(&mut msg, None, 0, 0, PM_NOREMOVE);
                }

                let hook = match install_keyboard_hook() {
                    Ok(hook) => hook,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                info!("Keyboard listener message loop started");
                run_message_loop();
                uninstall_keyboard_hook(hook);

                let sink = release_sink();
                if hook_panicked() {
                    error!("Keyboard hook callback panicked, listener torn down");
                    if let Some(sink) = sink {
                        sink.fault("keyboard hook callback panicked");
                    }
                }
                info!("Keyboard listener message loop ended");
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                release_sink();
                return Err(HookError::Install(e.to_string()));
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.message_thread = Some(handle);
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                release_sink();
                Err(HookError::Install(reason))
            }
            Err(_) => {
                let _ = handle.join();
                release_sink();
                Err(HookError::Install("listener thread exited early".into()))
            }
        }
    }

    fn stop(&mut self) {
        let Some(handle) = self.message_thread.take() else {
            return;
        };
        debug!("Stopping keyboard listener");

        let thread_id = self.thread_id.load(Ordering::SeqCst);
        if !handle.is_finished() {
            if let Err(e) = unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) } {
                warn!("Failed to post WM_QUIT to listener thread: {}", e);
            }
        }
        if handle.join().is_err() {
            error!("Keyboard listener thread panicked");
        }
        release_sink();
    }

    fn is_running(&self) -> bool {
        self.message_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for InputListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the Windows message loop (required for low-level hooks)
fn run_message_loop() {
    let mut msg = MSG::default();

    loop {
        unsafe {
            let result = GetMessageW(&mut msg, None, 0, 0);

            match result.0 {
                -1 => {
                    error!("GetMessage error");
                    break;
                }
                0 => {
                    // WM_QUIT received
                    debug!("WM_QUIT received");
                    break;
                }
                _ => {
                    TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
            }
        }
    }
}
