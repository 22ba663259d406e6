//! Trigger Engine
//!
//! Owns the keyboard hook and the dispatcher thread. `start` installs the
//! hook and arms the dispatcher; `stop` cancels any in-flight playback,
//! removes the hook and joins the dispatcher before returning, so nothing is
//! emitted by the engine after `stop` completes.
//!
//! If the hook dies (panic in the callback, listener failure) the dispatcher
//! thread tears the engine down to Idle on its own.

use crate::dispatcher::{DispatchSettings, Dispatcher, DispatcherExit};
use crate::executor::PlaybackExecutor;
use crate::input_hooks::{HookSink, InputHook};
use crate::input_sender::SharedEmitter;
use crossbeam_channel::{bounded, Sender};
use keyrelay_core::cancel::CancelToken;
use keyrelay_core::config::AppConfig;
use keyrelay_core::registry::{MappingRegistry, RegistryStats};
use keyrelay_core::state::{EngineState, StateCell};
use keyrelay_core::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

const ENGINE: &str = "trigger engine";

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub dispatch: DispatchSettings,
    pub hook_buffer_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            dispatch: DispatchSettings::from_config(config),
            hook_buffer_size: config.hook_buffer_size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub running: bool,
    pub hook_installed: bool,
    pub stats: RegistryStats,
    pub dropped_events: u64,
}

struct EngineRuntime {
    thread: JoinHandle<()>,
    shutdown_tx: Sender<()>,
    cancel: CancelToken,
    dropped: Arc<AtomicU64>,
}

struct EngineShared {
    registry: Arc<MappingRegistry>,
    emitter: SharedEmitter,
    hook: Mutex<Box<dyn InputHook>>,
    state: Arc<StateCell>,
    settings: EngineSettings,
    runtime: Mutex<Option<EngineRuntime>>,
}

pub struct KeyEngine {
    shared: Arc<EngineShared>,
}

impl KeyEngine {
    pub fn new(
        registry: Arc<MappingRegistry>,
        emitter: SharedEmitter,
        hook: Box<dyn InputHook>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                registry,
                emitter,
                hook: Mutex::new(hook),
                state: Arc::new(StateCell::new()),
                settings,
                runtime: Mutex::new(None),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.shared.registry
    }

    pub fn state(&self) -> EngineState {
        self.shared.state.get()
    }

    /// Install the hook and start dispatching triggers
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        if shared
            .state
            .transition(EngineState::Idle, EngineState::Armed)
            .is_err()
        {
            return Err(Error::AlreadyRunning(ENGINE));
        }

        let mut runtime = shared.runtime.lock();
        let (sink, channels) = HookSink::channel(shared.settings.hook_buffer_size);
        let dropped = Arc::clone(&channels.dropped);

        if let Err(e) = shared.hook.lock().start(sink) {
            shared.state.set(EngineState::Idle);
            error!("Failed to start keyboard hook: {}", e);
            return Err(e.into());
        }

        let cancel = CancelToken::new();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let dispatcher = Dispatcher::new(
            Arc::clone(&shared.registry),
            PlaybackExecutor::new(Arc::clone(&shared.emitter)),
            Arc::clone(&shared.state),
            cancel.clone(),
            shared.settings.dispatch,
        );

        let thread_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("keyrelay-dispatch".into())
            .spawn(move || {
                let exit = dispatcher.run(channels, shutdown_rx);
                match exit {
                    DispatcherExit::Shutdown => {}
                    DispatcherExit::Fault(reason) => teardown_after_fault(&thread_shared, &reason),
                    DispatcherExit::Disconnected => {
                        teardown_after_fault(&thread_shared, "keyboard hook disconnected")
                    }
                }
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                shared.hook.lock().stop();
                shared.state.set(EngineState::Idle);
                return Err(Error::Conflict(format!("failed to spawn dispatcher: {}", e)));
            }
        };

        *runtime = Some(EngineRuntime {
            thread,
            shutdown_tx,
            cancel,
            dropped,
        });
        shared.registry.set_running(true);

        let table = shared.registry.active_table();
        info!("Trigger engine started ({} active triggers)", table.len());
        Ok(())
    }

    /// Cancel playback, remove the hook and wait for the dispatcher to exit
    pub fn stop(&self) -> Result<()> {
        let shared = &self.shared;
        let Some(runtime) = shared.runtime.lock().take() else {
            return Err(Error::NotRunning(ENGINE));
        };

        shared.state.set(EngineState::Cancelling);
        runtime.cancel.cancel();
        shared.hook.lock().stop();
        drop(runtime.shutdown_tx);
        if runtime.thread.join().is_err() {
            warn!("Dispatcher thread panicked");
        }

        shared.registry.set_running(false);
        shared.state.set(EngineState::Idle);
        info!("Trigger engine stopped");
        Ok(())
    }

    /// Stop the engine if it is running, then remove every mapping
    pub fn clear(&self) -> Result<usize> {
        match self.stop() {
            Ok(()) | Err(Error::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.shared.registry.clear()
    }

    pub fn status(&self) -> EngineStatus {
        let shared = &self.shared;
        let state = shared.state.get();
        let dropped_events = shared
            .runtime
            .lock()
            .as_ref()
            .map(|rt| rt.dropped.load(Ordering::Relaxed))
            .unwrap_or(0);
        EngineStatus {
            state,
            running: state != EngineState::Idle,
            hook_installed: shared.hook.lock().is_running(),
            stats: shared.registry.stats(),
            dropped_events,
        }
    }
}

impl Drop for KeyEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Runs on the dispatcher thread; a concurrent `stop` that already took the
/// runtime owns the teardown instead.
fn teardown_after_fault(shared: &EngineShared, reason: &str) {
    let Some(runtime) = shared.runtime.lock().take() else {
        return;
    };
    error!("Keyboard hook failed: {}; stopping trigger engine", reason);

    shared.state.set(EngineState::Cancelling);
    runtime.cancel.cancel();
    shared.hook.lock().stop();
    shared.registry.set_running(false);
    shared.state.set(EngineState::Idle);
    // runtime.thread is this thread; dropping the handle detaches it
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input_sender::shared;
    use crate::test_support::{wait_until, ChannelHook, EmitLog, Emitted, HookDriver, RecordingEmitter};
    use keyrelay_core::keys::{parse_sequence, KeyCode, Modifier};
    use std::time::{Duration, Instant};

    fn engine() -> (KeyEngine, HookDriver, EmitLog) {
        let registry = Arc::new(MappingRegistry::in_memory());
        let (emitter, log) = RecordingEmitter::new();
        let (hook, driver) = ChannelHook::new();
        let engine = KeyEngine::new(
            registry,
            shared(Box::new(emitter)),
            Box::new(hook),
            EngineSettings::default(),
        );
        (engine, driver, log)
    }

    fn add(engine: &KeyEngine, name: &str, trigger: &str, sequence: &str) -> String {
        engine
            .registry()
            .add(name, trigger, parse_sequence(sequence).unwrap())
            .unwrap()
            .id
    }

    #[test]
    fn test_single_shot_trigger() {
        let (engine, driver, log) = engine();
        add(&engine, "ab", "end", "a(50), b(0)");
        engine.start().unwrap();

        driver.press(KeyCode::End);
        driver.release(KeyCode::End);
        assert!(wait_until(Duration::from_secs(2), || log.len() == 2));

        assert_eq!(log.keys(), vec![Emitted::Tap(KeyCode::A), Emitted::Tap(KeyCode::B)]);
        let times = log.times();
        let gap = times[1].duration_since(times[0]);
        assert!(gap >= Duration::from_millis(50));
        assert!(gap < Duration::from_millis(500));
        engine.stop().unwrap();
    }

    #[test]
    fn test_held_key_plays_once() {
        let (engine, driver, log) = engine();
        add(&engine, "ab", "end", "a(20), b");
        engine.start().unwrap();

        for _ in 0..30 {
            driver.press(KeyCode::End);
        }
        assert!(wait_until(Duration::from_secs(2), || log.len() >= 2));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(log.len(), 2);

        driver.release(KeyCode::End);
        thread::sleep(Duration::from_millis(30));
        driver.press(KeyCode::End);
        assert!(wait_until(Duration::from_secs(2), || log.len() == 4));
        engine.stop().unwrap();
    }

    #[test]
    fn test_toggled_duplicate_takes_over_trigger() {
        let (engine, driver, log) = engine();
        let first = add(&engine, "first", "delete", "a");
        let second = add(&engine, "second", "delete", "b");

        let registry = engine.registry();
        assert!(!registry.get_by_id(&second).unwrap().enabled);
        registry.toggle_by_id(&second).unwrap();
        assert!(registry.get_by_id(&second).unwrap().enabled);
        assert!(!registry.get_by_id(&first).unwrap().enabled);

        engine.start().unwrap();
        driver.press(KeyCode::Delete);
        assert!(wait_until(Duration::from_secs(2), || log.len() == 1));
        assert_eq!(log.keys(), vec![Emitted::Tap(KeyCode::B)]);
        engine.stop().unwrap();
    }

    #[test]
    fn test_combo_step_emitted_with_modifiers() {
        let (engine, driver, log) = engine();
        add(&engine, "new window", "home", "ctrl+shift+n(0)");
        engine.start().unwrap();

        driver.press(KeyCode::Home);
        assert!(wait_until(Duration::from_secs(2), || log.len() == 1));
        assert_eq!(
            log.keys(),
            vec![Emitted::Combo(vec![Modifier::Ctrl, Modifier::Shift], KeyCode::N)]
        );
        engine.stop().unwrap();
    }

    #[test]
    fn test_stop_cancels_mid_sequence() {
        let (engine, driver, log) = engine();
        add(&engine, "slow", "end", "a(5000), b(0)");
        engine.start().unwrap();

        driver.press(KeyCode::End);
        assert!(wait_until(Duration::from_secs(2), || log.len() == 1));
        thread::sleep(Duration::from_millis(100));

        let stop_at = Instant::now();
        engine.stop().unwrap();
        assert!(stop_at.elapsed() < Duration::from_millis(1100));
        assert_eq!(engine.state(), EngineState::Idle);

        thread::sleep(Duration::from_millis(200));
        assert_eq!(log.keys(), vec![Emitted::Tap(KeyCode::A)]);
        assert!(!driver.is_attached());
    }

    #[test]
    fn test_lifecycle_errors() {
        let (engine, _driver, _log) = engine();
        assert!(matches!(engine.stop(), Err(Error::NotRunning(_))));

        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(Error::AlreadyRunning(_))));
        assert!(engine.registry().is_running());

        let status = engine.status();
        assert!(status.running);
        assert!(status.hook_installed);
        assert_eq!(status.state, EngineState::Armed);

        engine.stop().unwrap();
        assert!(!engine.registry().is_running());
        assert!(!engine.status().running);
    }

    #[test]
    fn test_hook_fault_tears_down_to_idle() {
        let (engine, driver, log) = engine();
        add(&engine, "x", "end", "x");
        engine.start().unwrap();

        driver.crash("callback panicked");
        assert!(wait_until(Duration::from_secs(2), || engine.state() == EngineState::Idle));
        assert!(!engine.registry().is_running());
        assert!(matches!(engine.stop(), Err(Error::NotRunning(_))));

        engine.start().unwrap();
        driver.press(KeyCode::End);
        assert!(wait_until(Duration::from_secs(2), || log.len() == 1));
        engine.stop().unwrap();
    }

    #[test]
    fn test_clear_stops_and_empties() {
        let (engine, _driver, _log) = engine();
        add(&engine, "x", "end", "x");
        add(&engine, "y", "home", "y");
        engine.start().unwrap();

        assert_eq!(engine.clear().unwrap(), 2);
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.registry().stats().total, 0);
        assert_eq!(engine.clear().unwrap(), 0);
    }
}
