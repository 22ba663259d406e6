//! Macro Runner - Loops a built-in recipe until stopped
//!
//! A run waits a short grace period (so the user can let go of the key that
//! started it), then plays the recipe over and over with a one second pause
//! between passes. With an auto-stop duration the session timer ends the run
//! and a completion notification goes out.
//!
//! Stopping a run pauses its timer; `start` with `is_resume` continues a
//! paused timer instead of starting a fresh countdown.

use crate::executor::{Pacing, PlaybackExecutor, PlaybackOutcome};
use crate::input_sender::SharedEmitter;
use keyrelay_core::cancel::CancelToken;
use keyrelay_core::config::AppConfig;
use keyrelay_core::notify::{Notification, NotificationHub};
use keyrelay_core::recipe::{self, MacroRecipe};
use keyrelay_core::state::{EngineState, StateCell};
use keyrelay_core::timer::{SessionTimer, SubscriptionId, TimerPhase, TimerSnapshot, TimerSubscriber};
use keyrelay_core::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const RUNNER: &str = "macro";

/// Pause between two passes of a recipe
pub const ITERATION_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub grace: Duration,
    pub iteration_pause: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            grace: config.macro_grace(),
            iteration_pause: ITERATION_PAUSE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MacroStatus {
    pub running: bool,
    pub mode: Option<&'static str>,
    pub recipe: Option<&'static str>,
    pub state: EngineState,
    pub elapsed_ms: u64,
    /// None when the run has no auto-stop
    pub remaining_ms: Option<u64>,
    pub timer: TimerSnapshot,
}

enum StopReason {
    User,
    Completed,
    Failed(String),
}

struct MacroSession {
    recipe: &'static MacroRecipe,
    duration: Duration,
    cancel: CancelToken,
    subscription: Option<SubscriptionId>,
    thread: JoinHandle<()>,
    started_at: Instant,
}

struct RunnerShared {
    executor: PlaybackExecutor,
    state: StateCell,
    timer: SessionTimer,
    notifier: Arc<NotificationHub>,
    session: Mutex<Option<MacroSession>>,
    settings: RunnerSettings,
}

pub struct MacroRunner {
    shared: Arc<RunnerShared>,
}

/// Convert an optional auto-stop in hours into a duration (zero = none)
pub fn auto_stop_duration(hours: Option<f64>) -> Result<Duration> {
    match hours {
        None => Ok(Duration::ZERO),
        Some(h) if !h.is_finite() || h < 0.0 => Err(Error::Validation(format!(
            "auto-stop hours must be a non-negative number, got {}",
            h
        ))),
        Some(h) => Ok(Duration::from_secs_f64(h * 3600.0)),
    }
}

impl MacroRunner {
    pub fn new(emitter: SharedEmitter, notifier: Arc<NotificationHub>, settings: RunnerSettings) -> Self {
        Self {
            shared: Arc::new(RunnerShared {
                executor: PlaybackExecutor::new(emitter),
                state: StateCell::new(),
                timer: SessionTimer::new(),
                notifier,
                session: Mutex::new(None),
                settings,
            }),
        }
    }

    /// Start looping `mode`, optionally stopping after `hours`
    pub fn start(&self, mode: &str, hours: Option<f64>, is_resume: bool) -> Result<()> {
        let duration = auto_stop_duration(hours)?;
        self.start_timed(mode, duration, is_resume)
    }

    /// Start looping `mode`; a zero `duration` runs until stopped
    pub fn start_timed(&self, mode: &str, duration: Duration, is_resume: bool) -> Result<()> {
        let recipe = recipe::find(mode).ok_or_else(|| Error::NotFound(format!("macro mode '{}'", mode)))?;
        start_session(&self.shared, recipe, duration, is_resume)
    }

    pub fn stop(&self) -> Result<()> {
        stop_session(&self.shared, StopReason::User)
    }

    /// Clear the session timer; only allowed while idle
    pub fn reset(&self) -> Result<()> {
        if !self.shared.state.is_idle() {
            return Err(Error::Conflict("cannot reset while the macro is running".into()));
        }
        self.shared.timer.reset();
        info!("Macro timer reset");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.shared.state.is_idle()
    }

    pub fn state(&self) -> EngineState {
        self.shared.state.get()
    }

    pub fn status(&self) -> MacroStatus {
        let shared = &self.shared;
        let timer = shared.timer.snapshot();
        let session = shared.session.lock();
        let (mode, recipe, started_at, timed) = match session.as_ref() {
            Some(s) => (Some(s.recipe.id), Some(s.recipe.name), Some(s.started_at), !s.duration.is_zero()),
            None => (None, None, None, timer.phase != TimerPhase::Stopped),
        };
        let elapsed_ms = if timed {
            timer.elapsed_ms
        } else {
            started_at.map(|t| t.elapsed().as_millis() as u64).unwrap_or(0)
        };
        let state = shared.state.get();
        MacroStatus {
            running: state != EngineState::Idle,
            mode,
            recipe,
            state,
            elapsed_ms,
            remaining_ms: timed.then_some(timer.remaining_ms),
            timer,
        }
    }
}

impl Drop for MacroRunner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn start_session(
    shared: &Arc<RunnerShared>,
    recipe: &'static MacroRecipe,
    duration: Duration,
    is_resume: bool,
) -> Result<()> {
    if let Err(current) = shared.state.transition(EngineState::Idle, EngineState::Running) {
        return Err(Error::Conflict(format!("macro is already {}", current)));
    }

    let mut session = shared.session.lock();
    let cancel = CancelToken::new();

    let subscription = if duration.is_zero() {
        None
    } else {
        match arm_timer(shared, duration, is_resume) {
            Ok(id) => Some(id),
            Err(e) => {
                shared.state.set(EngineState::Idle);
                return Err(e);
            }
        }
    };

    let loop_shared = Arc::clone(shared);
    let loop_cancel = cancel.clone();
    let spawned = thread::Builder::new()
        .name(format!("keyrelay-macro-{}", recipe.id))
        .spawn(move || run_loop(&loop_shared, recipe, &loop_cancel));

    let thread = match spawned {
        Ok(thread) => thread,
        Err(e) => {
            if let Some(id) = subscription {
                shared.timer.unsubscribe(id);
                let _ = shared.timer.stop();
            }
            shared.state.set(EngineState::Idle);
            return Err(Error::Conflict(format!("failed to spawn macro loop: {}", e)));
        }
    };

    *session = Some(MacroSession {
        recipe,
        duration,
        cancel,
        subscription,
        thread,
        started_at: Instant::now(),
    });
    drop(session);

    if is_resume {
        info!("Macro '{}' resumed", recipe.name);
    } else {
        info!("Macro '{}' started (auto-stop {:?})", recipe.name, duration);
        shared.notifier.notify(Notification::started(recipe.name, duration));
    }
    Ok(())
}

fn arm_timer(shared: &Arc<RunnerShared>, duration: Duration, is_resume: bool) -> Result<SubscriptionId> {
    let timer = &shared.timer;
    if !(is_resume && timer.phase() == TimerPhase::Paused) {
        timer.reset();
    }
    timer.set_duration(duration)?;

    let weak: Weak<RunnerShared> = Arc::downgrade(shared);
    let id = timer.subscribe(TimerSubscriber::new().on_complete(move || {
        if let Some(shared) = weak.upgrade() {
            info!("Macro auto-stop reached");
            let _ = stop_session(&shared, StopReason::Completed);
        }
    }));

    if let Err(e) = timer.start() {
        timer.unsubscribe(id);
        return Err(e);
    }
    Ok(id)
}

fn run_loop(shared: &Arc<RunnerShared>, recipe: &'static MacroRecipe, cancel: &CancelToken) {
    if !cancel.sleep(shared.settings.grace) {
        return;
    }

    let steps = recipe.mapped_steps();
    let mut passes = 0u64;
    loop {
        match shared.executor.play(&steps, cancel, Pacing::Recipe) {
            Ok(PlaybackOutcome::Completed { .. }) => passes += 1,
            Ok(PlaybackOutcome::Cancelled { .. }) => break,
            Err(e) => {
                error!("Macro '{}' aborted: {}", recipe.name, e);
                let _ = stop_session(shared, StopReason::Failed(e.to_string()));
                return;
            }
        }
        if !cancel.sleep(shared.settings.iteration_pause) {
            break;
        }
    }
    debug!("Macro '{}' loop exited after {} passes", recipe.name, passes);
}

fn stop_session(shared: &RunnerShared, reason: StopReason) -> Result<()> {
    let Some(session) = shared.session.lock().take() else {
        return Err(Error::NotRunning(RUNNER));
    };

    shared.state.set(EngineState::Cancelling);
    session.cancel.cancel();
    if let Some(id) = session.subscription {
        shared.timer.unsubscribe(id);
    }
    if !matches!(reason, StopReason::Completed) {
        let _ = shared.timer.stop();
    }

    let on_loop_thread: ThreadId = thread::current().id();
    if session.thread.thread().id() != on_loop_thread && session.thread.join().is_err() {
        warn!("Macro loop thread panicked");
    }
    shared.state.set(EngineState::Idle);

    let recipe = session.recipe;
    match reason {
        StopReason::User => info!("Macro '{}' stopped", recipe.name),
        StopReason::Completed => {
            info!("Macro '{}' completed", recipe.name);
            shared
                .notifier
                .notify(Notification::completed(recipe.name, session.duration));
        }
        StopReason::Failed(message) => {
            shared.notifier.notify(Notification::error(recipe.name, message));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input_sender::shared as share_emitter;
    use crate::test_support::{wait_until, EmitLog, Emitted, RecordingEmitter};
    use keyrelay_core::keys::KeyCode;
    use keyrelay_core::notify::Notifier;

    struct Collect(Arc<Mutex<Vec<Notification>>>);

    impl Notifier for Collect {
        fn name(&self) -> &str {
            "collect"
        }

        fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
            self.0.lock().push(notification.clone());
            Ok(())
        }
    }

    fn settings() -> RunnerSettings {
        RunnerSettings {
            grace: Duration::from_millis(20),
            iteration_pause: Duration::from_millis(50),
        }
    }

    fn runner_with(emitter: RecordingEmitter) -> (MacroRunner, Arc<Mutex<Vec<Notification>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hub = Arc::new(NotificationHub::new(vec![Box::new(Collect(Arc::clone(&seen)))]));
        let runner = MacroRunner::new(share_emitter(Box::new(emitter)), hub, settings());
        (runner, seen)
    }

    fn runner() -> (MacroRunner, EmitLog, Arc<Mutex<Vec<Notification>>>) {
        let (emitter, log) = RecordingEmitter::new();
        let (runner, seen) = runner_with(emitter);
        (runner, log, seen)
    }

    #[test]
    fn test_auto_stop_hours_validation() {
        assert_eq!(auto_stop_duration(None).unwrap(), Duration::ZERO);
        assert_eq!(auto_stop_duration(Some(0.01)).unwrap(), Duration::from_secs(36));
        assert!(matches!(auto_stop_duration(Some(-1.0)), Err(Error::Validation(_))));
        assert!(matches!(auto_stop_duration(Some(f64::NAN)), Err(Error::Validation(_))));
    }

    #[test]
    fn test_unknown_mode_not_found() {
        let (runner, _log, _seen) = runner();
        assert!(matches!(runner.start("mode-Z", None, false), Err(Error::NotFound(_))));
        assert!(!runner.is_running());
    }

    #[test]
    fn test_loop_runs_until_stopped() {
        let (runner, log, seen) = runner();
        runner.start("mode-A-party", None, false).unwrap();
        assert!(matches!(runner.start("mode-A-party", None, false), Err(Error::Conflict(_))));

        assert!(wait_until(Duration::from_secs(2), || !log.is_empty()));
        assert_eq!(log.keys()[0], Emitted::Tap(KeyCode::X));
        assert_eq!(runner.status().mode, Some("mode-A-party"));

        let stop_at = Instant::now();
        runner.stop().unwrap();
        assert!(stop_at.elapsed() < Duration::from_millis(1100));
        assert_eq!(runner.state(), EngineState::Idle);

        let emitted = log.len();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(log.len(), emitted);
        assert!(matches!(runner.stop(), Err(Error::NotRunning(_))));

        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 1));
        assert!(matches!(seen.lock()[0], Notification::Started { .. }));
    }

    #[test]
    fn test_auto_stop_notifies_once() {
        let (runner, _log, seen) = runner();
        runner
            .start_timed("mode-A-party", Duration::from_millis(300), false)
            .unwrap();
        assert!(runner.status().remaining_ms.is_some());

        assert!(wait_until(Duration::from_secs(3), || !runner.is_running()));
        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 2));
        thread::sleep(Duration::from_millis(200));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Notification::started("Mode A (party)", Duration::from_millis(300)));
        assert_eq!(seen[1], Notification::completed("Mode A (party)", Duration::from_millis(300)));
        assert_eq!(runner.status().timer.phase, TimerPhase::Completed);
    }

    #[test]
    fn test_runner_dropped_from_completion_callback() {
        let (runner, _log, seen) = runner();
        let slot: Arc<Mutex<Option<MacroRunner>>> = Arc::new(Mutex::new(None));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        runner
            .start_timed("mode-A-party", Duration::from_millis(300), false)
            .unwrap();
        // Runs after the runner's own auto-stop subscriber
        let owner = Arc::clone(&slot);
        runner.shared.timer.subscribe(TimerSubscriber::new().on_complete(move || {
            let taken = owner.lock().take();
            drop(taken);
            let _ = done_tx.send(());
        }));
        *slot.lock() = Some(runner);

        assert!(done_rx.recv_timeout(Duration::from_secs(3)).is_ok());
        assert!(slot.lock().is_none());
        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 2));
        assert!(matches!(seen.lock()[1], Notification::Completed { .. }));
    }

    #[test]
    fn test_resume_continues_timer_without_notifying() {
        let (runner, _log, seen) = runner();
        runner
            .start_timed("mode-B-party", Duration::from_secs(10), false)
            .unwrap();
        thread::sleep(Duration::from_millis(200));
        runner.stop().unwrap();
        let paused = runner.status().timer;
        assert_eq!(paused.phase, TimerPhase::Paused);
        assert!(paused.elapsed_ms >= 150);

        runner
            .start_timed("mode-B-party", Duration::from_secs(10), true)
            .unwrap();
        assert!(runner.status().timer.elapsed_ms >= paused.elapsed_ms);
        runner.stop().unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_reset_only_when_idle() {
        let (runner, _log, _seen) = runner();
        runner
            .start_timed("mode-B-party", Duration::from_secs(10), false)
            .unwrap();
        assert!(matches!(runner.reset(), Err(Error::Conflict(_))));

        runner.stop().unwrap();
        runner.reset().unwrap();
        let status = runner.status();
        assert_eq!(status.timer.phase, TimerPhase::Stopped);
        assert_eq!(status.timer.elapsed_ms, 0);
    }

    #[test]
    fn test_emit_failure_aborts_run() {
        let (emitter, _log) = RecordingEmitter::failing_on(0);
        let (runner, seen) = runner_with(emitter);
        runner.start("mode-A-entry", None, false).unwrap();

        assert!(wait_until(Duration::from_secs(2), || !runner.is_running()));
        assert!(wait_until(Duration::from_secs(1), || seen.lock().len() == 2));
        assert!(matches!(seen.lock()[1], Notification::Error { .. }));
        assert!(matches!(runner.stop(), Err(Error::NotRunning(_))));
    }
}
