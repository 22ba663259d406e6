//! Session Timer
//!
//! Authoritative countdown for long-running macro sessions.
//!
//! State machine: `Stopped -> Running -> {Paused, Completed}`, `reset` returns
//! to `Stopped`. Elapsed time is always derived from the wall clock
//! (`accumulated + (now - wall_start)`), never from tick counts.
//!
//! Two threads back each timer:
//! - a ticker that wakes about once per second while running and detects completion
//! - a callback worker that invokes subscriber callbacks, so a slow callback
//!   never delays the next tick
//!
//! Every `stop`/`reset` bumps a generation counter; queued callback jobs
//! from an older generation are discarded.

use crate::error::{Error, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interval between `on_tick` callbacks
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Stopped,
    Running,
    Paused,
    Completed,
}

pub type SubscriptionId = u64;

type TickFn = Box<dyn Fn(Duration) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

/// Callbacks registered with [`SessionTimer::subscribe`]
#[derive(Default)]
pub struct TimerSubscriber {
    on_tick: Option<TickFn>,
    on_complete: Option<CompleteFn>,
}

impl TimerSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called roughly every second with the remaining time
    pub fn on_tick(mut self, f: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.on_tick = Some(Box::new(f));
        self
    }

    /// Called once when elapsed reaches the total
    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

/// Point-in-time view of the timer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub total_ms: u64,
    pub elapsed_ms: u64,
    pub remaining_ms: u64,
    pub progress: f64,
}

#[derive(Debug)]
struct Clock {
    total: Duration,
    accumulated: Duration,
    wall_start: Option<Instant>,
    phase: TimerPhase,
    generation: u64,
    completion_fired: bool,
}

impl Clock {
    fn raw_elapsed(&self, now: Instant) -> Duration {
        let running = self
            .wall_start
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default();
        self.accumulated + running
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.raw_elapsed(now).min(self.total)
    }

    fn remaining(&self, now: Instant) -> Duration {
        self.total.saturating_sub(self.elapsed(now))
    }

    fn invalidate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

enum Job {
    Tick { remaining: Duration, generation: u64 },
    Complete { generation: u64 },
    Shutdown,
}

struct Shared {
    clock: Mutex<Clock>,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<TimerSubscriber>)>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    wake_tx: Sender<()>,
    jobs_tx: Sender<Job>,
}

impl Shared {
    fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// How long the ticker may sleep, `None` while not running
    fn next_wait(&self) -> Option<Duration> {
        let clock = self.clock.lock();
        (clock.phase == TimerPhase::Running)
            .then(|| clock.remaining(Instant::now()).min(TICK_INTERVAL))
    }

    fn tick(&self, now: Instant) {
        let job = {
            let mut clock = self.clock.lock();
            if clock.phase != TimerPhase::Running {
                return;
            }
            let elapsed = clock.raw_elapsed(now);
            if elapsed >= clock.total {
                clock.accumulated = clock.total;
                clock.wall_start = None;
                clock.phase = TimerPhase::Completed;
                if clock.completion_fired {
                    return;
                }
                clock.completion_fired = true;
                debug!("Timer completed after {:?}", clock.total);
                Job::Complete {
                    generation: clock.generation,
                }
            } else {
                Job::Tick {
                    remaining: clock.total - elapsed,
                    generation: clock.generation,
                }
            }
        };
        let _ = self.jobs_tx.send(job);
    }

    fn is_current(&self, generation: u64, completed: bool) -> bool {
        let clock = self.clock.lock();
        clock.generation == generation && (!completed || clock.phase == TimerPhase::Completed)
    }

    fn subscribers(&self) -> Vec<Arc<TimerSubscriber>> {
        self.subscribers.lock().iter().map(|(_, s)| Arc::clone(s)).collect()
    }
}

/// Wall-clock countdown with tick and completion subscribers
pub struct SessionTimer {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTimer {
    /// Create a stopped timer and spawn its ticker and callback threads
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        let (jobs_tx, jobs_rx) = unbounded();
        let shared = Arc::new(Shared {
            clock: Mutex::new(Clock {
                total: Duration::ZERO,
                accumulated: Duration::ZERO,
                wall_start: None,
                phase: TimerPhase::Stopped,
                generation: 0,
                completion_fired: false,
            }),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            wake_tx,
            jobs_tx,
        });

        let ticker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || run_ticker(shared, wake_rx))
        };
        let worker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || run_callbacks(shared, jobs_rx))
        };

        Self {
            shared,
            threads: Mutex::new(vec![ticker, worker]),
        }
    }

    pub fn subscribe(&self, subscriber: TimerSubscriber) -> SubscriptionId {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared.subscribers.lock().push((id, Arc::new(subscriber)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.shared.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Set the total duration; refused while running
    pub fn set_duration(&self, total: Duration) -> Result<()> {
        let mut clock = self.shared.clock.lock();
        match clock.phase {
            TimerPhase::Running => {
                return Err(Error::Conflict("cannot change duration while the timer runs".into()))
            }
            TimerPhase::Completed => {
                clock.phase = TimerPhase::Stopped;
                clock.accumulated = Duration::ZERO;
                clock.completion_fired = false;
                clock.invalidate();
            }
            TimerPhase::Stopped | TimerPhase::Paused => {}
        }
        clock.total = total;
        clock.accumulated = clock.accumulated.min(total);
        Ok(())
    }

    /// Start from Stopped or resume from Paused
    pub fn start(&self) -> Result<()> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(Error::Conflict("timer is shutting down".into()));
        }
        {
            let mut clock = self.shared.clock.lock();
            if clock.total.is_zero() {
                return Err(Error::Validation("timer duration is not set".into()));
            }
            match clock.phase {
                TimerPhase::Running => return Err(Error::AlreadyRunning("timer")),
                TimerPhase::Completed => {
                    return Err(Error::Conflict("timer completed; reset it first".into()))
                }
                TimerPhase::Stopped => {
                    clock.accumulated = Duration::ZERO;
                    clock.completion_fired = false;
                }
                TimerPhase::Paused => {}
            }
            clock.wall_start = Some(Instant::now());
            clock.phase = TimerPhase::Running;
            debug!(
                "Timer started: total={:?} already elapsed={:?}",
                clock.total, clock.accumulated
            );
        }
        self.shared.wake();
        Ok(())
    }

    /// Pause; a pending completion is discarded
    pub fn stop(&self) -> Result<()> {
        {
            let mut clock = self.shared.clock.lock();
            if clock.phase != TimerPhase::Running {
                return Err(Error::NotRunning("timer"));
            }
            let now = Instant::now();
            clock.accumulated = clock.elapsed(now);
            clock.wall_start = None;
            clock.phase = TimerPhase::Paused;
            clock.invalidate();
        }
        self.shared.wake();
        Ok(())
    }

    /// Back to Stopped with nothing elapsed; the duration is kept
    pub fn reset(&self) {
        {
            let mut clock = self.shared.clock.lock();
            clock.accumulated = Duration::ZERO;
            clock.wall_start = None;
            clock.phase = TimerPhase::Stopped;
            clock.completion_fired = false;
            clock.invalidate();
        }
        self.shared.wake();
    }

    /// Jump to Completed and fire `on_complete` if it has not fired yet
    pub fn force_complete(&self) -> Result<()> {
        let job = {
            let mut clock = self.shared.clock.lock();
            match clock.phase {
                TimerPhase::Stopped => {
                    return Err(Error::Conflict("timer has not been started".into()))
                }
                TimerPhase::Completed => return Ok(()),
                TimerPhase::Running | TimerPhase::Paused => {}
            }
            clock.accumulated = clock.total;
            clock.wall_start = None;
            clock.phase = TimerPhase::Completed;
            if clock.completion_fired {
                None
            } else {
                clock.completion_fired = true;
                Some(Job::Complete {
                    generation: clock.generation,
                })
            }
        };
        if let Some(job) = job {
            let _ = self.shared.jobs_tx.send(job);
        }
        self.shared.wake();
        Ok(())
    }

    pub fn phase(&self) -> TimerPhase {
        self.shared.clock.lock().phase
    }

    pub fn total(&self) -> Duration {
        self.shared.clock.lock().total
    }

    pub fn elapsed(&self) -> Duration {
        self.shared.clock.lock().elapsed(Instant::now())
    }

    pub fn remaining(&self) -> Duration {
        self.shared.clock.lock().remaining(Instant::now())
    }

    /// Fraction elapsed in `[0, 1]`; zero when no duration is set
    pub fn progress(&self) -> f64 {
        self.snapshot().progress
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let clock = self.shared.clock.lock();
        let now = Instant::now();
        let elapsed = clock.elapsed(now);
        let progress = if clock.total.is_zero() {
            0.0
        } else {
            (elapsed.as_secs_f64() / clock.total.as_secs_f64()).clamp(0.0, 1.0)
        };
        TimerSnapshot {
            phase: clock.phase,
            total_ms: clock.total.as_millis() as u64,
            elapsed_ms: elapsed.as_millis() as u64,
            remaining_ms: (clock.total - elapsed).as_millis() as u64,
            progress,
        }
    }

    /// Refuse further starts and stop both threads.
    ///
    /// Called from inside a callback (the owner dropped there), the callback
    /// worker is detached instead of joined; it exits on the queued shutdown
    /// job once the callback returns.
    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut clock = self.shared.clock.lock();
            clock.wall_start = None;
            if clock.phase == TimerPhase::Running {
                clock.phase = TimerPhase::Paused;
            }
            clock.invalidate();
        }
        self.shared.wake();
        let _ = self.shared.jobs_tx.send(Job::Shutdown);

        let current = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Timer thread panicked during shutdown");
            }
        }
        debug!("Timer shut down");
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_ticker(shared: Arc<Shared>, wake_rx: Receiver<()>) {
    loop {
        let woke = match shared.next_wait() {
            Some(wait) => wake_rx.recv_timeout(wait),
            None => wake_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        if shared.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        match woke {
            Ok(()) => continue,
            Err(RecvTimeoutError::Timeout) => shared.tick(Instant::now()),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_callbacks(shared: Arc<Shared>, jobs_rx: Receiver<Job>) {
    for job in jobs_rx.iter() {
        match job {
            Job::Shutdown => break,
            Job::Tick {
                remaining,
                generation,
            } => {
                if !shared.is_current(generation, false) {
                    continue;
                }
                for subscriber in shared.subscribers() {
                    if let Some(on_tick) = &subscriber.on_tick {
                        invoke("on_tick", || on_tick(remaining));
                    }
                }
            }
            Job::Complete { generation } => {
                if !shared.is_current(generation, true) {
                    debug!("Dropping superseded completion");
                    continue;
                }
                for subscriber in shared.subscribers() {
                    if let Some(on_complete) = &subscriber.on_complete {
                        invoke("on_complete", on_complete);
                    }
                }
            }
        }
    }
}

fn invoke(label: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("Timer {} callback panicked", label);
    }
}
