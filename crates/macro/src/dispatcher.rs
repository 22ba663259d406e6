//! Trigger Dispatcher
//!
//! Single consumer of the hook channel. Turns physical key events into
//! playbacks of the active mapping for that key:
//!
//! 1. Drop unless the engine accepts triggers (Armed / Running).
//! 2. Drop if the key is already held (OS auto-repeat); otherwise mark it held.
//! 3. Drop if the previous trigger is closer than the debounce floor.
//! 4. Look the key up in the active trigger table.
//! 5. Play the mapping (inline when serialised, on a worker when concurrent).
//!
//! Only an Up event clears a held key, so a key held through its own playback
//! cannot fire twice.

use crate::executor::{PlaybackExecutor, PlaybackOutcome};
use crate::input_hooks::HookChannels;
use crate::types::KeyEvent;
use crossbeam_channel::{select, Receiver};
use keyrelay_core::cancel::CancelToken;
use keyrelay_core::config::{AppConfig, DispatchMode};
use keyrelay_core::mapping::Mapping;
use keyrelay_core::registry::MappingRegistry;
use keyrelay_core::state::{EngineState, StateCell};
use keyrelay_core::Error;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Raw codes tracked by [`KeySet`]; larger codes are never considered held
const KEY_SPACE: usize = 1024;
const WORDS: usize = KEY_SPACE / 64;

/// Lock-free set of raw key codes
struct KeySet {
    words: [AtomicU64; WORDS],
}

impl KeySet {
    fn new() -> Self {
        Self {
            words: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn slot(code: u16) -> Option<(usize, u64)> {
        let index = usize::from(code);
        (index < KEY_SPACE).then(|| (index / 64, 1u64 << (index % 64)))
    }

    /// Returns false if `code` was already present
    fn insert(&self, code: u16) -> bool {
        match Self::slot(code) {
            Some((word, bit)) => self.words[word].fetch_or(bit, Ordering::SeqCst) & bit == 0,
            None => true,
        }
    }

    fn remove(&self, code: u16) {
        if let Some((word, bit)) = Self::slot(code) {
            self.words[word].fetch_and(!bit, Ordering::SeqCst);
        }
    }

    fn contains(&self, code: u16) -> bool {
        Self::slot(code)
            .map(|(word, bit)| self.words[word].load(Ordering::SeqCst) & bit != 0)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub debounce_floor: Duration,
    pub mode: DispatchMode,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl DispatchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            debounce_floor: config.debounce_floor(),
            mode: config.dispatch_mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotArmed,
    Repeat,
    Debounced,
    NoMapping,
    Busy,
}

/// What the dispatcher did with one event
#[derive(Debug)]
pub enum DispatchOutcome {
    Dropped(DropReason),
    Released,
    Played {
        mapping_id: String,
        outcome: PlaybackOutcome,
    },
    Spawned {
        mapping_id: String,
    },
    Failed {
        mapping_id: String,
        error: Error,
    },
}

/// Why [`Dispatcher::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherExit {
    Shutdown,
    Fault(String),
    Disconnected,
}

/// Playback bookkeeping shared with concurrent workers
struct InFlight {
    count: Mutex<usize>,
    state: Arc<StateCell>,
    playing: KeySet,
}

impl InFlight {
    /// Armed -> Running on the first playback; false if the engine is stopping
    fn begin(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 && self.state.transition(EngineState::Armed, EngineState::Running).is_err() {
            return false;
        }
        *count += 1;
        true
    }

    fn end(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            let _ = self.state.transition(EngineState::Running, EngineState::Armed);
        }
    }
}

pub struct Dispatcher {
    registry: Arc<MappingRegistry>,
    executor: PlaybackExecutor,
    cancel: CancelToken,
    settings: DispatchSettings,
    inflight: Arc<InFlight>,
    held: KeySet,
    epoch: Instant,
    /// Nanoseconds since `epoch` of the last accepted Down, offset by one; 0 means none
    last_trigger: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<MappingRegistry>,
        executor: PlaybackExecutor,
        state: Arc<StateCell>,
        cancel: CancelToken,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            executor,
            cancel,
            settings,
            inflight: Arc::new(InFlight {
                count: Mutex::new(0),
                state,
                playing: KeySet::new(),
            }),
            held: KeySet::new(),
            epoch: Instant::now(),
            last_trigger: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn is_held(&self, raw_code: u16) -> bool {
        self.held.contains(raw_code)
    }

    /// Process one hook event
    pub fn handle(&self, event: &KeyEvent) -> DispatchOutcome {
        if !event.is_down() {
            self.held.remove(event.raw_code);
            return DispatchOutcome::Released;
        }

        if !self.inflight.state.get().accepts_triggers() {
            return DispatchOutcome::Dropped(DropReason::NotArmed);
        }

        if !self.held.insert(event.raw_code) {
            return DispatchOutcome::Dropped(DropReason::Repeat);
        }

        if !self.claim_debounce(event.timestamp) {
            debug!("Debounced key {}", event.raw_code);
            return DispatchOutcome::Dropped(DropReason::Debounced);
        }

        let Some(mapping) = self.registry.active_mapping(event.raw_code) else {
            return DispatchOutcome::Dropped(DropReason::NoMapping);
        };

        match self.settings.mode {
            DispatchMode::Serialised => self.play_inline(mapping),
            DispatchMode::Concurrent => self.play_on_worker(event.raw_code, mapping),
        }
    }

    fn claim_debounce(&self, timestamp: Instant) -> bool {
        let now = timestamp.saturating_duration_since(self.epoch).as_nanos() as u64 + 1;
        let last = self.last_trigger.load(Ordering::SeqCst);
        let floor = self.settings.debounce_floor.as_nanos() as u64;
        if last != 0 && now.saturating_sub(last) < floor {
            return false;
        }
        self.last_trigger
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn play_inline(&self, mapping: Arc<Mapping>) -> DispatchOutcome {
        if !self.inflight.begin() {
            return DispatchOutcome::Dropped(DropReason::NotArmed);
        }
        info!("Trigger {} -> '{}'", mapping.trigger, mapping.name);

        let result = self.executor.play_mapping(&mapping, &self.cancel);
        self.inflight.end();
        self.last_trigger.store(0, Ordering::SeqCst);

        match result {
            Ok(outcome) => DispatchOutcome::Played {
                mapping_id: mapping.id.clone(),
                outcome,
            },
            Err(Error::Busy) => DispatchOutcome::Dropped(DropReason::Busy),
            Err(error) => {
                warn!("Playback of '{}' failed: {}", mapping.name, error);
                DispatchOutcome::Failed {
                    mapping_id: mapping.id.clone(),
                    error,
                }
            }
        }
    }

    fn play_on_worker(&self, raw_code: u16, mapping: Arc<Mapping>) -> DispatchOutcome {
        if !self.inflight.playing.insert(raw_code) {
            return DispatchOutcome::Dropped(DropReason::Busy);
        }
        if !self.inflight.begin() {
            self.inflight.playing.remove(raw_code);
            return DispatchOutcome::Dropped(DropReason::NotArmed);
        }
        info!("Trigger {} -> '{}' (worker)", mapping.trigger, mapping.name);

        let executor = self.executor.sibling();
        let cancel = self.cancel.clone();
        let inflight = Arc::clone(&self.inflight);
        let mapping_id = mapping.id.clone();

        let spawned = thread::Builder::new()
            .name(format!("keyrelay-play-{}", mapping.trigger))
            .spawn(move || {
                if let Err(e) = executor.play_mapping(&mapping, &cancel) {
                    warn!("Playback of '{}' failed: {}", mapping.name, e);
                }
                inflight.playing.remove(raw_code);
                inflight.end();
            });

        match spawned {
            Ok(handle) => {
                let mut workers = self.workers.lock();
                workers.retain(|h| !h.is_finished());
                workers.push(handle);
                DispatchOutcome::Spawned { mapping_id }
            }
            Err(e) => {
                self.inflight.playing.remove(raw_code);
                self.inflight.end();
                DispatchOutcome::Failed {
                    mapping_id,
                    error: Error::Conflict(format!("failed to spawn playback worker: {}", e)),
                }
            }
        }
    }

    /// Consume events until shutdown, a hook fault, or the hook disconnecting
    pub fn run(&self, channels: HookChannels, shutdown: Receiver<()>) -> DispatcherExit {
        let mut reported_drops = 0u64;

        let exit = loop {
            select! {
                recv(channels.events) -> msg => match msg {
                    Ok(event) => {
                        let dropped = channels.dropped.load(Ordering::Relaxed);
                        if dropped > reported_drops {
                            warn!(
                                "Hook buffer overflowed: {} event(s) dropped ({} total)",
                                dropped - reported_drops,
                                dropped
                            );
                            reported_drops = dropped;
                        }
                        let outcome = self.handle(&event);
                        debug!("Key {} {:?}: {:?}", event.raw_code, event.kind, outcome);
                    }
                    Err(_) => match channels.faults.try_recv() {
                        Ok(message) => break DispatcherExit::Fault(message),
                        Err(_) => break DispatcherExit::Disconnected,
                    },
                },
                recv(channels.faults) -> msg => match msg {
                    Ok(message) => break DispatcherExit::Fault(message),
                    Err(_) => break DispatcherExit::Disconnected,
                },
                recv(shutdown) -> _ => break DispatcherExit::Shutdown,
            }
        };

        self.join_workers();
        exit
    }

    fn join_workers(&self) {
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }
}
