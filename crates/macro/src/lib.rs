//! KeyRelay Macro - Trigger engine and macro runner
//!
//! Listens for whitelisted trigger keys system-wide and replays the mapped
//! keystroke sequence, and loops built-in recipes on demand.
//!
//! Architecture:
//! - `input_hooks` feeds physical key events into a bounded channel
//! - `dispatcher` consumes that channel and decides which events fire
//! - `executor` emits step sequences through `input_sender`
//! - `engine` and `macro_runner` own the lifecycles; `control` fronts both

pub mod control;
pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod input_hooks;
pub mod input_sender;
pub mod macro_runner;
pub mod types;

#[cfg(test)]
mod test_support;

pub use control::{ControlPlane, Response};
pub use engine::{EngineSettings, KeyEngine};
pub use macro_runner::{MacroRunner, RunnerSettings};
