//! KeyRelay Core Library
//!
//! Shared building blocks for the KeyRelay trigger engine and macro runner
//!
//! Architecture:
//! - `keys`, `mapping`, `registry`: key codec and the persisted mapping store
//! - `recipe`: built-in macro recipes
//! - `cancel`, `state`, `timer`: cancellation, lifecycle and session clock
//! - `notify`: best-effort outbound notifications
//! - `config`, `logging`: data directory, config file and tracing setup

pub mod cancel;
pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod mapping;
pub mod notify;
pub mod recipe;
pub mod registry;
pub mod state;
pub mod timer;

pub use error::{Error, ErrorKind, ParseError, Result};
