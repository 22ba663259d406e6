//! Type Definitions
//!
//! Event types passed from the input hooks to the dispatcher.

mod structs;

pub use structs::*;
