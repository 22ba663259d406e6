//! Struct Type Definitions
//!
//! Data structures for keyboard events.

use keyrelay_core::keys::KeyCode;
use std::time::Instant;

/// Key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Down,
    Up,
}

/// A normalised physical key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Key state (down/up)
    pub kind: KeyKind,
    /// Windows virtual-key code
    pub raw_code: u16,
    /// Canonical key name when the code is in the key table
    pub symbolic_name: Option<&'static str>,
    /// High-precision timestamp
    pub timestamp: Instant,
}

impl KeyEvent {
    /// Create an event stamped with the current time
    pub fn new(kind: KeyKind, raw_code: u16) -> Self {
        Self::at(kind, raw_code, Instant::now())
    }

    pub fn at(kind: KeyKind, raw_code: u16, timestamp: Instant) -> Self {
        Self {
            kind,
            raw_code,
            symbolic_name: KeyCode::from_vk(raw_code).map(KeyCode::name),
            timestamp,
        }
    }

    pub fn down(raw_code: u16) -> Self {
        Self::new(KeyKind::Down, raw_code)
    }

    pub fn up(raw_code: u16) -> Self {
        Self::new(KeyKind::Up, raw_code)
    }

    pub fn is_down(&self) -> bool {
        self.kind == KeyKind::Down
    }
}
