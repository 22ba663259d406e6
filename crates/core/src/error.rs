//! Error Types
//!
//! Shared error taxonomy for the registry, engine, macro runner and control plane.

use serde::Serialize;
use thiserror::Error;

/// Malformed key name or key sequence
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown key name '{0}'")]
    UnknownKey(String),

    #[error("combo '{0}' has no main key")]
    ComboNeedsMainKey(String),

    #[error("combo '{0}' has no modifier")]
    ComboNeedsModifier(String),

    #[error("delay {value} is out of range (0..={max} ms)")]
    DelayOutOfRange { value: i64, max: u32 },

    #[error("bad syntax: {0}")]
    BadSyntax(String),
}

/// Crate-wide error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("{0} is not running")]
    NotRunning(&'static str),

    #[error("keystroke emission failed at step {step_index}: {reason}")]
    EmitFailed { step_index: usize, reason: String },

    #[error("persistence failed: {0}")]
    Persist(String),

    #[error("playback executor is busy")]
    Busy,
}

/// Serializable error category carried in control-plane responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    ValidationError,
    NotFound,
    Conflict,
    AlreadyRunning,
    NotRunning,
    EmitFailed,
    PersistError,
    Busy,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse(_) => ErrorKind::ParseError,
            Error::Validation(_) => ErrorKind::ValidationError,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            Error::NotRunning(_) => ErrorKind::NotRunning,
            Error::EmitFailed { .. } => ErrorKind::EmitFailed,
            Error::Persist(_) => ErrorKind::PersistError,
            Error::Busy => ErrorKind::Busy,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Persist(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Persist(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
