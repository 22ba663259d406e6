//! Mapping Types
//!
//! Defines the data structures for user key mappings:
//! - Mapping: trigger key -> ordered output steps, with enable flag and timestamps
//! - MappingRecord: the on-disk JSON shape (`start_key`, `keys: [{key, delay}]`)

use crate::error::{Error, ParseError, Result};
use crate::keys::{self, KeyCode, MappedStep, MAX_DELAY_MS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user-defined trigger -> keystroke sequence mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "MappingRecord", try_from = "MappingRecord")]
pub struct Mapping {
    /// Stable unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Whitelisted trigger key
    pub trigger: KeyCode,
    /// Output steps, never empty
    pub steps: Vec<MappedStep>,
    /// At most one mapping per trigger is enabled
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    /// Create a new enabled mapping with a fresh id
    pub fn new(name: &str, trigger: KeyCode, steps: Vec<MappedStep>) -> Result<Self> {
        let name = validate_parts(name, trigger, &steps)?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name,
            trigger,
            steps,
            enabled: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace name, trigger and steps, keeping id and creation time
    pub fn revise(&self, name: &str, trigger: KeyCode, steps: Vec<MappedStep>) -> Result<Self> {
        let name = validate_parts(name, trigger, &steps)?;
        Ok(Self {
            id: self.id.clone(),
            name,
            trigger,
            steps,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: Utc::now(),
        })
    }

    /// Steps in `key(delay), ...` form
    pub fn sequence_text(&self) -> String {
        keys::format_sequence(&self.steps)
    }
}

/// Check the mapping invariants; returns the trimmed name
pub(crate) fn validate_parts(name: &str, trigger: KeyCode, steps: &[MappedStep]) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("name is required".into()));
    }
    if !trigger.is_trigger() {
        return Err(Error::Validation(format!(
            "trigger '{}' is not allowed (expected one of: {})",
            trigger,
            keys::trigger_names().join(", ")
        )));
    }
    if steps.is_empty() {
        return Err(Error::Validation("at least one key step is required".into()));
    }
    if let Some(step) = steps.iter().find(|s| s.delay_ms > MAX_DELAY_MS) {
        return Err(ParseError::DelayOutOfRange {
            value: i64::from(step.delay_ms),
            max: MAX_DELAY_MS,
        }
        .into());
    }
    Ok(name.to_string())
}

/// One step as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub key: String,
    #[serde(default)]
    pub delay: i64,
}

/// A mapping as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingRecord {
    pub id: String,
    pub name: String,
    pub start_key: String,
    pub keys: Vec<StepRecord>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl From<Mapping> for MappingRecord {
    fn from(mapping: Mapping) -> Self {
        Self {
            id: mapping.id,
            name: mapping.name,
            start_key: mapping.trigger.name().to_string(),
            keys: mapping
                .steps
                .iter()
                .map(|step| StepRecord {
                    key: step.key.to_string(),
                    delay: i64::from(step.delay_ms),
                })
                .collect(),
            enabled: mapping.enabled,
            created_at: mapping.created_at,
            updated_at: mapping.updated_at,
        }
    }
}

impl TryFrom<MappingRecord> for Mapping {
    type Error = Error;

    fn try_from(record: MappingRecord) -> Result<Self> {
        if record.id.trim().is_empty() {
            return Err(Error::Validation("mapping record has no id".into()));
        }
        let trigger = keys::parse_trigger(&record.start_key)?;

        let mut steps = Vec::with_capacity(record.keys.len());
        for step in &record.keys {
            let delay = u32::try_from(step.delay)
                .ok()
                .filter(|d| *d <= MAX_DELAY_MS)
                .ok_or(ParseError::DelayOutOfRange {
                    value: step.delay,
                    max: MAX_DELAY_MS,
                })?;
            steps.push(MappedStep::new(keys::parse_token(&step.key)?, delay)?);
        }

        let name = validate_parts(&record.name, trigger, &steps)?;
        Ok(Self {
            id: record.id,
            name,
            trigger,
            steps,
            enabled: record.enabled,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
