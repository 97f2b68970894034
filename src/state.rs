//! Alarm state and the records/events built from it (SPEC_FULL.md §3, §4.5).

use serde::{Deserialize, Serialize};

use crate::id::AlarmId;
use crate::level::Level;
use crate::timestamp::Timestamp;

/// `Unknown` means "never observed". Every operator except `unknown_as_set`
/// treats it as `Clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    Set,
    Clear,
    Unknown,
}

impl AlarmState {
    /// `Unknown` commutes to `Clear` everywhere except `unknown_as_set`.
    pub fn is_set(self) -> bool {
        matches!(self, AlarmState::Set)
    }

    pub fn from_set(set: bool) -> Self {
        if set {
            AlarmState::Set
        } else {
            AlarmState::Clear
        }
    }
}

/// The Store's authoritative per-id record (SPEC_FULL.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub state: AlarmState,
    pub description: Option<String>,
    pub level: Level,
    pub timestamp: Timestamp,
    pub previous_state: AlarmState,
    pub previous_timestamp: Timestamp,
}

impl AlarmRecord {
    pub fn unknown(level: Level, now: Timestamp) -> Self {
        AlarmRecord {
            state: AlarmState::Unknown,
            description: None,
            level,
            timestamp: now,
            previous_state: AlarmState::Unknown,
            previous_timestamp: now,
        }
    }
}

/// A notification published by the Store to matching subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: AlarmId,
    pub state: AlarmState,
    pub previous_state: AlarmState,
    pub description: Option<String>,
    pub level: Level,
    pub timestamp: Timestamp,
    pub previous_timestamp: Timestamp,
}
