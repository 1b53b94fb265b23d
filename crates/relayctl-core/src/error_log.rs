// Bounded log of device faults and feedback mismatches.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::RelayId;

pub const MIN_CAPACITY: usize = 10;
pub const MAX_CAPACITY: usize = 20;
pub const DEFAULT_CAPACITY: usize = 10;

/// What an error-log entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ErrorCode {
    /// Commanded state and feedback disagree on this relay.
    FeedbackMismatch(RelayId),
    /// Fault code published by the device.
    Device(i64),
}

impl ErrorCode {
    /// The numeric code the device dashboard shows: the relay index for
    /// mismatches, the device's own code otherwise.
    pub fn numeric(self) -> i64 {
        match self {
            Self::FeedbackMismatch(relay) => i64::from(relay.index()),
            Self::Device(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FeedbackMismatch(relay) => write!(f, "MISMATCH-{relay}"),
            Self::Device(code) => write!(f, "DEVICE-{code}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: Uuid,
    pub code: ErrorCode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Ring buffer of [`ErrorLogEntry`]; the oldest entry is evicted first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorLog {
    entries: VecDeque<ErrorLogEntry>,
    #[serde(skip)]
    capacity: usize,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ErrorLog {
    /// Capacity is clamped into `MIN_CAPACITY..=MAX_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_CAPACITY, MAX_CAPACITY);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, code: ErrorCode, message: impl Into<String>) -> ErrorLogEntry {
        self.push_at(code, message, Utc::now())
    }

    pub fn push_at(
        &mut self,
        code: ErrorCode,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> ErrorLogEntry {
        let entry = ErrorLogEntry {
            id: Uuid::new_v4(),
            code,
            message: message.into(),
            timestamp,
        };
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        entry
    }

    /// Entries, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ErrorLogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
