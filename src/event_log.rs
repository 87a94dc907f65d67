// src/event_log.rs
//
// Bounded session event log. Components don't reach into each other's
// state; status lands here as human-readable entries and the oldest
// entry is dropped once the log is full.

use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub message: String,
}

pub struct EventLog {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    dropped: u64,
}

impl EventLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
            dropped: 0,
        }
    }

    pub fn push(&mut self, timestamp_ms: u64, message: impl Into<String>) {
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
            self.dropped += 1;
            if self.dropped % 100 == 1 {
                warn!(
                    "Event log full ({} entries), dropping oldest ({} dropped so far)",
                    self.max_entries, self.dropped
                );
            }
        }
        self.entries.push_back(LogEntry {
            timestamp_ms,
            message: message.into(),
        });
    }

    /// Most recent entries, newest last.
    pub fn recent(&self, n: usize) -> Vec<&LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
