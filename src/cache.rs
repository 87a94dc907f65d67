// src/cache.rs
//
// The durable collection view of the session. Detections become card
// entities here, deduplicated by case-insensitive name with a cooldown
// window. Entities are never removed by a timer — expired ones simply
// stop blocking re-insertion, so the store may hold historical
// duplicates of an expired name.

use crate::clock::Clock;
use crate::types::{RawDetection, UNKNOWN_ID, UNKNOWN_SET};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct CardEntity {
    pub id: String,
    pub name: String,
    /// pHash distance of the best match; absent when the detection
    /// carried no matches.
    pub confidence: Option<f32>,
    /// Source-frame pixel polygon; may be empty (not renderable).
    pub polygon: Vec<(f32, f32)>,
    pub crop_size: String,
    pub set_id: String,
    pub card_id: String,
    pub timestamp_ms: u64,
    pub kept: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(String),
    /// A live entity with the same case-insensitive name already exists.
    Skipped { existing_id: String },
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

pub struct DetectionCache {
    entries: Vec<CardEntity>,
    cooldown_ms: u64,
    clock: Arc<dyn Clock>,
    seq: u64,
}

impl DetectionCache {
    pub fn new(cooldown_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Vec::new(),
            cooldown_ms,
            clock,
            seq: 0,
        }
    }

    /// Insert a detection as a new entity, unless a live entity with the
    /// same case-insensitive name blocks it.
    pub fn add_or_skip(&mut self, raw: &RawDetection) -> InsertOutcome {
        let name = raw.display_name();
        let name_lower = name.to_lowercase();
        let now = self.clock.now_ms();

        if let Some(existing) = self.entries.iter().find(|e| {
            e.name.to_lowercase() == name_lower
                && now.saturating_sub(e.timestamp_ms) <= self.cooldown_ms
        }) {
            debug!("Skipping '{}' — live entity {} within cooldown", name, existing.id);
            return InsertOutcome::Skipped {
                existing_id: existing.id.clone(),
            };
        }

        let id = self.next_id(now);
        let best = raw.best_match();
        let entity = CardEntity {
            id: id.clone(),
            name,
            confidence: best.and_then(|m| m.distance),
            polygon: raw.polygon.clone(),
            crop_size: raw
                .crop_size
                .map(|(h, w)| format!("{}x{}", h, w))
                .unwrap_or_else(|| "n/a".to_string()),
            set_id: best
                .and_then(|m| m.set_id.clone())
                .unwrap_or_else(|| UNKNOWN_SET.to_string()),
            card_id: best
                .and_then(|m| m.card_id.clone())
                .unwrap_or_else(|| UNKNOWN_ID.to_string()),
            timestamp_ms: now,
            kept: false,
        };
        self.entries.push(entity);
        InsertOutcome::Inserted(id)
    }

    /// Flip the kept flag. Returns the new value, or None if the id is
    /// unknown.
    pub fn toggle_keep(&mut self, id: &str) -> Option<bool> {
        let entity = self.entries.iter_mut().find(|e| e.id == id)?;
        entity.kept = !entity.kept;
        Some(entity.kept)
    }

    /// Delete one entity. No-op (false) if the id is unknown.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Clear the store; returns the number of entities removed.
    pub fn remove_all(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn get(&self, id: &str) -> Option<&CardEntity> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entities in insertion order.
    pub fn entities(&self) -> &[CardEntity] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kept_count(&self) -> usize {
        self.entries.iter().filter(|e| e.kept).count()
    }

    fn next_id(&mut self, now_ms: u64) -> String {
        self.seq += 1;
        format!("{}-{}", now_ms, self.seq)
    }
}
