// src/types.rs
//
// Core data types shared across the session: frames from the source,
// raw detections from the recognition service, and the display-name
// resolution used by both the cache and the overlay renderer.

use serde::{Deserialize, Serialize};

pub const UNKNOWN_CARD: &str = "Unknown Card";
pub const UNKNOWN_SET: &str = "Unknown Set";
pub const UNKNOWN_ID: &str = "Unknown ID";

/// One raw RGB frame grabbed from the source, in source pixel space.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: f64,
}

/// One ranked candidate match for a detected region. `distance` is a
/// pHash distance — lower is better.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateMatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub card_id: Option<String>,
    #[serde(default)]
    pub set_id: Option<String>,
    #[serde(default)]
    pub distance: Option<f32>,
}

/// One recognized region from one response. The polygon is only valid
/// for the frame it came from; it may be empty when the server pushed a
/// detection without geometry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawDetection {
    #[serde(default)]
    pub polygon: Vec<(f32, f32)>,
    /// (height, width) of the rectified crop, when known.
    #[serde(default)]
    pub crop_size: Option<(u32, u32)>,
    /// Best match first.
    #[serde(default)]
    pub matches: Vec<CandidateMatch>,
}

impl RawDetection {
    pub fn best_match(&self) -> Option<&CandidateMatch> {
        self.matches.first()
    }

    /// Display name priority: match name → card id → set id → "Unknown Card".
    pub fn display_name(&self) -> String {
        let Some(best) = self.best_match() else {
            return UNKNOWN_CARD.to_string();
        };
        best.name
            .clone()
            .or_else(|| best.card_id.clone())
            .or_else(|| best.set_id.clone())
            .unwrap_or_else(|| UNKNOWN_CARD.to_string())
    }
}

/// Tuning parameters forwarded to the recognition service with every
/// submitted frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    pub visualize: bool,
    pub confidence: f32,
    pub iou: f32,
    pub max_detections: u32,
    /// Optional rectification insets (base, min, max), forwarded only
    /// when configured.
    pub insets: Option<(f32, f32, f32)>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            visualize: false,
            confidence: 0.25,
            iou: 0.5,
            max_detections: 5,
            insets: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn match_with(name: Option<&str>, card: Option<&str>, set: Option<&str>) -> CandidateMatch {
        CandidateMatch {
            name: name.map(String::from),
            card_id: card.map(String::from),
            set_id: set.map(String::from),
            distance: Some(3.0),
        }
    }

    fn detection_with(m: CandidateMatch) -> RawDetection {
        RawDetection {
            polygon: vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)],
            crop_size: Some((448, 320)),
            matches: vec![m],
        }
    }

    #[test]
    fn test_display_name_prefers_match_name() {
        let d = detection_with(match_with(Some("Pikachu"), Some("025"), Some("base1")));
        assert_eq!(d.display_name(), "Pikachu");
    }

    #[test]
    fn test_display_name_falls_back_to_card_then_set() {
        let d = detection_with(match_with(None, Some("025"), Some("base1")));
        assert_eq!(d.display_name(), "025");

        let d = detection_with(match_with(None, None, Some("base1")));
        assert_eq!(d.display_name(), "base1");
    }

    #[test]
    fn test_display_name_unknown_when_no_matches() {
        let d = RawDetection {
            polygon: vec![],
            crop_size: None,
            matches: vec![],
        };
        assert_eq!(d.display_name(), UNKNOWN_CARD);
    }
}
