//! Serializable pattern-bank format.
//!
//! A bank is an ordered list of patterns plus the index of the active one.
//! A pattern is a full snapshot of the sequencer: tempo and every track
//! with its steps. Control maps are sparse, keyed by control index
//! (0 = program change, 1 = pitch bend, 2 = aftertouch, 3.. = CC 0..=127),
//! and only carry the controls that are active on the track or overridden
//! on a step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bank {
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub active: usize,
}

impl Bank {
    /// A bank of `count` free patterns.
    pub fn with_patterns(count: usize) -> Self {
        Self {
            patterns: vec![Pattern::default(); count],
            active: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(default)]
    pub tempo: f64,
    #[serde(default)]
    pub tracks: Vec<TrackSnapshot>,
}

impl Pattern {
    /// A pattern with no tracks is an unused slot.
    pub fn is_free(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub steps: Vec<StepSnapshot>,
    pub device: usize,
    pub channel: u8,
    /// Active controls only: control index -> value.
    #[serde(default)]
    pub controls: BTreeMap<usize, i16>,
    pub length: u32,
    pub chord: Vec<u8>,
    pub velocity: u8,
    pub probability: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub active: bool,
    /// Overridden controls only: control index -> value.
    #[serde(default)]
    pub controls: BTreeMap<usize, i16>,
    pub length: Option<u32>,
    pub chord: Option<Vec<u8>>,
    pub velocity: Option<u8>,
    pub probability: Option<u8>,
    #[serde(default)]
    pub offset: u32,
}
