//! One cell of a track's grid.
//!
//! A step stores optional overrides for the note parameters; anything left
//! unset resolves to the owning track's default at evaluation time, never
//! cached, so a track edit is picked up on the very next pulse. Note
//! emission and the probability draw live on the track, which owns the
//! device, channel and RNG.

use std::collections::BTreeMap;

use ostinato_types::{
    StepSnapshot, INFINITE_LENGTH, MAX_LENGTH, MAX_NOTE, MAX_OFFSET, MAX_PROBABILITY,
    MAX_VELOCITY, MIN_LENGTH, MIN_NOTE, PULSES_PER_STEP,
};

use crate::control::Control;

#[derive(Debug, Clone)]
pub struct Step {
    pub(crate) position: usize,
    /// An inactive step advances like an active one but triggers nothing.
    pub(crate) active: bool,
    /// Set while the step is sounding; blocks re-trigger until reset.
    pub(crate) triggered: bool,
    /// Overridden controls only, by bank index.
    pub(crate) controls: BTreeMap<usize, Control>,
    chord: Option<Vec<u8>>,
    length: Option<u32>,
    velocity: Option<u8>,
    probability: Option<u8>,
    /// Delays the trigger by 0 to 5 pulses past the grid position.
    offset: u32,
}

impl Step {
    pub fn new(position: usize) -> Self {
        Self {
            position,
            active: false,
            triggered: false,
            controls: BTreeMap::new(),
            chord: None,
            length: None,
            velocity: None,
            probability: None,
            offset: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// The step chord, or the track's when unset.
    pub fn chord<'a>(&'a self, track_chord: &'a [u8]) -> &'a [u8] {
        self.chord.as_deref().unwrap_or(track_chord)
    }

    /// The step length in pulses, or the track's when unset.
    pub fn length(&self, track_length: u32) -> u32 {
        self.length.unwrap_or(track_length)
    }

    /// The step velocity, or the track's when unset.
    pub fn velocity(&self, track_velocity: u8) -> u8 {
        self.velocity.unwrap_or(track_velocity)
    }

    /// The step trigger probability, or the track's when unset.
    pub fn probability(&self, track_probability: u8) -> u8 {
        self.probability.unwrap_or(track_probability)
    }

    pub fn is_infinite(&self, track_length: u32) -> bool {
        self.length(track_length) == INFINITE_LENGTH
    }

    /// Pulse at which this step fires, offset included.
    pub fn starting_pulse(&self) -> u32 {
        self.position as u32 * PULSES_PER_STEP + self.offset
    }

    /// Pulse at which this step stops sounding, wrapped to the track's
    /// pulse range.
    pub fn ending_pulse(&self, track_length: u32, track_pulses: u32) -> u32 {
        (self.starting_pulse() + self.length(track_length) - 1) % track_pulses
    }

    pub(crate) fn set_chord(&mut self, chord: Vec<u8>) {
        if chord.is_empty() || chord.iter().any(|&n| !(MIN_NOTE..=MAX_NOTE).contains(&n)) {
            return;
        }
        self.chord = Some(chord);
    }

    pub(crate) fn set_length(&mut self, length: u32) {
        if length < MIN_LENGTH {
            return;
        }
        // Anything past the ceiling means infinite.
        self.length = Some(length.min(MAX_LENGTH));
    }

    pub(crate) fn set_velocity(&mut self, velocity: u8) {
        if velocity > MAX_VELOCITY {
            return;
        }
        self.velocity = Some(velocity);
    }

    pub(crate) fn set_probability(&mut self, probability: u8) {
        if probability > MAX_PROBABILITY {
            return;
        }
        self.probability = Some(probability);
    }

    pub(crate) fn set_offset(&mut self, offset: u32) {
        if offset > MAX_OFFSET {
            return;
        }
        self.offset = offset;
    }

    /// Drop every override so the step inherits the track again.
    pub(crate) fn clear_parameters(&mut self) {
        self.chord = None;
        self.length = None;
        self.velocity = None;
        self.probability = None;
        self.offset = 0;
        self.controls.clear();
    }

    pub(crate) fn snapshot(&self) -> StepSnapshot {
        StepSnapshot {
            active: self.active,
            controls: self
                .controls
                .iter()
                .map(|(&index, control)| (index, control.value()))
                .collect(),
            length: self.length,
            chord: self.chord.clone(),
            velocity: self.velocity,
            probability: self.probability,
            offset: self.offset,
        }
    }

    /// Rebuild a step from its snapshot; control overrides clone the
    /// track's bank entry at the stored value.
    pub(crate) fn from_snapshot(
        position: usize,
        snapshot: &StepSnapshot,
        track_controls: &[Control],
    ) -> Self {
        let mut step = Self::new(position);
        step.active = snapshot.active;
        step.chord = snapshot.chord.clone();
        step.length = snapshot.length;
        step.velocity = snapshot.velocity;
        step.probability = snapshot.probability;
        step.offset = snapshot.offset.min(MAX_OFFSET);
        for (&index, &value) in &snapshot.controls {
            if let Some(template) = track_controls.get(index) {
                let mut control = template.clone();
                control.set(value);
                step.controls.insert(index, control);
            }
        }
        step
    }
}
