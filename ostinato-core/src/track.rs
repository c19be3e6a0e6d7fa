//! Tracks: an ordered run of steps, shared note defaults, and the trigger
//! state machine advanced once per clock pulse.
//!
//! Each track runs its trigger evaluation on a dedicated worker thread fed
//! through a rendezvous channel, so one track's note-off-heavy pulse never
//! runs on the clock thread or holds up another track. The state itself
//! sits behind a mutex shared only between the worker and the sequencer's
//! synchronous mutators.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Sender};

use ostinato_types::{
    TrackSnapshot, DEFAULT_NOTE, DEFAULT_PROBABILITY, DEFAULT_VELOCITY, MAX_CHANNEL, MAX_LENGTH,
    MAX_NOTE, MAX_PROBABILITY, MAX_STEPS, MAX_VELOCITY, MIN_LENGTH, MIN_NOTE, MIN_STEPS,
    PULSES_PER_STEP,
};

use crate::control::{control_bank, Control};
use crate::midi::MidiOut;
use crate::rng::Rng;
use crate::step::Step;

pub struct TrackState {
    pub(crate) steps: Vec<Step>,
    /// Playhead position, `0 <= pulse < PULSES_PER_STEP * steps.len()`.
    /// Tracks with different step counts wrap independently.
    pub(crate) pulse: u32,
    pub(crate) device: usize,
    pub(crate) channel: u8,
    /// An inactive track advances like an active one but triggers nothing.
    pub(crate) active: bool,
    /// Index of the step that last fired, for overlap resolution and
    /// control dedupe.
    pub(crate) last_triggered: usize,
    // Note defaults, overridable per step.
    pub(crate) chord: Vec<u8>,
    pub(crate) length: u32,
    pub(crate) velocity: u8,
    pub(crate) probability: u8,
    pub(crate) controls: Vec<Control>,
    /// Bank indices of the controls that are in use on this track.
    pub(crate) active_controls: BTreeSet<usize>,
    pub(crate) rng: Rng,
}

impl TrackState {
    pub fn new(device: usize, channel: u8, step_count: usize) -> Self {
        Self {
            steps: (0..step_count.max(MIN_STEPS)).map(Step::new).collect(),
            pulse: 0,
            device,
            channel: channel.min(MAX_CHANNEL),
            active: true,
            last_triggered: 0,
            chord: vec![DEFAULT_NOTE],
            length: PULSES_PER_STEP,
            velocity: DEFAULT_VELOCITY,
            probability: DEFAULT_PROBABILITY,
            controls: control_bank(),
            active_controls: BTreeSet::new(),
            rng: Rng::from_time(),
        }
    }

    /// Total pulses in one loop of this track.
    pub fn pulses(&self) -> u32 {
        self.steps.len() as u32 * PULSES_PER_STEP
    }

    pub fn pulse(&self) -> u32 {
        self.pulse
    }

    /// The step the playhead is on.
    pub fn current_step(&self) -> usize {
        (self.pulse / PULSES_PER_STEP) as usize
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// One clock pulse: fire steps reaching their starting pulse, stop
    /// steps past their ending pulse, advance and wrap the playhead.
    /// Steps are visited in index order, so the outcome of a pulse is
    /// deterministic.
    pub(crate) fn advance(&mut self, midi: &dyn MidiOut) {
        for i in 0..self.steps.len() {
            if self.active && self.steps[i].starting_pulse() == self.pulse {
                // One sounding step per track: a firing step silences the
                // previously triggered one, unless that one sustains
                // infinitely.
                if self.steps[i].active && !self.step_is_infinite(self.last_triggered) {
                    self.reset_step(self.last_triggered, midi);
                }
                self.trigger_step(i, midi);
            }
        }
        let pulses = self.pulses();
        for i in 0..self.steps.len() {
            if self.steps[i].ending_pulse(self.length, pulses) == self.pulse
                && !self.steps[i].is_infinite(self.length)
            {
                self.reset_step(i, midi);
            }
        }
        self.pulse += 1;
        if self.pulse == self.pulses() {
            self.pulse = 0;
        }
    }

    fn trigger_step(&mut self, index: usize, midi: &dyn MidiOut) {
        let Some(step) = self.steps.get(index) else {
            return;
        };
        if !step.active || step.triggered {
            return;
        }
        let probability = step.probability(self.probability);
        if probability < MAX_PROBABILITY && self.rng.next_percent() >= probability {
            return;
        }
        self.send_step_controls(index, midi);
        let step = &self.steps[index];
        let velocity = step.velocity(self.velocity);
        let notes: Vec<u8> = step.chord(&self.chord).to_vec();
        for note in notes {
            midi.note_on(self.device, self.channel, note, velocity);
        }
        self.steps[index].triggered = true;
        self.last_triggered = index;
    }

    fn reset_step(&mut self, index: usize, midi: &dyn MidiOut) {
        let Some(step) = self.steps.get(index) else {
            return;
        };
        if !step.triggered {
            return;
        }
        let notes: Vec<u8> = step.chord(&self.chord).to_vec();
        for note in notes {
            midi.note_off(self.device, self.channel, note);
        }
        self.steps[index].triggered = false;
    }

    /// Emit the controls whose resolved value changed since the last
    /// trigger. When the same step fires again the reference is the
    /// track's resting value; otherwise it is the previous step's
    /// resolved value. Runs before `last_triggered` moves to `index`.
    fn send_step_controls(&mut self, index: usize, midi: &dyn MidiOut) {
        let same_step = self.last_triggered == index;
        for &control in &self.active_controls {
            let current = self.resolved_control(index, control);
            let unchanged = if same_step {
                current.value() == self.controls[control].value()
            } else {
                current.value() == self.resolved_control(self.last_triggered, control).value()
            };
            if unchanged {
                continue;
            }
            current.send(midi, self.device, self.channel);
        }
    }

    /// A step's control override, or the track's bank entry.
    fn resolved_control(&self, step: usize, index: usize) -> &Control {
        self.steps
            .get(step)
            .and_then(|s| s.controls.get(&index))
            .unwrap_or(&self.controls[index])
    }

    fn step_is_infinite(&self, index: usize) -> bool {
        self.steps
            .get(index)
            .is_some_and(|s| s.is_infinite(self.length))
    }

    /// Emit the current value of every active control, deduped or not.
    /// Used when playback starts so downstream devices reflect the state.
    pub(crate) fn send_controls(&self, midi: &dyn MidiOut) {
        for &control in &self.active_controls {
            self.controls[control].send(midi, self.device, self.channel);
        }
    }

    /// Move the playhead back to the start and stop every sounding step.
    pub(crate) fn reset(&mut self, midi: &dyn MidiOut) {
        self.pulse = 0;
        self.last_triggered = 0;
        self.clear(midi);
    }

    pub(crate) fn clear(&mut self, midi: &dyn MidiOut) {
        for i in 0..self.steps.len() {
            self.reset_step(i, midi);
        }
    }

    pub(crate) fn toggle_active(&mut self) {
        self.active = !self.active;
    }

    pub(crate) fn add_step(&mut self) {
        if self.steps.len() == MAX_STEPS {
            return;
        }
        self.steps.push(Step::new(self.steps.len()));
    }

    pub(crate) fn remove_step(&mut self, midi: &dyn MidiOut) {
        if self.steps.len() == MIN_STEPS {
            return;
        }
        let last = self.steps.len() - 1;
        if self.last_triggered == last {
            self.last_triggered = 0;
        }
        self.reset_step(last, midi);
        self.steps.pop();
        // The playhead may now sit past the shrunk range.
        if self.pulse >= self.pulses() {
            self.pulse = 0;
        }
    }

    pub(crate) fn toggle_step(&mut self, index: usize, midi: &dyn MidiOut) {
        if index >= self.steps.len() {
            return;
        }
        self.reset_step(index, midi);
        let step = &mut self.steps[index];
        step.active = !step.active;
        step.clear_parameters();
    }

    pub(crate) fn set_chord(&mut self, chord: Vec<u8>, midi: &dyn MidiOut) {
        if chord.is_empty() || chord.iter().any(|&n| !(MIN_NOTE..=MAX_NOTE).contains(&n)) {
            return;
        }
        // Release sounding notes first so their note offs match.
        self.clear(midi);
        self.chord = chord;
    }

    pub(crate) fn set_length(&mut self, length: u32) {
        if length < MIN_LENGTH {
            return;
        }
        self.length = length.min(MAX_LENGTH);
    }

    pub(crate) fn set_velocity(&mut self, velocity: u8) {
        if velocity > MAX_VELOCITY {
            return;
        }
        self.velocity = velocity;
    }

    pub(crate) fn set_probability(&mut self, probability: u8) {
        if probability > MAX_PROBABILITY {
            return;
        }
        self.probability = probability;
    }

    pub(crate) fn set_channel(&mut self, channel: u8) {
        if channel > MAX_CHANNEL {
            return;
        }
        self.channel = channel;
    }

    pub(crate) fn set_device(&mut self, device: usize, device_count: usize) {
        if device >= device_count {
            return;
        }
        self.device = device;
    }

    pub(crate) fn set_control(&mut self, index: usize, value: i16) {
        let Some(control) = self.controls.get_mut(index) else {
            return;
        };
        control.set(value);
        self.active_controls.insert(index);
    }

    /// Deactivate a control. Its value survives so re-enabling resumes
    /// from the previous position.
    pub(crate) fn clear_control(&mut self, index: usize) {
        self.active_controls.remove(&index);
    }

    pub(crate) fn set_step_chord(&mut self, index: usize, chord: Vec<u8>, midi: &dyn MidiOut) {
        if index >= self.steps.len() {
            return;
        }
        self.reset_step(index, midi);
        self.steps[index].set_chord(chord);
    }

    /// Overwrite a step with a clipboard copy, releasing whatever the
    /// old step was sounding first.
    pub(crate) fn replace_step(&mut self, index: usize, mut step: Step, midi: &dyn MidiOut) {
        if index >= self.steps.len() {
            return;
        }
        self.reset_step(index, midi);
        step.position = index;
        step.triggered = false;
        self.steps[index] = step;
    }

    pub(crate) fn set_step_control(&mut self, step: usize, index: usize, value: i16) {
        let Some(template) = self.controls.get(index).cloned() else {
            return;
        };
        let Some(step) = self.steps.get_mut(step) else {
            return;
        };
        step.controls.entry(index).or_insert(template).set(value);
    }

    pub(crate) fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            steps: self.steps.iter().map(Step::snapshot).collect(),
            device: self.device,
            channel: self.channel,
            controls: self
                .active_controls
                .iter()
                .map(|&i| (i, self.controls[i].value()))
                .collect(),
            length: self.length,
            chord: self.chord.clone(),
            velocity: self.velocity,
            probability: self.probability,
        }
    }

    /// Rebuild track state from a snapshot, sanitizing values that would
    /// break the pulse arithmetic.
    pub(crate) fn from_snapshot(snapshot: &TrackSnapshot) -> Self {
        let mut state = Self::new(snapshot.device, snapshot.channel, snapshot.steps.len());
        if !snapshot.chord.is_empty() {
            state.chord = snapshot.chord.clone();
        }
        state.length = snapshot.length.clamp(MIN_LENGTH, MAX_LENGTH);
        state.velocity = snapshot.velocity.min(MAX_VELOCITY);
        state.probability = snapshot.probability.min(MAX_PROBABILITY);
        for (&index, &value) in &snapshot.controls {
            state.set_control(index, value);
        }
        state.steps = snapshot
            .steps
            .iter()
            .take(MAX_STEPS)
            .enumerate()
            .map(|(i, s)| Step::from_snapshot(i, s, &state.controls))
            .collect();
        if state.steps.is_empty() {
            state.steps.push(Step::new(0));
        }
        state
    }
}

/// Handle over a track's state and its trigger worker.
pub struct Track {
    state: Arc<Mutex<TrackState>>,
    trig_tx: Sender<()>,
    stop_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl Track {
    /// Take ownership of the state and start the trigger worker.
    pub(crate) fn start(state: TrackState, midi: Arc<dyn MidiOut>) -> Self {
        let state = Arc::new(Mutex::new(state));
        let (trig_tx, trig_rx) = bounded::<()>(0);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker_state = Arc::clone(&state);
        let worker = thread::spawn(move || loop {
            select! {
                recv(trig_rx) -> msg => {
                    if msg.is_err() {
                        return;
                    }
                    if let Ok(mut state) = worker_state.lock() {
                        state.advance(midi.as_ref());
                    }
                }
                recv(stop_rx) -> _ => return,
            }
        });
        Self {
            state,
            trig_tx,
            stop_tx,
            worker: Some(worker),
        }
    }

    /// Hand one clock pulse to the worker. The rendezvous send returns
    /// once the worker has taken it, keeping tracks in lock-step with the
    /// clock without running trigger work on the clock thread.
    pub(crate) fn tick(&self) {
        let _ = self.trig_tx.send(());
    }

    /// Run `f` against the track state.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut TrackState) -> R) -> Option<R> {
        match self.state.lock() {
            Ok(mut state) => Some(f(&mut state)),
            Err(_) => None,
        }
    }

    /// Release sounding notes, then stop the worker and wait for it.
    pub(crate) fn close(&mut self, midi: &dyn MidiOut) {
        if let Ok(mut state) = self.state.lock() {
            state.clear(midi);
        }
        self.stop_worker();
    }

    fn stop_worker(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::mock::RecordingMidi;
    use ostinato_types::INFINITE_LENGTH;

    fn test_track(steps: usize) -> TrackState {
        let mut state = TrackState::new(0, 0, steps);
        state.rng = Rng::with_seed(7);
        state
    }

    #[test]
    fn test_pulse_wraps_after_full_loop() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(16);
        for _ in 0..96 {
            track.advance(&midi);
        }
        assert_eq!(track.pulse(), 0);
        track.advance(&midi);
        assert_eq!(track.pulse(), 1);
    }

    #[test]
    fn test_step_zero_note_off_after_default_length() {
        // Scenario: 16 steps, step 0 active, default length of 6 pulses.
        let midi = RecordingMidi::new(1);
        let mut track = test_track(16);
        track.steps[0].active = true;
        for _ in 0..6 {
            track.advance(&midi);
        }
        assert_eq!(midi.note_ons().len(), 1);
        assert_eq!(midi.note_offs(), vec![(0, 0, 60)]);
    }

    #[test]
    fn test_overlapping_step_resets_previous() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(16);
        track.steps[0].active = true;
        track.steps[0].set_length(24);
        track.steps[1].active = true;
        for _ in 0..6 {
            track.advance(&midi);
        }
        assert!(track.steps[0].is_triggered());
        assert!(midi.note_offs().is_empty());
        // Pulse 6: step 1 fires and silences step 0 despite its length.
        track.advance(&midi);
        assert!(!track.steps[0].is_triggered());
        assert!(track.steps[1].is_triggered());
        assert_eq!(midi.note_offs().len(), 1);
        let sounding = track.steps.iter().filter(|s| s.is_triggered()).count();
        assert_eq!(sounding, 1);
    }

    #[test]
    fn test_infinite_step_survives_overlap() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(16);
        track.steps[0].active = true;
        track.steps[0].set_length(INFINITE_LENGTH);
        track.steps[1].active = true;
        for _ in 0..7 {
            track.advance(&midi);
        }
        // Step 1 fired without silencing the infinite step 0.
        assert!(track.steps[0].is_triggered());
        assert!(track.steps[1].is_triggered());
        assert!(midi.note_offs().is_empty());
        // A reset releases it.
        track.reset(&midi);
        assert_eq!(midi.note_offs().len(), 2);
        assert_eq!(track.pulse(), 0);
    }

    #[test]
    fn test_infinite_step_never_auto_stops() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(4);
        track.steps[0].active = true;
        track.steps[0].set_length(INFINITE_LENGTH);
        // Several full loops: one note on, no note off.
        for _ in 0..96 {
            track.advance(&midi);
        }
        assert_eq!(midi.note_ons().len(), 1);
        assert!(midi.note_offs().is_empty());
    }

    #[test]
    fn test_probability_boundaries() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(1);
        track.steps[0].active = true;
        track.steps[0].set_probability(0);
        for _ in 0..1000 {
            track.advance(&midi);
            track.reset(&midi);
        }
        assert!(midi.note_ons().is_empty());

        track.steps[0].set_probability(100);
        for _ in 0..1000 {
            track.advance(&midi);
            track.reset(&midi);
        }
        assert_eq!(midi.note_ons().len(), 1000);
    }

    #[test]
    fn test_micro_offset_delays_trigger() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(16);
        track.steps[1].active = true;
        track.steps[1].set_offset(3);
        // Nominal pulse for step 1 is 6; with the offset it fires at 9.
        for _ in 0..9 {
            track.advance(&midi);
        }
        assert!(midi.note_ons().is_empty());
        track.advance(&midi);
        assert_eq!(midi.note_ons().len(), 1);
    }

    #[test]
    fn test_remove_step_clamps_pulse() {
        // Scenario: 2-step track at its last pulse shrinks to 1 step.
        let midi = RecordingMidi::new(1);
        let mut track = test_track(2);
        track.pulse = PULSES_PER_STEP * 2 - 1;
        track.remove_step(&midi);
        assert_eq!(track.steps.len(), 1);
        assert_eq!(track.pulse(), 0);
    }

    #[test]
    fn test_remove_step_keeps_min_and_resets_last_triggered() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(2);
        track.last_triggered = 1;
        track.remove_step(&midi);
        assert_eq!(track.last_triggered, 0);
        // Already at the minimum now.
        track.remove_step(&midi);
        assert_eq!(track.steps.len(), 1);
    }

    #[test]
    fn test_inactive_track_advances_without_triggering() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(4);
        track.steps[0].active = true;
        track.toggle_active();
        for _ in 0..24 {
            track.advance(&midi);
        }
        assert!(midi.note_ons().is_empty());
        assert_eq!(track.pulse(), 0);
    }

    #[test]
    fn test_inactive_step_advances_silently() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(4);
        for _ in 0..24 {
            track.advance(&midi);
        }
        assert!(midi.note_ons().is_empty());
    }

    #[test]
    fn test_chord_notes_all_emitted() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(4);
        track.steps[0].active = true;
        track.set_chord(vec![60, 64, 67], &midi);
        for _ in 0..6 {
            track.advance(&midi);
        }
        let ons: Vec<u8> = midi.note_ons().iter().map(|&(_, _, n, _)| n).collect();
        assert_eq!(ons, vec![60, 64, 67]);
        assert_eq!(midi.note_offs().len(), 3);
    }

    #[test]
    fn test_control_dedupe_skips_unchanged_values() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(2);
        track.steps[0].active = true;
        track.steps[1].active = true;
        track.set_control(crate::control::CC_BASE + 7, 64);
        // Both steps resolve to the track value: sent on the first
        // trigger only (last_triggered starts at step 0's index).
        for _ in 0..12 {
            track.advance(&midi);
        }
        let cc_count = midi
            .events()
            .iter()
            .filter(|(_, m)| matches!(m, crate::midi::Message::ControlChange { .. }))
            .count();
        assert_eq!(cc_count, 0);

        // A step override that differs from the neighbour is sent each
        // time the value changes across triggers.
        track.set_step_control(1, crate::control::CC_BASE + 7, 100);
        midi.clear();
        for _ in 0..12 {
            track.advance(&midi);
        }
        let cc_values: Vec<u8> = midi
            .events()
            .iter()
            .filter_map(|(_, m)| match m {
                crate::midi::Message::ControlChange { value, .. } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(cc_values, vec![64, 100]);
    }

    #[test]
    fn test_toggle_step_clears_overrides_and_releases() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(4);
        track.steps[0].active = true;
        track.steps[0].set_length(INFINITE_LENGTH);
        track.advance(&midi);
        assert!(track.steps[0].is_triggered());
        track.toggle_step(0, &midi);
        assert!(!track.steps[0].is_active());
        assert!(!track.steps[0].is_triggered());
        assert_eq!(midi.note_offs().len(), 1);
        assert_eq!(track.steps[0].length(6), 6);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let midi = RecordingMidi::new(1);
        let mut track = test_track(4);
        track.steps[2].active = true;
        track.set_chord(vec![48], &midi);
        track.set_length(12);
        track.set_control(crate::control::CC_BASE + 1, 99);
        let snapshot = track.snapshot();
        let rebuilt = TrackState::from_snapshot(&snapshot);
        assert_eq!(rebuilt.steps.len(), 4);
        assert!(rebuilt.steps[2].is_active());
        assert_eq!(rebuilt.chord, vec![48]);
        assert_eq!(rebuilt.length, 12);
        assert!(rebuilt.active_controls.contains(&(crate::control::CC_BASE + 1)));
        assert_eq!(rebuilt.controls[crate::control::CC_BASE + 1].value(), 99);
    }
}
