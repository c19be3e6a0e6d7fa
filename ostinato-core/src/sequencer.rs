//! The sequencer: owns the clock and the tracks, fans every clock pulse
//! out to the track workers, and manages play state, pattern loading and
//! chaining against the bank.
//!
//! All mutation goes through synchronous methods on the handle; the clock
//! thread and the caller share the same inner state behind one mutex.
//! Out-of-range indices and values are silent no-ops throughout: the
//! engine stays live under rapid or stale frontend input.

use std::sync::{Arc, Mutex};

use ostinato_types::{
    Pattern, DEFAULT_DEVICE, DEFAULT_STEPS_PER_TRACK, MAX_PATTERNS, MAX_TEMPO, MAX_TRACKS,
    MIN_TEMPO, MIN_TRACKS,
};

use crate::bank::BankFile;
use crate::clock::{Clock, TempoCtl};
use crate::config::Config;
use crate::midi::MidiOut;
use crate::step::Step;
use crate::track::{Track, TrackState};

pub(crate) struct Inner {
    midi: Arc<dyn MidiOut>,
    clock: TempoCtl,
    tracks: Vec<Track>,
    bank: BankFile,
    /// Pending pattern indices, loaded one per loop boundary.
    chain: Vec<usize>,
    /// Devices that receive the MIDI beat clock.
    clock_send: Vec<usize>,
    playing: bool,
    /// Suppresses a chain load on the tick that starts playback, where
    /// track 0 is still sitting on pulse 0.
    first_tick: bool,
    default_tracks: usize,
    clipboard: Option<Step>,
}

impl Inner {
    /// One clock pulse. The beat clock goes out whether or not the
    /// sequencer is playing; transport state only gates the tracks.
    pub(crate) fn tick(&mut self) {
        self.midi.send_clock(&self.clock_send);

        if !self.playing {
            return;
        }

        if !self.first_tick && self.track_pulse(0) == Some(0) {
            self.load_next_in_chain();
        }

        for track in &self.tracks {
            track.tick();
        }

        self.first_tick = false;
    }

    fn track_pulse(&self, track: usize) -> Option<u32> {
        self.tracks.get(track)?.with_state(|state| state.pulse())
    }

    fn toggle_play(&mut self) {
        self.playing = !self.playing;
        if !self.playing {
            self.reset();
        } else {
            self.first_tick = true;
            self.send_controls();
        }
    }

    fn reset(&mut self) {
        for track in &self.tracks {
            track.with_state(|state| state.reset(self.midi.as_ref()));
        }
    }

    /// Re-emit every track's active controls so downstream devices pick
    /// up the current knob positions before the first note.
    fn send_controls(&self) {
        for track in &self.tracks {
            track.with_state(|state| state.send_controls(self.midi.as_ref()));
        }
    }

    fn add_track(&mut self) {
        if self.tracks.len() == MAX_TRACKS {
            return;
        }
        // New tracks join at the running pulse so they stay in phase.
        let pulse = self.track_pulse(0).unwrap_or(0);
        let channel = self.tracks.len() as u8;
        let mut state = TrackState::new(DEFAULT_DEVICE, channel, DEFAULT_STEPS_PER_TRACK);
        state.pulse = pulse;
        self.tracks.push(Track::start(state, Arc::clone(&self.midi)));
    }

    fn remove_track(&mut self) {
        if self.tracks.len() == MIN_TRACKS {
            return;
        }
        if let Some(mut track) = self.tracks.pop() {
            track.close(self.midi.as_ref());
        }
    }

    fn chain(&mut self, pattern: usize) {
        if pattern >= MAX_PATTERNS {
            return;
        }
        self.chain.push(pattern);
    }

    fn chain_now(&mut self, pattern: usize) {
        if pattern >= MAX_PATTERNS {
            return;
        }
        self.chain = vec![pattern];
    }

    fn load_next_in_chain(&mut self) {
        if self.chain.is_empty() {
            return;
        }
        let pattern = self.chain.remove(0);
        self.load(pattern);
    }

    /// Snapshot the current state into the active slot and write the
    /// bank, unless nothing is worth keeping.
    fn save(&mut self) {
        if !self.any_step_active() {
            return;
        }
        let pattern = self.snapshot_pattern();
        let active = self.bank.bank.active;
        self.bank.bank.patterns[active] = pattern;
        self.bank.save();
        log::debug!(target: "sequencer", "saved pattern {}", active);
    }

    /// Tear down the current tracks and rebuild from the bank slot.
    /// The outgoing state is saved first. A free slot gets the default
    /// track set and keeps the current tempo.
    fn load(&mut self, pattern: usize) {
        if pattern >= self.bank.bank.patterns.len() {
            return;
        }
        self.save();
        let midi = Arc::clone(&self.midi);
        for mut track in self.tracks.drain(..) {
            track.close(midi.as_ref());
        }
        let snapshot = self.bank.bank.patterns[pattern].clone();
        if snapshot.is_free() {
            for _ in 0..self.default_tracks {
                self.add_track();
            }
        } else {
            self.clock.set(snapshot.tempo);
            for track in snapshot.tracks.iter().take(MAX_TRACKS) {
                self.tracks
                    .push(Track::start(TrackState::from_snapshot(track), Arc::clone(&midi)));
            }
        }
        self.bank.bank.active = pattern;
        log::debug!(target: "sequencer", "loaded pattern {}", pattern);
    }

    fn any_step_active(&self) -> bool {
        self.tracks.iter().any(|track| {
            track
                .with_state(|state| state.steps().iter().any(Step::is_active))
                .unwrap_or(false)
        })
    }

    fn snapshot_pattern(&self) -> Pattern {
        Pattern {
            tempo: self.clock.get(),
            tracks: self
                .tracks
                .iter()
                .filter_map(|track| track.with_state(|state| state.snapshot()))
                .collect(),
        }
    }

    fn close(&mut self) {
        self.playing = false;
        let midi = Arc::clone(&self.midi);
        for mut track in self.tracks.drain(..) {
            track.with_state(|state| state.reset(midi.as_ref()));
            track.close(midi.as_ref());
        }
    }
}

pub struct Sequencer {
    midi: Arc<dyn MidiOut>,
    clock: Clock,
    inner: Arc<Mutex<Inner>>,
    closed: bool,
}

impl Sequencer {
    /// Build the engine: start the clock, then bring up the active bank
    /// pattern (or the default tracks when it is free).
    pub fn new(midi: Arc<dyn MidiOut>, bank: BankFile, config: &Config) -> Self {
        let active = bank.bank.active;
        let tempo = match bank.bank.patterns.get(active) {
            Some(pattern) if !pattern.is_free() => pattern.tempo,
            _ => config.default_tempo(),
        };
        // A nonsense stored tempo falls back to the configured default.
        let tempo = if (MIN_TEMPO..=MAX_TEMPO).contains(&tempo) {
            tempo
        } else {
            config.default_tempo()
        };
        let (ctl, update_rx) = TempoCtl::new(tempo);

        let inner = Arc::new(Mutex::new(Inner {
            midi: Arc::clone(&midi),
            clock: ctl.clone(),
            tracks: Vec::new(),
            bank,
            chain: Vec::new(),
            clock_send: config.clock_devices(),
            playing: false,
            first_tick: false,
            default_tracks: config.default_tracks(),
            clipboard: None,
        }));

        let tick_inner = Arc::clone(&inner);
        let clock = Clock::start(ctl, update_rx, move || {
            if let Ok(mut inner) = tick_inner.lock() {
                inner.tick();
            }
        });

        if let Ok(mut inner) = inner.lock() {
            inner.load(active);
        }

        Self {
            midi,
            clock,
            inner,
            closed: false,
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        match self.inner.lock() {
            Ok(mut inner) => Some(f(&mut inner)),
            Err(_) => None,
        }
    }

    fn with_track<R>(&self, track: usize, f: impl FnOnce(&mut TrackState) -> R) -> Option<R> {
        let inner = self.inner.lock().ok()?;
        inner.tracks.get(track)?.with_state(f)
    }

    // Transport.

    pub fn toggle_play(&self) {
        self.with_inner(Inner::toggle_play);
    }

    pub fn is_playing(&self) -> bool {
        self.with_inner(|inner| inner.playing).unwrap_or(false)
    }

    /// Stop every sounding note and move all playheads back to the start.
    pub fn reset(&self) {
        self.with_inner(Inner::reset);
    }

    pub fn tempo(&self) -> f64 {
        self.clock.tempo()
    }

    pub fn set_tempo(&self, tempo: f64) {
        self.clock.set_tempo(tempo);
    }

    // Tracks and steps.

    pub fn add_track(&self) {
        self.with_inner(Inner::add_track);
    }

    pub fn remove_track(&self) {
        self.with_inner(Inner::remove_track);
    }

    pub fn toggle_track(&self, track: usize) {
        self.with_track(track, TrackState::toggle_active);
    }

    pub fn add_step(&self, track: usize) {
        self.with_track(track, TrackState::add_step);
    }

    pub fn remove_step(&self, track: usize) {
        let midi = Arc::clone(&self.midi);
        self.with_track(track, |state| state.remove_step(midi.as_ref()));
    }

    pub fn toggle_step(&self, track: usize, step: usize) {
        let midi = Arc::clone(&self.midi);
        self.with_track(track, |state| state.toggle_step(step, midi.as_ref()));
    }

    /// Deep-copy a step into the clipboard.
    pub fn copy_step(&self, track: usize, step: usize) {
        let copied = self.with_track(track, |state| state.steps().get(step).cloned());
        if let Some(Some(step)) = copied {
            self.with_inner(|inner| inner.clipboard = Some(step));
        }
    }

    /// Paste the clipboard over a step, overrides and all.
    pub fn paste_step(&self, track: usize, step: usize) {
        let clipboard = self.with_inner(|inner| inner.clipboard.clone()).flatten();
        if let Some(pasted) = clipboard {
            let midi = Arc::clone(&self.midi);
            self.with_track(track, |state| {
                state.replace_step(step, pasted, midi.as_ref())
            });
        }
    }

    // Patterns.

    pub fn chain(&self, pattern: usize) {
        self.with_inner(|inner| inner.chain(pattern));
    }

    pub fn chain_now(&self, pattern: usize) {
        self.with_inner(|inner| inner.chain_now(pattern));
    }

    pub fn pending_chain(&self) -> Vec<usize> {
        self.with_inner(|inner| inner.chain.clone()).unwrap_or_default()
    }

    pub fn load(&self, pattern: usize) {
        self.with_inner(|inner| inner.load(pattern));
    }

    pub fn save(&self) {
        self.with_inner(Inner::save);
    }

    pub fn active_pattern(&self) -> usize {
        self.with_inner(|inner| inner.bank.bank.active).unwrap_or(0)
    }

    pub fn pattern_is_free(&self, pattern: usize) -> bool {
        self.with_inner(|inner| {
            inner
                .bank
                .bank
                .patterns
                .get(pattern)
                .map(Pattern::is_free)
                .unwrap_or(true)
        })
        .unwrap_or(true)
    }

    // Read-only view for a frontend.

    pub fn devices(&self) -> Vec<String> {
        self.midi.devices()
    }

    pub fn track_count(&self) -> usize {
        self.with_inner(|inner| inner.tracks.len()).unwrap_or(0)
    }

    pub fn step_count(&self, track: usize) -> usize {
        self.with_track(track, |state| state.steps().len()).unwrap_or(0)
    }

    pub fn current_step(&self, track: usize) -> usize {
        self.with_track(track, |state| state.current_step())
            .unwrap_or(0)
    }

    pub fn track_is_active(&self, track: usize) -> bool {
        self.with_track(track, |state| state.is_active()).unwrap_or(false)
    }

    // Parameter edits, all bounds-checked no-ops when out of range.

    pub fn set_track_chord(&self, track: usize, chord: Vec<u8>) {
        let midi = Arc::clone(&self.midi);
        self.with_track(track, |state| state.set_chord(chord, midi.as_ref()));
    }

    pub fn set_track_length(&self, track: usize, length: u32) {
        self.with_track(track, |state| state.set_length(length));
    }

    pub fn set_track_velocity(&self, track: usize, velocity: u8) {
        self.with_track(track, |state| state.set_velocity(velocity));
    }

    pub fn set_track_probability(&self, track: usize, probability: u8) {
        self.with_track(track, |state| state.set_probability(probability));
    }

    pub fn set_track_channel(&self, track: usize, channel: u8) {
        self.with_track(track, |state| state.set_channel(channel));
    }

    pub fn set_track_device(&self, track: usize, device: usize) {
        let device_count = self.midi.devices().len();
        self.with_track(track, |state| state.set_device(device, device_count));
    }

    pub fn set_step_chord(&self, track: usize, step: usize, chord: Vec<u8>) {
        let midi = Arc::clone(&self.midi);
        self.with_track(track, |state| {
            state.set_step_chord(step, chord, midi.as_ref())
        });
    }

    pub fn set_step_length(&self, track: usize, step: usize, length: u32) {
        self.with_track(track, |state| {
            if let Some(step) = state.steps.get_mut(step) {
                step.set_length(length);
            }
        });
    }

    pub fn set_step_velocity(&self, track: usize, step: usize, velocity: u8) {
        self.with_track(track, |state| {
            if let Some(step) = state.steps.get_mut(step) {
                step.set_velocity(velocity);
            }
        });
    }

    pub fn set_step_probability(&self, track: usize, step: usize, probability: u8) {
        self.with_track(track, |state| {
            if let Some(step) = state.steps.get_mut(step) {
                step.set_probability(probability);
            }
        });
    }

    pub fn set_step_offset(&self, track: usize, step: usize, offset: u32) {
        self.with_track(track, |state| {
            if let Some(step) = state.steps.get_mut(step) {
                step.set_offset(offset);
            }
        });
    }

    pub fn set_control(&self, track: usize, control: usize, value: i16) {
        self.with_track(track, |state| state.set_control(control, value));
    }

    pub fn clear_control(&self, track: usize, control: usize) {
        self.with_track(track, |state| state.clear_control(control));
    }

    pub fn set_step_control(&self, track: usize, step: usize, control: usize, value: i16) {
        self.with_track(track, |state| state.set_step_control(step, control, value));
    }

    /// Two-phase shutdown: stop and drain the tracks first so their
    /// release messages still reach the device queues, then stop the
    /// clock and drain the devices.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.with_inner(Inner::close);
        self.clock.close();
        self.midi.close();
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.close();
    }
}
