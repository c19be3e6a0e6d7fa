//! In-memory recording output used by the engine tests.

use std::sync::Mutex;

use super::message::Message;
use super::output::MidiOut;

/// Records every enqueued message instead of touching a device.
pub(crate) struct RecordingMidi {
    device_count: usize,
    pub events: Mutex<Vec<(usize, Message)>>,
}

impl RecordingMidi {
    pub fn new(device_count: usize) -> Self {
        Self {
            device_count,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<(usize, Message)> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn note_ons(&self) -> Vec<(usize, u8, u8, u8)> {
        self.events()
            .into_iter()
            .filter_map(|(device, msg)| match msg {
                Message::NoteOn {
                    channel,
                    note,
                    velocity,
                } => Some((device, channel, note, velocity)),
                _ => None,
            })
            .collect()
    }

    pub fn note_offs(&self) -> Vec<(usize, u8, u8)> {
        self.events()
            .into_iter()
            .filter_map(|(device, msg)| match msg {
                Message::NoteOff { channel, note } => Some((device, channel, note)),
                _ => None,
            })
            .collect()
    }

    pub fn clock_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|(_, msg)| matches!(msg, Message::TimingClock))
            .count()
    }
}

impl MidiOut for RecordingMidi {
    fn devices(&self) -> Vec<String> {
        (0..self.device_count)
            .map(|i| format!("mock {}", i))
            .collect()
    }

    fn enqueue(&self, device: usize, message: Message) {
        if device >= self.device_count {
            return;
        }
        self.events.lock().unwrap().push((device, message));
    }

    fn close(&self) {}
}
