//! Addressable MIDI parameters.
//!
//! A control represents one of four message kinds. Every track allocates a
//! full bank of them (program change, pitch bend, aftertouch, then CC
//! 0..=127); steps override individual entries lazily. Controls carry no
//! timing of their own: they are driven entirely by track and step
//! trigger events, which supply the device and channel at send time.

use crate::midi::MidiOut;

pub const MIN_CC: i16 = 0;
pub const MAX_CC: i16 = 127;
pub const MIN_PITCH: i16 = -8192;
pub const MAX_PITCH: i16 = 8192;

/// Number of controls in a track's bank: PC + pitch bend + aftertouch +
/// 128 CCs.
pub const CONTROL_COUNT: usize = 131;

/// Bank index of the first control change; entry `CC_BASE + n` is CC `n`.
pub const CC_BASE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    ControlChange,
    ProgramChange,
    PitchBend,
    Aftertouch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    kind: ControlKind,
    /// Meaningful for `ControlChange` only.
    controller: u8,
    value: i16,
}

impl Control {
    pub fn new(kind: ControlKind, controller: u8) -> Self {
        Self {
            kind,
            controller,
            value: 0,
        }
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn controller(&self) -> u8 {
        self.controller
    }

    pub fn value(&self) -> i16 {
        self.value
    }

    /// Set the value. Values outside the kind's range are rejected, not
    /// clamped.
    pub fn set(&mut self, value: i16) {
        let (min, max) = match self.kind {
            ControlKind::PitchBend => (MIN_PITCH, MAX_PITCH),
            _ => (MIN_CC, MAX_CC),
        };
        if value < min || value > max {
            return;
        }
        self.value = value;
    }

    /// Emit the control's current value to the given device and channel.
    pub fn send(&self, midi: &dyn MidiOut, device: usize, channel: u8) {
        match self.kind {
            ControlKind::ControlChange => {
                midi.control_change(device, channel, self.controller, self.value as u8)
            }
            ControlKind::ProgramChange => midi.program_change(device, channel, self.value as u8),
            ControlKind::PitchBend => midi.pitch_bend(device, channel, self.value),
            ControlKind::Aftertouch => midi.aftertouch(device, channel, self.value as u8),
        }
    }

    pub fn name(&self) -> String {
        match self.kind {
            ControlKind::ProgramChange => "Program".to_string(),
            ControlKind::PitchBend => "Pitchbend".to_string(),
            ControlKind::Aftertouch => "After Touch".to_string(),
            ControlKind::ControlChange => format!("CC {}", self.controller),
        }
    }
}

/// The full per-track control bank, in persistent index order.
pub fn control_bank() -> Vec<Control> {
    let mut controls = vec![
        Control::new(ControlKind::ProgramChange, 0),
        Control::new(ControlKind::PitchBend, 0),
        Control::new(ControlKind::Aftertouch, 0),
    ];
    for controller in 0..=127 {
        controls.push(Control::new(ControlKind::ControlChange, controller));
    }
    controls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::mock::RecordingMidi;
    use crate::midi::Message;

    #[test]
    fn test_bank_layout() {
        let bank = control_bank();
        assert_eq!(bank.len(), CONTROL_COUNT);
        assert_eq!(bank[0].kind(), ControlKind::ProgramChange);
        assert_eq!(bank[1].kind(), ControlKind::PitchBend);
        assert_eq!(bank[2].kind(), ControlKind::Aftertouch);
        assert_eq!(bank[CC_BASE].kind(), ControlKind::ControlChange);
        assert_eq!(bank[CC_BASE].controller(), 0);
        assert_eq!(bank[CC_BASE + 127].controller(), 127);
    }

    #[test]
    fn test_set_rejects_out_of_range() {
        let mut cc = Control::new(ControlKind::ControlChange, 7);
        cc.set(128);
        assert_eq!(cc.value(), 0);
        cc.set(-1);
        assert_eq!(cc.value(), 0);
        cc.set(127);
        assert_eq!(cc.value(), 127);
    }

    #[test]
    fn test_pitch_bend_range() {
        let mut pb = Control::new(ControlKind::PitchBend, 0);
        pb.set(-8193);
        assert_eq!(pb.value(), 0);
        pb.set(-8192);
        assert_eq!(pb.value(), -8192);
        pb.set(8192);
        assert_eq!(pb.value(), 8192);
    }

    #[test]
    fn test_send_maps_kind_to_message() {
        let midi = RecordingMidi::new(1);
        let mut cc = Control::new(ControlKind::ControlChange, 10);
        cc.set(42);
        cc.send(&midi, 0, 3);
        let mut pb = Control::new(ControlKind::PitchBend, 0);
        pb.set(-100);
        pb.send(&midi, 0, 3);
        assert_eq!(
            midi.events(),
            vec![
                (
                    0,
                    Message::ControlChange {
                        channel: 3,
                        controller: 10,
                        value: 42
                    }
                ),
                (
                    0,
                    Message::PitchBend {
                        channel: 3,
                        value: -100
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_names() {
        assert_eq!(Control::new(ControlKind::ProgramChange, 0).name(), "Program");
        assert_eq!(Control::new(ControlKind::ControlChange, 74).name(), "CC 74");
    }
}
