//! Outgoing MIDI messages and their wire encoding.

/// A channel voice or system real-time message bound for an output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    NoteOn {
        channel: u8,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        note: u8,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    PitchBend {
        channel: u8,
        /// -8192 (full down) to 8192 (full up), 0 = center.
        value: i16,
    },
    Aftertouch {
        channel: u8,
        pressure: u8,
    },
    /// MIDI beat clock pulse (0xF8), 24 per quarter note.
    TimingClock,
}

impl Message {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Message::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            Message::NoteOff { channel, note } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, 0]
            }
            Message::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F],
            Message::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            Message::PitchBend { channel, value } => {
                // 14-bit value centered on 8192, split into two 7-bit bytes.
                let raw = (i32::from(value) + 8192).clamp(0, 16383) as u16;
                vec![
                    0xE0 | (channel & 0x0F),
                    (raw & 0x7F) as u8,
                    (raw >> 7) as u8,
                ]
            }
            Message::Aftertouch { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            Message::TimingClock => vec![0xF8],
        }
    }
}
