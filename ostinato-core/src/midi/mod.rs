//! MIDI output: wire messages, the abstract output capability, and the
//! midir-backed per-device dispatch workers.

pub mod message;
#[cfg(test)]
pub(crate) mod mock;
pub mod output;

pub use message::Message;
pub use output::{MidiOut, MidirOut};
