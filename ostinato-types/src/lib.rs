//! # ostinato-types
//!
//! Shared type definitions for the ostinato sequencer: the serializable
//! pattern-bank format exchanged with disk, and the musical constants and
//! bounds used across the engine and the frontend.

pub mod bank;
pub mod param;

pub use bank::{Bank, Pattern, StepSnapshot, TrackSnapshot};
pub use param::*;
