//! Core types for the voice bridge
//!
//! This crate provides the foundational, dependency-light pieces shared by
//! the rest of the workspace:
//! - The turn state machine that enforces strict turn-taking
//! - The bounded utterance buffer
//! - PCM16 audio constants and helpers

pub mod audio;
pub mod turn;

pub use audio::{pcm16_duration_ms, AppendOutcome, UtteranceBuffer, BYTES_PER_SAMPLE};
pub use turn::{TurnMachine, TurnState};
