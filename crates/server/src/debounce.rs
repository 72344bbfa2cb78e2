//! Speech-boundary debouncing
//!
//! Filters the upstream speech-started/speech-stopped signals against brief
//! noise bursts and start/stop thrashing before they reach the turn state
//! machine. A start while idle is only honored after it survives a
//! confirmation window; a start too soon after the last end is ignored
//! outright (cooldown).
//!
//! The debouncer itself is pure bookkeeping: the orchestrator owns the
//! actual timer and posts its expiry back with the generation it was armed
//! with. Any re-arm, commit, or clear bumps the generation, so a stale timer
//! can never confirm a start it no longer belongs to.

use std::time::{Duration, Instant};

use voice_bridge_config::VadConfig;
use voice_bridge_core::TurnState;

/// Outcome of a speech-started signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Out-of-turn, within cooldown, or otherwise not actionable
    Ignored,
    /// Provisional start recorded; arm a confirmation timer for this generation
    Armed { generation: u64 },
    /// Already listening; provisional bookkeeping cleared
    AlreadyListening,
}

/// Outcome of a speech-stopped signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Ignored,
    /// The user finished a turn; run the response-trigger path
    CommitTurn,
    /// False-positive burst while idle; discard its audio
    RejectBurst,
}

/// Outcome of a confirmation timer expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Still the most recent start and the session is still idle
    Confirm,
    Stale,
}

#[derive(Debug)]
pub struct SpeechDebouncer {
    confirmation: Duration,
    cooldown: Duration,
    provisional_start: Option<Instant>,
    last_speech_end: Option<Instant>,
    generation: u64,
}

impl SpeechDebouncer {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            confirmation: Duration::from_millis(config.confirmation_ms),
            cooldown: Duration::from_millis(config.cooldown_ms),
            provisional_start: None,
            last_speech_end: None,
            generation: 0,
        }
    }

    /// Length of the confirmation window the caller should arm
    pub fn confirmation(&self) -> Duration {
        self.confirmation
    }

    pub fn on_speech_started(&mut self, now: Instant, state: TurnState) -> StartOutcome {
        match state {
            TurnState::Thinking | TurnState::Speaking => StartOutcome::Ignored,
            TurnState::Listening => {
                self.provisional_start = None;
                StartOutcome::AlreadyListening
            }
            TurnState::Idle => {
                if let Some(end) = self.last_speech_end {
                    if now.duration_since(end) < self.cooldown {
                        tracing::debug!("speech start within cooldown, ignoring");
                        return StartOutcome::Ignored;
                    }
                }
                self.provisional_start = Some(now);
                self.generation += 1;
                StartOutcome::Armed {
                    generation: self.generation,
                }
            }
        }
    }

    pub fn on_confirmation_fired(&mut self, generation: u64, state: TurnState) -> ConfirmOutcome {
        if generation != self.generation
            || self.provisional_start.is_none()
            || state != TurnState::Idle
        {
            return ConfirmOutcome::Stale;
        }
        self.provisional_start = None;
        ConfirmOutcome::Confirm
    }

    pub fn on_speech_stopped(&mut self, now: Instant, state: TurnState) -> StopOutcome {
        match state {
            TurnState::Listening => {
                self.last_speech_end = Some(now);
                self.provisional_start = None;
                self.generation += 1;
                StopOutcome::CommitTurn
            }
            TurnState::Idle if self.provisional_start.is_some() => {
                // A start that never survived confirmation: noise.
                // The end timestamp still starts the cooldown so the next
                // burst is suppressed too.
                self.provisional_start = None;
                self.last_speech_end = Some(now);
                self.generation += 1;
                StopOutcome::RejectBurst
            }
            _ => StopOutcome::Ignored,
        }
    }

    /// Reset all debounce state, invalidating any pending timer.
    /// Called on every return to idle.
    pub fn clear(&mut self) {
        self.provisional_start = None;
        self.last_speech_end = None;
        self.generation += 1;
    }
}
