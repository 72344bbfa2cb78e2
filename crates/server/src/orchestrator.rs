//! Session Orchestrator
//!
//! Composes the turn state machine, bounded utterance buffer, rate limiter,
//! speech debouncer, and upstream connection manager for one session. This
//! is the only surface the transport layer talks to.
//!
//! Every method runs on the session's event loop, so no field needs a lock.
//! The orchestrator never blocks that loop: outbound sends to the client are
//! `try_send`, upstream writes go through the manager's outbound channel,
//! and timers run in spawned tasks that post back generation-tagged events.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use voice_bridge_config::Settings;
use voice_bridge_core::{pcm16_duration_ms, AppendOutcome, TurnMachine, TurnState, UtteranceBuffer};
use voice_bridge_upstream::manager::{ReconnectDisposition, UpstreamEvent, UpstreamManager};
use voice_bridge_upstream::protocol::SessionParams;

use crate::debounce::{ConfirmOutcome, SpeechDebouncer, StartOutcome, StopOutcome};
use crate::rate_limit::RateLimiter;
use crate::session::Session;
use crate::websocket::{
    ClientMessage, OutboundFrame, CLOSE_INTERNAL_ERROR, CLOSE_MESSAGE_TOO_BIG,
    CLOSE_POLICY_VIOLATION,
};

/// Timer expirations posted back to the session's event loop
#[derive(Debug, Clone, Copy)]
pub enum TimerEvent {
    /// Speech-start confirmation window elapsed
    SpeechConfirm { generation: u64 },
    /// Reconnect backoff delay elapsed
    Reconnect { generation: u64 },
}

/// What the transport should do after an input is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Continue,
    Close { code: u16, reason: &'static str },
}

pub struct SessionOrchestrator {
    session: Arc<Session>,
    max_packet_bytes: usize,
    min_commit_bytes: usize,
    sample_rate_hz: u32,
    turn: TurnMachine,
    buffer: UtteranceBuffer,
    limiter: RateLimiter,
    debouncer: SpeechDebouncer,
    upstream: UpstreamManager,
    upstream_started: bool,
    outbound: mpsc::Sender<OutboundFrame>,
    timers: mpsc::Sender<TimerEvent>,
    reported_terminal: bool,
}

impl SessionOrchestrator {
    pub fn new(
        session: Arc<Session>,
        settings: &Settings,
        outbound: mpsc::Sender<OutboundFrame>,
        upstream_events: mpsc::Sender<UpstreamEvent>,
        timers: mpsc::Sender<TimerEvent>,
    ) -> Self {
        let session_params = SessionParams::new(settings.upstream.voice.clone(), &settings.vad);
        let upstream =
            UpstreamManager::new(settings.upstream.clone(), session_params, upstream_events);

        Self {
            session,
            max_packet_bytes: settings.server.max_packet_bytes,
            min_commit_bytes: settings.audio.min_commit_bytes,
            sample_rate_hz: settings.audio.sample_rate_hz,
            turn: TurnMachine::new(),
            buffer: UtteranceBuffer::new(settings.audio.max_buffer_bytes),
            limiter: RateLimiter::new(&settings.server.rate_limit),
            debouncer: SpeechDebouncer::new(&settings.vad),
            upstream,
            upstream_started: false,
            outbound,
            timers,
            reported_terminal: false,
        }
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn.state()
    }

    /// Bytes accumulated for the in-flight utterance
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// One binary audio chunk from the client.
    pub async fn handle_inbound_audio(&mut self, data: &[u8]) -> Directive {
        if self.session.is_closing() {
            return Directive::Continue;
        }

        if data.len() > self.max_packet_bytes {
            tracing::warn!(
                session_id = %self.session.id,
                size = data.len(),
                limit = self.max_packet_bytes,
                "oversized audio packet"
            );
            return Directive::Close {
                code: CLOSE_MESSAGE_TOO_BIG,
                reason: "audio packet too large",
            };
        }

        if let Err(e) = self.limiter.check_message() {
            tracing::warn!(session_id = %self.session.id, error = %e, "closing session");
            return Directive::Close {
                code: CLOSE_POLICY_VIOLATION,
                reason: "rate limit exceeded",
            };
        }

        self.session.touch();

        if !self.upstream_started {
            self.upstream_started = true;
            let directive = self.connect_upstream().await;
            if directive != Directive::Continue {
                return directive;
            }
        }

        match self.turn.state() {
            // Strict turn discipline: while the assistant holds the floor,
            // user audio is expected and dropped without ceremony.
            TurnState::Thinking | TurnState::Speaking => return Directive::Continue,
            TurnState::Idle => {
                self.set_turn(TurnState::Listening);
            }
            TurnState::Listening => {}
        }

        if self.buffer.append(data) == AppendOutcome::Overflowed {
            self.abandon_turn();
            return Directive::Continue;
        }

        if self.upstream.is_connected() {
            if let Err(e) = self.upstream.append_audio(data) {
                tracing::debug!(session_id = %self.session.id, error = %e, "audio append failed");
            }
        }

        Directive::Continue
    }

    /// One event from the upstream connection.
    pub async fn handle_upstream_event(&mut self, event: UpstreamEvent) -> Directive {
        match event {
            UpstreamEvent::Connected => {
                tracing::debug!(session_id = %self.session.id, "upstream ready");
                Directive::Continue
            }

            UpstreamEvent::SpeechStarted => {
                if let StartOutcome::Armed { generation } =
                    self.debouncer.on_speech_started(Instant::now(), self.turn.state())
                {
                    let confirmation = self.debouncer.confirmation();
                    let timers = self.timers.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(confirmation).await;
                        let _ = timers.send(TimerEvent::SpeechConfirm { generation }).await;
                    });
                }
                Directive::Continue
            }

            UpstreamEvent::SpeechStopped => {
                match self.debouncer.on_speech_stopped(Instant::now(), self.turn.state()) {
                    StopOutcome::CommitTurn => self.trigger_response(),
                    StopOutcome::RejectBurst => {
                        tracing::debug!(
                            session_id = %self.session.id,
                            discarded = self.buffer.len(),
                            "rejected unconfirmed speech burst"
                        );
                        self.buffer.clear();
                        if self.upstream.is_connected() {
                            let _ = self.upstream.clear_input();
                        }
                    }
                    StopOutcome::Ignored => {}
                }
                Directive::Continue
            }

            UpstreamEvent::AudioDelta { audio } => {
                // The first delta is the turn-over point.
                if self.turn.state() == TurnState::Thinking {
                    self.set_turn(TurnState::Speaking);
                }
                if self.turn.state() == TurnState::Speaking {
                    self.send_to_client(ClientMessage::Audio { data: audio });
                }
                Directive::Continue
            }

            UpstreamEvent::ResponseCompleted => {
                match self.turn.state() {
                    TurnState::Speaking | TurnState::Thinking => {
                        self.send_to_client(ClientMessage::AudioDone);
                        self.set_turn(TurnState::Idle);
                        self.buffer.clear();
                        self.debouncer.clear();
                        if self.upstream.is_connected() {
                            let _ = self.upstream.clear_input();
                        }
                    }
                    // Duplicate completion signal.
                    _ => {}
                }
                Directive::Continue
            }

            UpstreamEvent::ServerError { code, message } => {
                tracing::error!(
                    session_id = %self.session.id,
                    ?code,
                    %message,
                    "upstream error, abandoning turn"
                );
                self.abandon_turn();
                Directive::Continue
            }

            UpstreamEvent::Disconnected { generation, reason } => {
                let disposition = self.upstream.handle_disconnect(generation);
                if disposition == ReconnectDisposition::Stale {
                    return Directive::Continue;
                }
                tracing::warn!(session_id = %self.session.id, %reason, "upstream connection lost");
                // The user must never be stranded mid-turn.
                self.abandon_turn();
                self.apply_disposition(disposition)
            }
        }
    }

    /// A timer armed earlier has fired.
    pub async fn handle_timer(&mut self, event: TimerEvent) -> Directive {
        if self.session.is_closing() {
            return Directive::Continue;
        }

        match event {
            TimerEvent::SpeechConfirm { generation } => {
                if self.debouncer.on_confirmation_fired(generation, self.turn.state())
                    == ConfirmOutcome::Confirm
                {
                    self.set_turn(TurnState::Listening);
                }
                Directive::Continue
            }

            TimerEvent::Reconnect { generation } => {
                if self.upstream.is_connected() || generation != self.upstream.generation() {
                    return Directive::Continue;
                }
                self.connect_upstream().await
            }
        }
    }

    /// Stop emitting to the transport layer.
    pub fn mark_closing(&self) {
        self.session.mark_closing();
    }

    /// Tear down the upstream connection and all per-session state.
    pub fn cleanup(&mut self) {
        self.session.mark_closing();
        self.upstream.disconnect();
        self.buffer.clear();
        self.debouncer.clear();
        self.turn.reset();
        self.session.set_turn_state(TurnState::Idle);
        tracing::debug!(session_id = %self.session.id, "session cleaned up");
    }

    /// Response-trigger path, entered from a debounced speech stop.
    fn trigger_response(&mut self) {
        let buffered = self.buffer.len();
        if buffered < self.min_commit_bytes {
            tracing::debug!(
                session_id = %self.session.id,
                buffered,
                minimum = self.min_commit_bytes,
                "utterance below minimum, ignoring stop"
            );
            return;
        }

        tracing::debug!(
            session_id = %self.session.id,
            buffered,
            duration_ms = pcm16_duration_ms(buffered, self.sample_rate_hz),
            "committing utterance"
        );

        // The state must reflect "awaiting response" even if the upstream
        // call fails asynchronously afterwards.
        self.set_turn(TurnState::Thinking);

        if let Err(e) = self.upstream.commit_and_request_response() {
            tracing::warn!(session_id = %self.session.id, error = %e, "response request failed");
        }
    }

    async fn connect_upstream(&mut self) -> Directive {
        match self.upstream.connect().await {
            Ok(()) => Directive::Continue,
            Err(e) => {
                tracing::warn!(session_id = %self.session.id, error = %e, "upstream connect failed");
                let disposition = self.upstream.next_retry();
                self.apply_disposition(disposition)
            }
        }
    }

    fn apply_disposition(&mut self, disposition: ReconnectDisposition) -> Directive {
        match disposition {
            ReconnectDisposition::Stale => Directive::Continue,
            ReconnectDisposition::RetryAfter(delay) => {
                let generation = self.upstream.generation();
                let timers = self.timers.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = timers.send(TimerEvent::Reconnect { generation }).await;
                });
                Directive::Continue
            }
            ReconnectDisposition::GiveUp { attempts } => {
                if !self.reported_terminal {
                    self.reported_terminal = true;
                    tracing::error!(
                        session_id = %self.session.id,
                        attempts,
                        "upstream reconnection attempts exhausted"
                    );
                }
                Directive::Close {
                    code: CLOSE_INTERNAL_ERROR,
                    reason: "upstream unavailable",
                }
            }
        }
    }

    /// Abandon the in-flight turn: reset to idle and drop buffered audio on
    /// both sides.
    fn abandon_turn(&mut self) {
        self.turn.reset();
        self.session.set_turn_state(TurnState::Idle);
        self.buffer.clear();
        self.debouncer.clear();
        if self.upstream.is_connected() {
            let _ = self.upstream.clear_input();
        }
    }

    fn set_turn(&mut self, target: TurnState) {
        if self.turn.try_transition(target) {
            self.session.set_turn_state(self.turn.state());
        }
    }

    /// Best-effort, non-blocking send toward the client.
    fn send_to_client(&self, message: ClientMessage) {
        if self.session.is_closing() {
            return;
        }
        match self.outbound.try_send(OutboundFrame::Event(message)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    session_id = %self.session.id,
                    "client outbound channel full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(session_id = %self.session.id, "client outbound channel closed");
            }
        }
    }
}
