//! Upstream realtime backend connection
//!
//! One `UpstreamManager` per session owns the WebSocket to the
//! conversational-AI backend. Connection attempts are gated by a circuit
//! breaker, reconnection uses exponential backoff with jitter, and inbound
//! protocol events are translated into [`UpstreamEvent`]s delivered to the
//! owning session over a channel.

pub mod backoff;
pub mod breaker;
pub mod manager;
pub mod protocol;

pub use backoff::ReconnectPolicy;
pub use breaker::{BreakerState, CircuitBreaker};
pub use manager::{ReconnectDisposition, UpstreamEvent, UpstreamManager};
pub use protocol::{ClientEvent, ServerEvent, SessionParams, TurnDetection};

use thiserror::Error;

/// Upstream connection errors
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Circuit breaker is open, refusing connection attempt")]
    BreakerOpen,

    #[error("Connect attempt timed out")]
    ConnectTimeout,

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid upstream configuration: {0}")]
    Configuration(String),
}
