//! Voice Bridge Server
//!
//! Bridges client WebSocket connections to the upstream realtime backend,
//! one session per connection, under a strict turn-taking discipline.

pub mod debounce;
pub mod http;
pub mod orchestrator;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod websocket;

pub use debounce::SpeechDebouncer;
pub use http::create_router;
pub use orchestrator::{Directive, SessionOrchestrator, TimerEvent};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use session::{Session, SessionManager};
pub use state::AppState;
pub use websocket::WebSocketHandler;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::RateLimit => axum::http::StatusCode::TOO_MANY_REQUESTS,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
