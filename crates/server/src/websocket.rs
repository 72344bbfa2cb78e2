//! WebSocket Handler
//!
//! Transport boundary of the bridge. One connection is one session: the
//! upgrade registers a session, binary frames carry audio chunks, and two
//! JSON event kinds flow back to the client. A single select loop per
//! session multiplexes inbound frames, upstream events, and timer
//! expirations, so all session state mutation happens on one logical thread.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use voice_bridge_config::Settings;
use voice_bridge_upstream::manager::UpstreamEvent;

use crate::orchestrator::{Directive, SessionOrchestrator, TimerEvent};
use crate::session::Session;
use crate::state::AppState;

/// Policy violation (rate limit exceeded)
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Inbound frame larger than the configured maximum
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;
/// Unrecoverable server-side condition (upstream gone)
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Buffered outbound events per session before best-effort sends drop
const OUTBOUND_CAPACITY: usize = 64;
/// Buffered upstream events per session
const UPSTREAM_EVENT_CAPACITY: usize = 256;

/// Events sent to the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A chunk of assistant audio, base64 PCM16
    Audio { data: String },
    /// The assistant's response audio is complete
    AudioDone,
}

/// Frames handed to the sender task
#[derive(Debug)]
pub enum OutboundFrame {
    Event(ClientMessage),
    Close { code: u16, reason: &'static str },
}

/// WebSocket handler
pub struct WebSocketHandler;

impl WebSocketHandler {
    /// Handle WebSocket upgrade; a session is created per connection.
    pub async fn handle(
        ws: WebSocketUpgrade,
        State(state): State<AppState>,
    ) -> Result<Response, axum::http::StatusCode> {
        let session = state
            .sessions
            .create()
            .map_err(|_| axum::http::StatusCode::SERVICE_UNAVAILABLE)?;

        let config = state.config.clone();
        Ok(ws.on_upgrade(move |socket| Self::handle_socket(socket, session, config, state)))
    }

    /// Run one session until the client or the bridge closes it.
    async fn handle_socket(
        socket: WebSocket,
        session: Arc<Session>,
        config: Arc<Settings>,
        state: AppState,
    ) {
        let (sender, mut receiver) = socket.split();

        let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_CAPACITY);
        let (upstream_tx, mut upstream_rx) = mpsc::channel::<UpstreamEvent>(UPSTREAM_EVENT_CAPACITY);
        let (timer_tx, mut timer_rx) = mpsc::channel::<TimerEvent>(OUTBOUND_CAPACITY);

        let send_task = tokio::spawn(sender_loop(sender, outbound_rx));

        let mut orchestrator = SessionOrchestrator::new(
            session.clone(),
            &config,
            outbound_tx.clone(),
            upstream_tx,
            timer_tx,
        );

        tracing::info!(session_id = %session.id, "WebSocket session started");

        loop {
            let directive = tokio::select! {
                inbound = receiver.next() => match inbound {
                    Some(Ok(Message::Binary(data))) => {
                        orchestrator.handle_inbound_audio(&data).await
                    }
                    Some(Ok(Message::Ping(_)) | Ok(Message::Pong(_))) => {
                        session.touch();
                        Directive::Continue
                    }
                    // No text chat path; text frames are ignored.
                    Some(Ok(Message::Text(_))) => Directive::Continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session.id, error = %e, "websocket error");
                        break;
                    }
                },
                Some(event) = upstream_rx.recv() => {
                    orchestrator.handle_upstream_event(event).await
                }
                Some(event) = timer_rx.recv() => {
                    orchestrator.handle_timer(event).await
                }
            };

            if let Directive::Close { code, reason } = directive {
                let _ = outbound_tx.send(OutboundFrame::Close { code, reason }).await;
                break;
            }
        }

        orchestrator.mark_closing();
        orchestrator.cleanup();
        state.sessions.remove(&session.id);

        // Let the sender drain (including a pending close frame), then stop.
        drop(orchestrator);
        drop(outbound_tx);
        let _ = send_task.await;

        tracing::info!(session_id = %session.id, "WebSocket session closed");
    }
}

/// Drains outbound frames onto the socket; ends when the channel closes or
/// a close frame is sent.
async fn sender_loop(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        match frame {
            OutboundFrame::Event(message) => {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize client event");
                        continue;
                    }
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            OutboundFrame::Close { code, reason } => {
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_shapes() {
        let audio = ClientMessage::Audio {
            data: "UE9N".to_string(),
        };
        let json = serde_json::to_value(&audio).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["data"], "UE9N");

        let done = serde_json::to_value(ClientMessage::AudioDone).unwrap();
        assert_eq!(done, serde_json::json!({"type": "audio_done"}));
    }

    #[test]
    fn test_client_message_round_trip() {
        let json = r#"{"type":"audio","data":"AAAA"}"#;
        let message: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            message,
            ClientMessage::Audio {
                data: "AAAA".to_string()
            }
        );
    }
}
