//! Upstream connection manager
//!
//! Owns one WebSocket to the realtime backend on behalf of one session.
//! Socket I/O runs in a writer task (draining an outbound channel) and a
//! reader task (translating wire events into [`UpstreamEvent`]s for the
//! session's event loop). All manager state mutation happens on the session's
//! single logical thread; the tasks only touch the split stream halves.
//!
//! Reader tasks are tagged with a connection generation. Events from a
//! superseded connection carry a stale generation and are discarded, so a
//! torn-down socket can never mutate session state.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use voice_bridge_config::UpstreamConfig;

use crate::breaker::CircuitBreaker;
use crate::backoff::ReconnectPolicy;
use crate::protocol::{is_benign_error, ClientEvent, ServerEvent, SessionParams};
use crate::UpstreamError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Events delivered to the owning session
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Connected,
    /// The socket closed or failed; tagged with the connection generation
    Disconnected { generation: u64, reason: String },
    SpeechStarted,
    SpeechStopped,
    /// Base64 PCM16 audio from the assistant, forwarded as-is
    AudioDelta { audio: String },
    ResponseCompleted,
    /// Non-benign upstream error
    ServerError { code: Option<String>, message: String },
}

/// What to do after a disconnect or failed connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDisposition {
    /// Event belonged to a superseded connection; ignore it
    Stale,
    /// Schedule another attempt after this delay
    RetryAfter(Duration),
    /// Attempts exhausted; report once and stop
    GiveUp { attempts: u32 },
}

impl ReconnectDisposition {
    fn from_delay(delay: Option<Duration>, attempts: u32) -> Self {
        match delay {
            Some(delay) => ReconnectDisposition::RetryAfter(delay),
            None => ReconnectDisposition::GiveUp { attempts },
        }
    }
}

pub struct UpstreamManager {
    config: UpstreamConfig,
    session_params: SessionParams,
    events: mpsc::Sender<UpstreamEvent>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    breaker: CircuitBreaker,
    reconnect: ReconnectPolicy,
    generation: u64,
    connected: bool,
}

impl UpstreamManager {
    pub fn new(
        config: UpstreamConfig,
        session_params: SessionParams,
        events: mpsc::Sender<UpstreamEvent>,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker);
        let reconnect = ReconnectPolicy::new(config.reconnect);
        Self {
            config,
            session_params,
            events,
            outbound: None,
            reader: None,
            writer: None,
            breaker,
            reconnect,
            generation: 0,
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Generation of the current (or most recent) connection
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Perform a single gated connection attempt.
    ///
    /// Refused while already connected or while the circuit breaker is open.
    /// A connect that does not reach the established state within the
    /// configured timeout counts as a failure like any socket error. On
    /// success the upstream session is configured before any audio flows.
    pub async fn connect(&mut self) -> Result<(), UpstreamError> {
        if self.connected {
            return Ok(());
        }
        if !self.breaker.can_attempt() {
            return Err(UpstreamError::BreakerOpen);
        }

        self.generation += 1;
        let generation = self.generation;
        let request = self.build_request()?;
        let timeout = Duration::from_millis(self.config.connection_timeout_ms);

        let stream = match tokio::time::timeout(timeout, connect_async(request)).await {
            Err(_) => {
                self.breaker.record_failure();
                return Err(UpstreamError::ConnectTimeout);
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                return Err(UpstreamError::Handshake(e.to_string()));
            }
            Ok(Ok((stream, _response))) => stream,
        };

        self.breaker.record_success();
        self.reconnect.reset();

        // Ordering: the owner observes Connected before any event from the
        // new socket.
        let _ = self.events.try_send(UpstreamEvent::Connected);

        let (sink, source) = stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.writer = Some(tokio::spawn(write_loop(sink, out_rx)));
        self.reader = Some(tokio::spawn(read_loop(source, self.events.clone(), generation)));

        let setup = ClientEvent::SessionUpdate {
            session: self.session_params.clone(),
        };
        send_on(&out_tx, &setup)?;

        self.outbound = Some(out_tx);
        self.connected = true;
        tracing::info!(generation, "upstream connected");
        Ok(())
    }

    /// Forward a chunk of PCM16 audio to the upstream input buffer.
    pub fn append_audio(&mut self, pcm: &[u8]) -> Result<(), UpstreamError> {
        let event = ClientEvent::InputAudioAppend {
            audio: BASE64.encode(pcm),
        };
        self.send(&event)
    }

    /// Finalize buffered audio and ask the backend for a response.
    pub fn commit_and_request_response(&mut self) -> Result<(), UpstreamError> {
        self.send(&ClientEvent::InputAudioCommit)?;
        self.send(&ClientEvent::ResponseCreate)
    }

    /// Drop any audio buffered upstream, for a clean next turn.
    pub fn clear_input(&mut self) -> Result<(), UpstreamError> {
        self.send(&ClientEvent::InputAudioClear)
    }

    /// React to a disconnect notice from the reader task.
    ///
    /// Stale generations are ignored. A real disconnect counts against the
    /// circuit breaker and consumes one reconnect attempt; the caller owns
    /// the retry timer.
    pub fn handle_disconnect(&mut self, generation: u64) -> ReconnectDisposition {
        if generation != self.generation {
            return ReconnectDisposition::Stale;
        }
        self.teardown();
        self.breaker.record_failure();
        ReconnectDisposition::from_delay(self.reconnect.next_delay(), self.reconnect.attempt())
    }

    /// Consume one reconnect attempt after a failed `connect()` call.
    pub fn next_retry(&mut self) -> ReconnectDisposition {
        ReconnectDisposition::from_delay(self.reconnect.next_delay(), self.reconnect.attempt())
    }

    /// Tear the connection down. Invalidates outstanding reader events by
    /// bumping the generation.
    pub fn disconnect(&mut self) {
        self.generation += 1;
        self.teardown();
        tracing::debug!("upstream disconnected by owner");
    }

    fn teardown(&mut self) {
        self.connected = false;
        // Dropping the outbound sender ends the writer, which sends a close
        // frame on its way out.
        self.outbound = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer = None;
    }

    fn send(&mut self, event: &ClientEvent) -> Result<(), UpstreamError> {
        let Some(outbound) = &self.outbound else {
            return Err(UpstreamError::NotConnected);
        };
        if !self.connected {
            return Err(UpstreamError::NotConnected);
        }
        send_on(outbound, event)
    }

    fn build_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, UpstreamError> {
        let url = if self.config.model.is_empty() {
            self.config.url.clone()
        } else if self.config.url.contains('?') {
            format!("{}&model={}", self.config.url, self.config.model)
        } else {
            format!("{}?model={}", self.config.url, self.config.model)
        };

        let mut request = url
            .into_client_request()
            .map_err(|e| UpstreamError::Configuration(e.to_string()))?;

        if let Some(key) = &self.config.api_key {
            let value: HeaderValue = format!("Bearer {}", key)
                .parse()
                .map_err(|_| UpstreamError::Configuration("API key is not a valid header value".to_string()))?;
            request.headers_mut().insert("Authorization", value);
        }
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        Ok(request)
    }
}

impl Drop for UpstreamManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn send_on(
    outbound: &mpsc::UnboundedSender<Message>,
    event: &ClientEvent,
) -> Result<(), UpstreamError> {
    let json = serde_json::to_string(event)
        .map_err(|e| UpstreamError::Configuration(e.to_string()))?;
    outbound
        .send(Message::Text(json))
        .map_err(|_| UpstreamError::ConnectionClosed)
}

async fn write_loop(mut sink: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

async fn read_loop(
    mut source: SplitStream<WsStream>,
    events: mpsc::Sender<UpstreamEvent>,
    generation: u64,
) {
    let mut reason = "stream ended".to_string();

    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                if let Some(frame) = frame {
                    reason = format!("closed: {} {}", frame.code, frame.reason);
                }
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                reason = e.to_string();
                break;
            }
        };

        match serde_json::from_str::<ServerEvent>(&text) {
            Ok(event) => {
                if let Some(event) = translate(event) {
                    if events.send(event).await.is_err() {
                        // Session is gone; nothing left to notify.
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed upstream message dropped");
            }
        }
    }

    let _ = events
        .send(UpstreamEvent::Disconnected { generation, reason })
        .await;
}

fn translate(event: ServerEvent) -> Option<UpstreamEvent> {
    match event {
        ServerEvent::SpeechStarted => Some(UpstreamEvent::SpeechStarted),
        ServerEvent::SpeechStopped => Some(UpstreamEvent::SpeechStopped),
        ServerEvent::AudioDelta { delta } => Some(UpstreamEvent::AudioDelta { audio: delta }),
        ServerEvent::ResponseDone => Some(UpstreamEvent::ResponseCompleted),
        ServerEvent::Error { error } => {
            if is_benign_error(error.code.as_deref()) {
                tracing::debug!(code = ?error.code, "benign upstream error swallowed");
                None
            } else {
                Some(UpstreamEvent::ServerError {
                    code: error.code,
                    message: error.message,
                })
            }
        }
        ServerEvent::Ignored => None,
    }
}
