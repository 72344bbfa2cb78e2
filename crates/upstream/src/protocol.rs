//! Wire protocol of the upstream realtime backend
//!
//! Events are JSON objects tagged by a `type` field. Only the handful of
//! inbound event types the bridge depends on are modeled; everything else
//! deserializes into the catch-all variant and is ignored.

use serde::{Deserialize, Serialize};

/// Error code the backend returns for a commit on an empty input buffer.
/// A harmless race between local and upstream state, never escalated.
pub const ERR_COMMIT_EMPTY: &str = "input_audio_buffer_commit_empty";

/// Error code for requesting a response while one is already active.
/// Also a harmless race, never escalated.
pub const ERR_ACTIVE_RESPONSE: &str = "conversation_already_has_active_response";

/// Whether an upstream error code is a known-benign protocol race
pub fn is_benign_error(code: Option<&str>) -> bool {
    matches!(code, Some(ERR_COMMIT_EMPTY) | Some(ERR_ACTIVE_RESPONSE))
}

/// Server-side speech detection parameters, fixed per deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

/// Session setup sent once after every successful connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionParams {
    pub modalities: Vec<String>,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetection,
}

impl SessionParams {
    pub fn new(voice: impl Into<String>, vad: &voice_bridge_config::VadConfig) -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            voice: voice.into(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
                threshold: vad.threshold,
                prefix_padding_ms: vad.prefix_padding_ms,
                silence_duration_ms: vad.silence_duration_ms,
            },
        }
    }
}

/// Messages sent to the backend
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionParams },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioClear,

    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// Detail object carried by upstream error events
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Messages received from the backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    #[serde(rename = "response.done")]
    ResponseDone,

    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    /// Any message type the bridge does not consume
    #[serde(other)]
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_serialization() {
        let event = ClientEvent::InputAudioAppend {
            audio: "AAAA".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "AAAA");

        let commit = serde_json::to_value(ClientEvent::InputAudioCommit).unwrap();
        assert_eq!(commit["type"], "input_audio_buffer.commit");
    }

    #[test]
    fn test_session_update_shape() {
        let vad = voice_bridge_config::VadConfig::default();
        let event = ClientEvent::SessionUpdate {
            session: SessionParams::new("alloy", &vad),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["input_audio_format"], "pcm16");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["turn_detection"]["prefix_padding_ms"], 300);
    }

    #[test]
    fn test_server_event_parsing() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":120}"#)
                .unwrap();
        assert!(matches!(event, ServerEvent::SpeechStarted));

        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"response.audio.delta","response_id":"r1","delta":"UE9N"}"#)
                .unwrap();
        match event {
            ServerEvent::AudioDelta { delta } => assert_eq!(delta, "UE9N"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_types_are_ignored() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"conversation.item.created","item":{}}"#).unwrap();
        assert!(matches!(event, ServerEvent::Ignored));
    }

    #[test]
    fn test_error_event_parsing_and_benign_codes() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"error","error":{"code":"input_audio_buffer_commit_empty","message":"buffer is empty"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::Error { error } => {
                assert!(is_benign_error(error.code.as_deref()));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        assert!(is_benign_error(Some(ERR_ACTIVE_RESPONSE)));
        assert!(!is_benign_error(Some("session_expired")));
        assert!(!is_benign_error(None));
    }
}
