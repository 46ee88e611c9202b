//! Realtime WebSocket message types.
//!
//! All events are JSON text frames tagged by a `type` field.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Configure persona, voice, formats and turn detection
//! - response.create - Ask the assistant to take a turn
//! - input_audio_buffer.append - Append captured audio
//!
//! Server events (received from server):
//! - session.created / session.updated - Lifecycle acks
//! - response.audio.delta / response.audio.done - Assistant audio
//! - response.audio_transcript.delta / .done - Assistant transcript
//! - conversation.item.input_audio_transcription.completed - User transcript
//! - input_audio_buffer.speech_started / speech_stopped - Server VAD
//! - response.done - Turn finished
//! - error - Recoverable error

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use super::config::RealtimeSettings;
use crate::errors::{CallError, CallResult};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration payload of `session.update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    pub modalities: Vec<String>,

    /// System instructions for the assistant
    pub instructions: String,

    /// Voice for audio output
    pub voice: String,

    /// Input audio format
    pub input_audio_format: String,

    /// Output audio format
    pub output_audio_format: String,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration
    pub turn_detection: TurnDetection,
}

impl SessionConfig {
    /// Build the payload from session settings.
    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        Self {
            modalities: settings
                .modalities
                .iter()
                .map(|m| m.as_str().to_string())
                .collect(),
            instructions: settings.persona.instructions(),
            voice: settings.voice.as_str().to_string(),
            input_audio_format: settings.audio_format.as_str().to_string(),
            output_audio_format: settings.audio_format.as_str().to_string(),
            input_audio_transcription: settings
                .transcription_model
                .as_ref()
                .map(|model| InputAudioTranscription {
                    model: model.clone(),
                }),
            turn_detection: TurnDetection::ServerVad {
                threshold: settings.vad.threshold,
                prefix_padding_ms: settings.vad.prefix_padding_ms,
                silence_duration_ms: settings.vad.silence_duration_ms,
            },
        }
    }
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the realtime endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Ask the assistant to respond
    #[serde(rename = "response.create")]
    ResponseCreate,

    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio data
        audio: String,
    },
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Type tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::ResponseCreate => "response.create",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
        }
    }

    pub fn to_json(&self) -> CallResult<String> {
        serde_json::to_string(self)
            .map_err(|e| CallError::ParseError(format!("cannot encode {}: {}", self.kind(), e)))
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the realtime endpoint.
///
/// Payload fields are lenient: a missing field decodes to its default so a
/// partially-populated event still routes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: SessionInfo,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: SessionInfo,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: u64,
    },

    /// Input audio transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        #[serde(default)]
        transcript: String,
    },

    /// Audio delta (base64 PCM16 chunk)
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },

    /// Audio done
    #[serde(rename = "response.audio.done")]
    AudioDone,

    /// Audio transcript delta
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    /// Audio transcript done
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseInfo,
    },

    /// Any other event type
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Parse one text frame.
    pub fn parse(text: &str) -> CallResult<Self> {
        serde_json::from_str(text).map_err(|e| CallError::ParseError(e.to_string()))
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: String,
    /// Error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: String,
}

/// Session information carried by lifecycle acks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub voice: Option<String>,
}

/// Response information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResponseInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
}

// =============================================================================
// Tests
// =============================================================================
