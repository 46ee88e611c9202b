//! Realtime session settings.
//!
//! This module contains the configuration of one realtime call:
//! - Endpoint and model selection
//! - Voice selection
//! - Server-side turn detection
//! - Greeting and transcript timing

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::resilience::ReconnectPolicy;
use crate::core::persona::Persona;

/// Realtime WebSocket endpoint.
pub const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Realtime model used by the tutor.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Input transcription model.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Delay between `session.update` and the greeting `response.create`.
pub const DEFAULT_GREETING_DELAY: Duration = Duration::from_millis(500);

/// How long a finished transcript stays on screen.
pub const DEFAULT_TRANSCRIPT_HOLD: Duration = Duration::from_millis(3000);

// =============================================================================
// Voices
// =============================================================================

/// Available assistant voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl RealtimeVoice {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::Alloy,
        }
    }
}

impl std::fmt::Display for RealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Audio format & modalities
// =============================================================================

/// Wire audio format. Only raw PCM16 is used in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Pcm16,
}

impl AudioFormat {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        "pcm16"
    }
}

/// Response modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

impl Modality {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }
}

// =============================================================================
// Turn detection
// =============================================================================

/// Server-side voice activity detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    /// Activation threshold (0.0 to 1.0)
    pub threshold: f32,
    /// Audio kept before detected speech (ms)
    pub prefix_padding_ms: u32,
    /// Silence that ends a turn (ms)
    pub silence_duration_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

// =============================================================================
// Session settings
// =============================================================================

/// Everything a [`RealtimeSession`](super::session::RealtimeSession) needs
/// besides the credential.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub url: String,
    pub model: String,
    pub voice: RealtimeVoice,
    pub persona: Persona,
    pub modalities: Vec<Modality>,
    pub audio_format: AudioFormat,
    /// `None` disables input transcription
    pub transcription_model: Option<String>,
    pub vad: VadSettings,
    pub greeting_delay: Duration,
    pub transcript_hold: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            url: REALTIME_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: RealtimeVoice::default(),
            persona: Persona::default(),
            modalities: vec![Modality::Text, Modality::Audio],
            audio_format: AudioFormat::default(),
            transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            vad: VadSettings::default(),
            greeting_delay: DEFAULT_GREETING_DELAY,
            transcript_hold: DEFAULT_TRANSCRIPT_HOLD,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl RealtimeSettings {
    /// Connection URL with the model query parameter.
    pub fn connect_url(&self) -> Result<url::Url, url::ParseError> {
        let mut url = url::Url::parse(&self.url)?;
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(url)
    }
}
