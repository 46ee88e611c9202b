use serde::Deserialize;
use std::path::Path;

use crate::errors::{CallError, CallResult};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override the corresponding environment variables.
///
/// # Example YAML structure
/// ```yaml
/// realtime:
///   url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   voice: "coral"
///   greeting_delay_ms: 500
///   transcript_hold_ms: 3000
///   transcription_model: "whisper-1"
///   vad:
///     threshold: 0.5
///     prefix_padding_ms: 300
///     silence_duration_ms: 500
///
/// reconnect:
///   enabled: true
///   max_attempts: 1
///   initial_delay_ms: 3000
///   max_delay_ms: 30000
///   backoff_multiplier: 1.0
///   jitter: false
///
/// capture:
///   chunk_ms: 250
///   sample_rate: 24000
///
/// credentials:
///   api_key_env: "OPENAI_API_KEY"
///   url: "https://tutor.example.com/api/realtime-key"
///
/// persona:
///   student_name: "Eduardo"
///   style: "coach"
///   language: "mixed"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub realtime: Option<RealtimeYaml>,
    pub reconnect: Option<ReconnectYaml>,
    pub capture: Option<CaptureYaml>,
    pub credentials: Option<CredentialsYaml>,
    pub persona: Option<PersonaYaml>,
}

/// Realtime endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub greeting_delay_ms: Option<u64>,
    pub transcript_hold_ms: Option<u64>,
    /// Empty string disables input transcription
    pub transcription_model: Option<String>,
    pub vad: Option<VadYaml>,
}

/// Server VAD thresholds from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VadYaml {
    pub threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
}

/// Reconnection policy from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ReconnectYaml {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f32>,
    pub jitter: Option<bool>,
}

/// Capture configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CaptureYaml {
    pub chunk_ms: Option<u64>,
    pub sample_rate: Option<u32>,
}

/// Credential source from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialsYaml {
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    /// Backend route returning `{"apiKey": "..."}`
    pub url: Option<String>,
}

/// Tutor persona from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PersonaYaml {
    pub student_name: Option<String>,
    pub style: Option<String>,
    pub language: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read and `InvalidConfiguration` if
    /// the YAML is malformed or a field has the wrong type.
    pub fn from_file(path: &Path) -> CallResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CallError::Io(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> CallResult<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| CallError::InvalidConfiguration(format!("Failed to parse YAML config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
realtime:
  url: "ws://127.0.0.1:9000/v1/realtime"
  model: "gpt-4o-mini-realtime-preview"
  voice: "sage"
  greeting_delay_ms: 250
  transcript_hold_ms: 1000
  transcription_model: "whisper-1"
  vad:
    threshold: 0.7
    silence_duration_ms: 800

reconnect:
  max_attempts: 5
  initial_delay_ms: 1000
  backoff_multiplier: 2.0
  jitter: true

capture:
  chunk_ms: 100

credentials:
  api_key_env: "TUTOR_KEY"
  url: "http://localhost:3000/api/key"

persona:
  student_name: "Lucia"
  style: "strict"
  language: "spanish"
"#;
        let config = YamlConfig::parse(yaml).unwrap();

        let realtime = config.realtime.unwrap();
        assert_eq!(realtime.url.as_deref(), Some("ws://127.0.0.1:9000/v1/realtime"));
        assert_eq!(realtime.voice.as_deref(), Some("sage"));
        assert_eq!(realtime.greeting_delay_ms, Some(250));
        let vad = realtime.vad.unwrap();
        assert_eq!(vad.threshold, Some(0.7));
        assert_eq!(vad.prefix_padding_ms, None);
        assert_eq!(vad.silence_duration_ms, Some(800));

        let reconnect = config.reconnect.unwrap();
        assert_eq!(reconnect.max_attempts, Some(5));
        assert_eq!(reconnect.enabled, None);
        assert_eq!(reconnect.jitter, Some(true));

        assert_eq!(config.capture.unwrap().chunk_ms, Some(100));
        let credentials = config.credentials.unwrap();
        assert_eq!(credentials.api_key_env.as_deref(), Some("TUTOR_KEY"));
        let persona = config.persona.unwrap();
        assert_eq!(persona.student_name.as_deref(), Some("Lucia"));
        assert_eq!(persona.language.as_deref(), Some("spanish"));
    }

    #[test]
    fn test_yaml_config_partial() {
        let config = YamlConfig::parse("persona:\n  style: coach\n").unwrap();
        assert!(config.realtime.is_none());
        assert!(config.reconnect.is_none());
        assert_eq!(config.persona.unwrap().style.as_deref(), Some("coach"));
    }

    #[test]
    fn test_yaml_config_invalid_type() {
        let result = YamlConfig::parse("capture:\n  chunk_ms: \"fast\"\n");
        assert!(matches!(result, Err(CallError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_yaml_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tutorline.yaml");
        fs::write(&path, "realtime:\n  model: test-model\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(
            config.realtime.unwrap().model.as_deref(),
            Some("test-model")
        );
    }

    #[test]
    fn test_yaml_from_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = YamlConfig::from_file(&dir.path().join("missing.yaml"));
        assert!(matches!(result, Err(CallError::Io(_))));
    }
}
