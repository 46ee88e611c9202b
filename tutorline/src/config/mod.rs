//! Configuration module for Tutorline
//!
//! This module loads call configuration from .env files, environment
//! variables and an optional YAML file. Priority: YAML > ENV vars > .env
//! values > defaults. The `.env` file is loaded by the binary at startup.
//!
//! # Environment variables
//! - `TUTORLINE_REALTIME_URL`, `TUTORLINE_MODEL`, `TUTORLINE_VOICE`
//! - `TUTORLINE_GREETING_DELAY_MS`, `TUTORLINE_TRANSCRIPT_HOLD_MS`
//! - `TUTORLINE_RECONNECT_MAX_ATTEMPTS`, `TUTORLINE_RECONNECT_DELAY_MS`
//! - `TUTORLINE_CHUNK_MS`
//! - `TUTORLINE_API_KEY_ENV`, `TUTORLINE_CREDENTIAL_URL`
//! - `TUTORLINE_STUDENT_NAME`, `TUTORLINE_STYLE`, `TUTORLINE_LANGUAGE`
//!
//! # Example
//! ```rust,no_run
//! use tutorline::config::TutorlineConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = TutorlineConfig::from_env()?;
//!
//! // Load from YAML file with environment variables as the base
//! let config = TutorlineConfig::from_file(Path::new("tutorline.yaml"))?;
//!
//! println!("Realtime endpoint: {}", config.realtime_url);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

mod yaml;

pub use yaml::YamlConfig;

use crate::core::audio::wav::SAMPLE_RATE;
use crate::core::credentials::{CredentialProvider, EnvCredentialProvider, HttpCredentialProvider};
use crate::core::persona::{Persona, TutorLanguage, TutorStyle};
use crate::core::realtime::config::{
    DEFAULT_GREETING_DELAY, DEFAULT_MODEL, DEFAULT_TRANSCRIPT_HOLD, DEFAULT_TRANSCRIPTION_MODEL,
    REALTIME_URL, RealtimeSettings, RealtimeVoice, VadSettings,
};
use crate::core::realtime::resilience::ReconnectPolicy;
use crate::errors::{CallError, CallResult};

/// Environment variable holding the API key unless overridden.
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Capture window length.
pub const DEFAULT_CHUNK_MS: u64 = 250;

/// Resolved configuration for one tutor call.
#[derive(Debug, Clone)]
pub struct TutorlineConfig {
    // Realtime endpoint
    pub realtime_url: String,
    pub model: String,
    pub voice: RealtimeVoice,
    pub greeting_delay: Duration,
    pub transcript_hold: Duration,
    pub transcription_model: Option<String>,
    pub vad: VadSettings,

    // Resilience
    pub reconnect: ReconnectPolicy,

    // Capture
    pub chunk_interval: Duration,
    pub sample_rate: u32,

    // Credentials
    pub api_key_env: String,
    pub credential_url: Option<String>,

    // Persona
    pub persona: Persona,
}

impl Default for TutorlineConfig {
    fn default() -> Self {
        Self {
            realtime_url: REALTIME_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice: RealtimeVoice::default(),
            greeting_delay: DEFAULT_GREETING_DELAY,
            transcript_hold: DEFAULT_TRANSCRIPT_HOLD,
            transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            vad: VadSettings::default(),
            reconnect: ReconnectPolicy::default(),
            chunk_interval: Duration::from_millis(DEFAULT_CHUNK_MS),
            sample_rate: SAMPLE_RATE,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            credential_url: None,
            persona: Persona::default(),
        }
    }
}

impl TutorlineConfig {
    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults. Performs validation on the result.
    ///
    /// # Errors
    /// Returns `InvalidConfiguration` if a variable has an invalid format or
    /// validation fails.
    pub fn from_env() -> CallResult<Self> {
        let config = Self::env_base()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file layered over the environment
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is malformed, if an
    /// environment variable has an invalid format, or if validation fails.
    pub fn from_file(path: &Path) -> CallResult<Self> {
        let yaml = YamlConfig::from_file(path)?;
        Self::from_yaml(yaml)
    }

    /// Merge parsed YAML over the environment and validate.
    pub fn from_yaml(yaml: YamlConfig) -> CallResult<Self> {
        let mut config = Self::env_base()?;
        config.apply_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn env_base() -> CallResult<Self> {
        let mut config = Self::default();

        if let Some(url) = env_string("TUTORLINE_REALTIME_URL") {
            config.realtime_url = url;
        }
        if let Some(model) = env_string("TUTORLINE_MODEL") {
            config.model = model;
        }
        if let Some(voice) = env_string("TUTORLINE_VOICE") {
            config.voice = parse_voice(&voice);
        }
        if let Some(ms) = env_parse::<u64>("TUTORLINE_GREETING_DELAY_MS")? {
            config.greeting_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("TUTORLINE_TRANSCRIPT_HOLD_MS")? {
            config.transcript_hold = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse::<u32>("TUTORLINE_RECONNECT_MAX_ATTEMPTS")? {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(ms) = env_parse::<u64>("TUTORLINE_RECONNECT_DELAY_MS")? {
            config.reconnect.initial_delay_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("TUTORLINE_CHUNK_MS")? {
            config.chunk_interval = Duration::from_millis(ms);
        }
        if let Some(var) = env_string("TUTORLINE_API_KEY_ENV") {
            config.api_key_env = var;
        }
        config.credential_url = env_string("TUTORLINE_CREDENTIAL_URL");
        if let Some(name) = env_string("TUTORLINE_STUDENT_NAME") {
            config.persona.student_name = name;
        }
        if let Some(style) = env_string("TUTORLINE_STYLE") {
            config.persona.style = parse_style(&style)?;
        }
        if let Some(language) = env_string("TUTORLINE_LANGUAGE") {
            config.persona.language = parse_language(&language)?;
        }

        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> CallResult<()> {
        if let Some(realtime) = yaml.realtime {
            if let Some(url) = realtime.url {
                self.realtime_url = url;
            }
            if let Some(model) = realtime.model {
                self.model = model;
            }
            if let Some(voice) = realtime.voice {
                self.voice = parse_voice(&voice);
            }
            if let Some(ms) = realtime.greeting_delay_ms {
                self.greeting_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = realtime.transcript_hold_ms {
                self.transcript_hold = Duration::from_millis(ms);
            }
            if let Some(model) = realtime.transcription_model {
                self.transcription_model = (!model.trim().is_empty()).then_some(model);
            }
            if let Some(vad) = realtime.vad {
                if let Some(threshold) = vad.threshold {
                    self.vad.threshold = threshold;
                }
                if let Some(ms) = vad.prefix_padding_ms {
                    self.vad.prefix_padding_ms = ms;
                }
                if let Some(ms) = vad.silence_duration_ms {
                    self.vad.silence_duration_ms = ms;
                }
            }
        }

        if let Some(reconnect) = yaml.reconnect {
            let policy = &mut self.reconnect;
            if let Some(enabled) = reconnect.enabled {
                policy.enabled = enabled;
            }
            if let Some(attempts) = reconnect.max_attempts {
                policy.max_attempts = attempts;
            }
            if let Some(ms) = reconnect.initial_delay_ms {
                policy.initial_delay_ms = ms;
            }
            if let Some(ms) = reconnect.max_delay_ms {
                policy.max_delay_ms = ms;
            }
            if let Some(multiplier) = reconnect.backoff_multiplier {
                policy.backoff_multiplier = multiplier;
            }
            if let Some(jitter) = reconnect.jitter {
                policy.jitter = jitter;
            }
        }

        if let Some(capture) = yaml.capture {
            if let Some(ms) = capture.chunk_ms {
                self.chunk_interval = Duration::from_millis(ms);
            }
            if let Some(rate) = capture.sample_rate {
                self.sample_rate = rate;
            }
        }

        if let Some(credentials) = yaml.credentials {
            if let Some(var) = credentials.api_key_env {
                self.api_key_env = var;
            }
            if let Some(url) = credentials.url {
                self.credential_url = Some(url);
            }
        }

        if let Some(persona) = yaml.persona {
            if let Some(name) = persona.student_name {
                self.persona.student_name = name;
            }
            if let Some(style) = persona.style {
                self.persona.style = parse_style(&style)?;
            }
            if let Some(language) = persona.language {
                self.persona.language = parse_language(&language)?;
            }
        }

        Ok(())
    }

    /// Check the merged values.
    pub fn validate(&self) -> CallResult<()> {
        let url = url::Url::parse(&self.realtime_url).map_err(|e| {
            CallError::InvalidConfiguration(format!(
                "realtime url '{}' is invalid: {e}",
                self.realtime_url
            ))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(CallError::InvalidConfiguration(format!(
                "realtime url must use ws:// or wss://, got '{}'",
                url.scheme()
            )));
        }
        if self.model.trim().is_empty() {
            return Err(CallError::InvalidConfiguration(
                "model must not be empty".to_string(),
            ));
        }
        if self.chunk_interval.is_zero() {
            return Err(CallError::InvalidConfiguration(
                "chunk interval must be greater than zero".to_string(),
            ));
        }
        if self.sample_rate != SAMPLE_RATE {
            return Err(CallError::InvalidConfiguration(format!(
                "sample rate must be {SAMPLE_RATE} Hz, got {}",
                self.sample_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(CallError::InvalidConfiguration(format!(
                "VAD threshold must be between 0.0 and 1.0, got {}",
                self.vad.threshold
            )));
        }
        if !self.reconnect.backoff_multiplier.is_finite() || self.reconnect.backoff_multiplier < 1.0
        {
            return Err(CallError::InvalidConfiguration(format!(
                "backoff multiplier must be at least 1.0, got {}",
                self.reconnect.backoff_multiplier
            )));
        }
        if self.api_key_env.trim().is_empty() {
            return Err(CallError::InvalidConfiguration(
                "API key variable name must not be empty".to_string(),
            ));
        }
        if let Some(credential_url) = &self.credential_url {
            url::Url::parse(credential_url).map_err(|e| {
                CallError::InvalidConfiguration(format!(
                    "credential url '{credential_url}' is invalid: {e}"
                ))
            })?;
        }
        Ok(())
    }

    /// Session settings for a realtime call.
    pub fn realtime_settings(&self) -> RealtimeSettings {
        RealtimeSettings {
            url: self.realtime_url.clone(),
            model: self.model.clone(),
            voice: self.voice,
            persona: self.persona.clone(),
            transcription_model: self.transcription_model.clone(),
            vad: self.vad,
            greeting_delay: self.greeting_delay,
            transcript_hold: self.transcript_hold,
            reconnect: self.reconnect.clone(),
            ..Default::default()
        }
    }

    /// Credential source: the backend route when configured, else the
    /// environment variable.
    pub fn credential_provider(&self) -> CallResult<Arc<dyn CredentialProvider>> {
        match &self.credential_url {
            Some(url) => Ok(Arc::new(HttpCredentialProvider::new(url.clone())?)),
            None => Ok(Arc::new(EnvCredentialProvider::new(self.api_key_env.clone()))),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> CallResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                CallError::InvalidConfiguration(format!("{name} has invalid value '{raw}': {e}"))
            })
        })
        .transpose()
}

fn parse_voice(value: &str) -> RealtimeVoice {
    let voice = RealtimeVoice::from_str_or_default(value);
    if voice.as_str() != value.trim().to_lowercase() {
        warn!("Unknown voice '{}', using {}", value, voice);
    }
    voice
}

fn parse_style(value: &str) -> CallResult<TutorStyle> {
    TutorStyle::parse(value).ok_or_else(|| {
        CallError::InvalidConfiguration(format!(
            "unknown style '{value}' (expected strict, friendly or coach)"
        ))
    })
}

fn parse_language(value: &str) -> CallResult<TutorLanguage> {
    TutorLanguage::parse(value).ok_or_else(|| {
        CallError::InvalidConfiguration(format!(
            "unknown language '{value}' (expected english, spanish or mixed)"
        ))
    })
}
