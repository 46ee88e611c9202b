//! Realtime speech-to-speech session.
//!
//! This module implements the duplex call protocol against the realtime
//! endpoint: session configuration, audio streaming, inbound event routing
//! and reconnection.
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, 24kHz, in both directions.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tutorline::core::audio::{ClockedSink, PlaybackQueue};
//! use tutorline::core::credentials::EnvCredentialProvider;
//! use tutorline::core::realtime::{RealtimeSession, RealtimeSettings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let session = RealtimeSession::new(
//!         "call-1",
//!         RealtimeSettings::default(),
//!         Arc::new(EnvCredentialProvider::new("OPENAI_API_KEY")),
//!         PlaybackQueue::new(Arc::new(ClockedSink::new())),
//!     );
//!     session.connect().await.unwrap();
//!     session.send_audio(&chunk).await.unwrap();
//!     session.close().await;
//! }
//! ```

pub mod config;
pub mod messages;
pub mod resilience;
pub mod session;
pub mod transcript;

pub use config::{AudioFormat, Modality, RealtimeSettings, RealtimeVoice, VadSettings};
pub use messages::{ClientEvent, ServerEvent, SessionConfig};
pub use resilience::{CloseDisposition, CloseReason, ReconnectPolicy};
pub use session::{CallStatus, RealtimeSession, SessionEvent, SessionState, SessionStats};
pub use transcript::TranscriptBuffer;
