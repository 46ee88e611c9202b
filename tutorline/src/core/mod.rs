pub mod audio;
pub mod call;
pub mod credentials;
pub mod persona;
pub mod realtime;

// Re-export commonly used types for convenience
pub use audio::{AudioCapture, AudioChunk, AudioSink, PlaybackQueue};
pub use call::VoiceCall;
pub use credentials::{
    Credential, CredentialProvider, EnvCredentialProvider, HttpCredentialProvider,
    StaticCredentialProvider,
};
pub use persona::{Persona, TutorLanguage, TutorStyle, compose_instructions};
pub use realtime::{CallStatus, RealtimeSession, RealtimeSettings, SessionEvent, SessionState};
