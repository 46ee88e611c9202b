//! Audio pipeline: capture, PCM container encoding, sinks and ordered
//! playback.

pub mod capture;
pub mod playback;
pub mod sink;
pub mod wav;

pub use capture::{
    AudioCapture, AudioChunk, CaptureHandle, CaptureSource, FrameStreamCapture,
    MicrophonePermission, RecordingCapture, StaticPermission, create_capture,
};
pub use playback::{PlaybackQueue, PlaybackStats};
pub use sink::{AudioSink, ChannelSink, ClockedSink, PlayRequest, Playable};
