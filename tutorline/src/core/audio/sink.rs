//! Audio sink interface.
//!
//! A sink is a scoped playback resource: a container is loaded into a
//! playable, played until the sink reports completion, then unloaded.
//! Platform audio output lives outside this crate, so two sinks are shipped:
//! - [`ChannelSink`] hands containers to a host player over a channel
//! - [`ClockedSink`] is headless and completes after the audio duration

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::wav;
use crate::errors::{CallError, CallResult};

/// A loaded chunk, ready to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playable {
    /// Sink-local identifier
    pub id: u64,
    /// Audio duration declared by the container
    pub duration: Duration,
}

/// Completion notification for one playback.
pub type PlaybackCompletion = oneshot::Receiver<()>;

/// Playback resource interface.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Load a container into a playable resource.
    async fn load(&self, container: Bytes) -> CallResult<Playable>;

    /// Start playing; the returned receiver fires when playback ends.
    async fn play(&self, playable: &Playable) -> CallResult<PlaybackCompletion>;

    /// Release a playable. Must tolerate already-unloaded resources.
    async fn unload(&self, playable: &Playable) -> CallResult<()>;

    /// Release any sink-wide resource held for the call.
    async fn release(&self) -> CallResult<()> {
        Ok(())
    }
}

// =============================================================================
// Channel sink (host bridge)
// =============================================================================

/// Request sent to the host audio player.
#[derive(Debug)]
pub struct PlayRequest {
    /// Playable id
    pub id: u64,
    /// WAV container bytes
    pub container: Bytes,
    /// Fire once the platform reports end of playback
    pub done: oneshot::Sender<()>,
}

/// Sink that delegates playback to a host audio player.
///
/// The host receives [`PlayRequest`]s and signals completion through
/// `done`. Dropping `done` without sending counts as a failed playback.
pub struct ChannelSink {
    player: mpsc::Sender<PlayRequest>,
    loaded: Mutex<HashMap<u64, Bytes>>,
    next_id: AtomicU64,
}

impl ChannelSink {
    pub fn new(player: mpsc::Sender<PlayRequest>) -> Self {
        Self {
            player,
            loaded: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of playables currently loaded.
    pub fn loaded_count(&self) -> usize {
        self.loaded.lock().len()
    }
}

#[async_trait]
impl AudioSink for ChannelSink {
    async fn load(&self, container: Bytes) -> CallResult<Playable> {
        let duration = wav::container_duration(&container)
            .ok_or_else(|| CallError::PlaybackFailure("container is not PCM WAV".to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.loaded.lock().insert(id, container);
        Ok(Playable { id, duration })
    }

    async fn play(&self, playable: &Playable) -> CallResult<PlaybackCompletion> {
        let container = self.loaded.lock().get(&playable.id).cloned().ok_or_else(|| {
            CallError::PlaybackFailure(format!("playable {} is not loaded", playable.id))
        })?;

        let (done, completion) = oneshot::channel();
        self.player
            .send(PlayRequest {
                id: playable.id,
                container,
                done,
            })
            .await
            .map_err(|_| CallError::PlaybackFailure("host player is gone".to_string()))?;
        Ok(completion)
    }

    async fn unload(&self, playable: &Playable) -> CallResult<()> {
        if self.loaded.lock().remove(&playable.id).is_none() {
            tracing::debug!("Playable {} already unloaded", playable.id);
        }
        Ok(())
    }

    async fn release(&self) -> CallResult<()> {
        self.loaded.lock().clear();
        Ok(())
    }
}

// =============================================================================
// Clocked sink (headless)
// =============================================================================

/// Headless sink that "plays" each chunk for its real duration.
///
/// Keeps conversational pacing when no audio device is attached. The
/// `speed` factor divides every duration (2.0 plays twice as fast).
pub struct ClockedSink {
    speed: f64,
    loaded: Arc<Mutex<HashMap<u64, Duration>>>,
    next_id: AtomicU64,
    played: AtomicU64,
}

impl ClockedSink {
    pub fn new() -> Self {
        Self::with_speed(1.0)
    }

    pub fn with_speed(speed: f64) -> Self {
        Self {
            speed: if speed > 0.0 { speed } else { 1.0 },
            loaded: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            played: AtomicU64::new(0),
        }
    }

    /// Total chunks played to completion.
    pub fn played(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }
}

impl Default for ClockedSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioSink for ClockedSink {
    async fn load(&self, container: Bytes) -> CallResult<Playable> {
        let duration = wav::container_duration(&container)
            .ok_or_else(|| CallError::PlaybackFailure("container is not PCM WAV".to_string()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.loaded.lock().insert(id, duration);
        Ok(Playable { id, duration })
    }

    async fn play(&self, playable: &Playable) -> CallResult<PlaybackCompletion> {
        let duration = self.loaded.lock().get(&playable.id).copied().ok_or_else(|| {
            CallError::PlaybackFailure(format!("playable {} is not loaded", playable.id))
        })?;

        let wait = duration.div_f64(self.speed);
        let (done, completion) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = done.send(());
        });
        self.played.fetch_add(1, Ordering::Relaxed);
        Ok(completion)
    }

    async fn unload(&self, playable: &Playable) -> CallResult<()> {
        self.loaded.lock().remove(&playable.id);
        Ok(())
    }

    async fn release(&self) -> CallResult<()> {
        self.loaded.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_round_trip() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);

        let playable = sink.load(Bytes::from(wav::wrap(&[0u8; 480]))).await.unwrap();
        assert_eq!(playable.duration, Duration::from_millis(10));
        assert_eq!(sink.loaded_count(), 1);

        let completion = sink.play(&playable).await.unwrap();
        let request = rx.recv().await.unwrap();
        assert_eq!(request.id, playable.id);
        assert_eq!(request.container.len(), wav::HEADER_SIZE + 480);
        request.done.send(()).unwrap();
        completion.await.unwrap();

        sink.unload(&playable).await.unwrap();
        // Second unload is tolerated
        sink.unload(&playable).await.unwrap();
        assert_eq!(sink.loaded_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_sink_rejects_non_wav() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx);
        assert!(matches!(
            sink.load(Bytes::from_static(b"raw")).await,
            Err(CallError::PlaybackFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_sink_player_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = ChannelSink::new(tx);
        let playable = sink.load(Bytes::from(wav::wrap(&[0u8; 48]))).await.unwrap();
        assert!(sink.play(&playable).await.is_err());
    }

    #[tokio::test]
    async fn test_clocked_sink_waits_for_duration() {
        let sink = ClockedSink::with_speed(10.0);
        let playable = sink.load(Bytes::from(wav::wrap(&[0u8; 12000]))).await.unwrap();
        assert_eq!(playable.duration, Duration::from_millis(250));

        let start = std::time::Instant::now();
        sink.play(&playable).await.unwrap().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert_eq!(sink.played(), 1);
    }

    #[tokio::test]
    async fn test_clocked_sink_unload_unknown() {
        let sink = ClockedSink::default();
        let ghost = Playable {
            id: 42,
            duration: Duration::ZERO,
        };
        assert!(sink.unload(&ghost).await.is_ok());
        assert!(sink.play(&ghost).await.is_err());
    }
}
