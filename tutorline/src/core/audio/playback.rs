//! Ordered single-consumer playback queue.
//!
//! Inbound audio deltas are appended to a FIFO. The first enqueue that finds
//! the queue idle claims the `playing` flag and spawns the drain loop; every
//! later enqueue only appends. The drain pops the head, wraps it into a WAV
//! container, plays it through the [`AudioSink`] and waits for the sink's
//! completion signal before moving on, so chunks never overlap and never
//! play out of order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::sink::AudioSink;
use super::wav;
use crate::errors::{CallError, CallResult};

/// Playback counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub played: u64,
    pub failed: u64,
}

struct QueueInner {
    sink: Arc<dyn AudioSink>,
    pending: Mutex<VecDeque<String>>,
    playing: AtomicBool,
    drain_task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    played: AtomicU64,
    failed: AtomicU64,
}

/// FIFO of base64 PCM chunks played one at a time.
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<QueueInner>,
}

impl PlaybackQueue {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                sink,
                pending: Mutex::new(VecDeque::new()),
                playing: AtomicBool::new(false),
                drain_task: Mutex::new(None),
                cancel: CancellationToken::new(),
                played: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    /// Append a base64 chunk and start draining if idle.
    ///
    /// Chunks enqueued after [`shutdown`](Self::shutdown) are dropped.
    pub fn enqueue(&self, chunk: impl Into<String>) {
        if self.inner.cancel.is_cancelled() {
            debug!("Playback queue shut down, dropping chunk");
            return;
        }
        self.inner.pending.lock().push_back(chunk.into());
        self.trigger();
    }

    fn trigger(&self) {
        if self
            .inner
            .playing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { drain(inner).await });
        *self.inner.drain_task.lock() = Some(handle);
    }

    /// Drop every pending chunk. The chunk currently playing finishes.
    pub fn clear(&self) {
        let dropped = {
            let mut pending = self.inner.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            debug!("Cleared {} pending playback chunks", dropped);
        }
    }

    /// Stop playback, empty the queue and release the sink.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) -> CallResult<()> {
        self.inner.cancel.cancel();
        self.clear();

        let task = self.inner.drain_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Playback drain task ended abnormally: {}", e);
            }
        }
        self.inner.playing.store(false, Ordering::Release);
        self.inner.sink.release().await
    }

    /// Number of chunks waiting behind the one playing.
    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a drain loop currently owns playback.
    pub fn is_playing(&self) -> bool {
        self.inner.playing.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PlaybackStats {
        PlaybackStats {
            played: self.inner.played.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for PlaybackQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackQueue")
            .field("pending", &self.len())
            .field("playing", &self.is_playing())
            .finish()
    }
}

async fn drain(inner: Arc<QueueInner>) {
    loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        let next = inner.pending.lock().pop_front();
        match next {
            Some(chunk) => match play_chunk(&inner, &chunk).await {
                Ok(()) => {
                    inner.played.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    inner.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Skipping audio chunk: {}", e);
                }
            },
            None => {
                inner.playing.store(false, Ordering::Release);
                // An enqueue may have landed between the pop and the store;
                // reclaim the flag unless that enqueue already spawned a drain.
                if inner.pending.lock().is_empty()
                    || inner
                        .playing
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                {
                    return;
                }
            }
        }
    }
    inner.playing.store(false, Ordering::Release);
}

async fn play_chunk(inner: &QueueInner, chunk: &str) -> CallResult<()> {
    let container = wav::wrap_base64(chunk)
        .map_err(|e| CallError::PlaybackFailure(format!("cannot decode chunk: {}", e)))?;
    let playable = inner.sink.load(Bytes::from(container)).await?;

    let outcome = match inner.sink.play(&playable).await {
        Ok(completion) => {
            tokio::select! {
                done = completion => done.map_err(|_| {
                    CallError::PlaybackFailure("sink dropped completion signal".to_string())
                }),
                _ = inner.cancel.cancelled() => Ok(()),
            }
        }
        Err(e) => Err(e),
    };

    if let Err(e) = inner.sink.unload(&playable).await {
        warn!("Failed to unload playable {}: {}", playable.id, e);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::sink::{Playable, PlaybackCompletion};
    use async_trait::async_trait;
    use base64::prelude::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Sink recording play order and overlap.
    #[derive(Default)]
    struct RecordingSink {
        order: Mutex<Vec<Vec<u8>>>,
        active: Arc<AtomicU64>,
        max_active: AtomicU64,
        next_id: AtomicU64,
        loaded: Mutex<std::collections::HashMap<u64, Vec<u8>>>,
        fail_on: Option<u8>,
        released: AtomicBool,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn load(&self, container: Bytes) -> CallResult<Playable> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let pcm = container[wav::HEADER_SIZE..].to_vec();
            self.loaded.lock().insert(id, pcm);
            Ok(Playable {
                id,
                duration: Duration::from_millis(5),
            })
        }

        async fn play(&self, playable: &Playable) -> CallResult<PlaybackCompletion> {
            let pcm = self.loaded.lock().get(&playable.id).cloned().unwrap_or_default();
            if self.fail_on.is_some() && pcm.first().copied() == self.fail_on {
                return Err(CallError::PlaybackFailure("boom".into()));
            }

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.order.lock().push(pcm);

            let (tx, rx) = oneshot::channel();
            let active = self.active.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(());
            });
            Ok(rx)
        }

        async fn unload(&self, playable: &Playable) -> CallResult<()> {
            self.loaded.lock().remove(&playable.id);
            Ok(())
        }

        async fn release(&self) -> CallResult<()> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn chunk(tag: u8) -> String {
        BASE64_STANDARD.encode([tag, 0, tag, 0])
    }

    async fn wait_idle(queue: &PlaybackQueue) {
        for _ in 0..500 {
            if !queue.is_playing() && queue.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("queue never drained");
    }

    #[tokio::test]
    async fn test_plays_in_enqueue_order_one_at_a_time() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PlaybackQueue::new(sink.clone());

        for tag in 1..=10u8 {
            queue.enqueue(chunk(tag));
        }
        wait_idle(&queue).await;

        let order: Vec<u8> = sink.order.lock().iter().map(|pcm| pcm[0]).collect();
        assert_eq!(order, (1..=10).collect::<Vec<u8>>());
        assert_eq!(sink.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().played, 10);
    }

    #[tokio::test]
    async fn test_chunks_arriving_mid_playback_queue_behind() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PlaybackQueue::new(sink.clone());

        queue.enqueue(chunk(1));
        tokio::time::sleep(Duration::from_millis(2)).await;
        queue.enqueue(chunk(2));
        queue.enqueue(chunk(3));
        wait_idle(&queue).await;

        // Re-triggers after going idle
        queue.enqueue(chunk(4));
        wait_idle(&queue).await;

        let order: Vec<u8> = sink.order.lock().iter().map(|pcm| pcm[0]).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert_eq!(sink.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_chunk_is_skipped() {
        let sink = Arc::new(RecordingSink {
            fail_on: Some(2),
            ..Default::default()
        });
        let queue = PlaybackQueue::new(sink.clone());

        queue.enqueue(chunk(1));
        queue.enqueue(chunk(2));
        queue.enqueue("%%% not base64 %%%");
        queue.enqueue(chunk(3));
        wait_idle(&queue).await;

        let order: Vec<u8> = sink.order.lock().iter().map(|pcm| pcm[0]).collect();
        assert_eq!(order, vec![1, 3]);
        assert_eq!(
            queue.stats(),
            PlaybackStats {
                played: 2,
                failed: 2
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_empties_and_releases() {
        let sink = Arc::new(RecordingSink::default());
        let queue = PlaybackQueue::new(sink.clone());

        for tag in 1..=5u8 {
            queue.enqueue(chunk(tag));
        }
        queue.shutdown().await.unwrap();

        assert!(queue.is_empty());
        assert!(!queue.is_playing());
        assert!(sink.released.load(Ordering::SeqCst));

        // Dropped after shutdown
        queue.enqueue(chunk(9));
        assert!(queue.is_empty());

        // Idempotent
        queue.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
