//! Audio capture adapter.
//!
//! Capture produces fixed-interval chunks of mono 24kHz PCM16 for the
//! realtime session. Two variants sit behind [`AudioCapture`]:
//!
//! - [`FrameStreamCapture`] re-chunks live i16 frames pushed by the host
//! - [`RecordingCapture`] normalizes a recorded WAV file and replays it at
//!   capture pace
//!
//! Both request microphone permission before touching the input resource
//! and hold that resource until [`CaptureHandle::stop`] is called.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::wav::SAMPLE_RATE;
use crate::errors::{CallError, CallResult};

/// Default capture window.
pub const DEFAULT_CHUNK_INTERVAL: Duration = Duration::from_millis(250);

/// Bound on waiting for a capture task to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// One window of captured PCM16 mono 24kHz audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Capture order, starting at 0
    pub seq: u64,
    /// Little-endian PCM16 bytes
    pub data: Bytes,
}

impl AudioChunk {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.data.len() as f64 / (f64::from(SAMPLE_RATE) * 2.0))
    }
}

// =============================================================================
// Permission
// =============================================================================

/// Microphone permission capability.
#[async_trait]
pub trait MicrophonePermission: Send + Sync {
    /// Ask for access. `false` means the user refused.
    async fn request(&self) -> bool;
}

/// Fixed permission answer, for headless runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission {
    granted: bool,
}

impl StaticPermission {
    pub fn granted() -> Self {
        Self { granted: true }
    }

    pub fn denied() -> Self {
        Self { granted: false }
    }
}

#[async_trait]
impl MicrophonePermission for StaticPermission {
    async fn request(&self) -> bool {
        self.granted
    }
}

// =============================================================================
// Capture interface
// =============================================================================

/// Platform capture path.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Request permission, acquire the input and start emitting chunks.
    ///
    /// Fails with `PermissionDenied` if refused, and with `CaptureFailure`
    /// if the input resource is already held.
    async fn start(&self, on_chunk: mpsc::Sender<AudioChunk>) -> CallResult<CaptureHandle>;

    /// Variant name for logging.
    fn name(&self) -> &'static str;
}

/// Running capture. Dropping the handle does not stop capture; call `stop`.
#[derive(Debug)]
pub struct CaptureHandle {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    active: AtomicBool,
}

impl CaptureHandle {
    fn running(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Mutex::new(Some(task)),
            active: AtomicBool::new(true),
        }
    }

    /// A handle that was never started. `stop` on it is a no-op.
    pub fn inactive() -> Self {
        Self {
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop capture and release the input resource. Idempotent.
    pub async fn stop(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Capture task ended abnormally: {}", e),
                Err(_) => {
                    warn!("Capture task did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        debug!("Capture stopped");
    }
}

// =============================================================================
// Chunk assembly
// =============================================================================

/// Re-chunks arbitrary frames into exact capture windows.
#[derive(Debug)]
pub struct ChunkAssembler {
    bytes_per_chunk: usize,
    buffer: Vec<u8>,
    next_seq: u64,
}

impl ChunkAssembler {
    pub fn new(interval: Duration) -> Self {
        let samples = (u64::from(SAMPLE_RATE) * interval.as_millis() as u64 / 1000).max(1);
        Self {
            bytes_per_chunk: samples as usize * 2,
            buffer: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn bytes_per_chunk(&self) -> usize {
        self.bytes_per_chunk
    }

    /// Append samples, returning every chunk completed by them.
    pub fn push(&mut self, samples: &[i16]) -> Vec<AudioChunk> {
        self.buffer.extend(samples.iter().flat_map(|s| s.to_le_bytes()));

        let mut ready = Vec::new();
        while self.buffer.len() >= self.bytes_per_chunk {
            let rest = self.buffer.split_off(self.bytes_per_chunk);
            let data = std::mem::replace(&mut self.buffer, rest);
            ready.push(self.emit(data));
        }
        ready
    }

    /// Emit the partial remainder, if any.
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.buffer.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.buffer);
        Some(self.emit(data))
    }

    fn emit(&mut self, data: Vec<u8>) -> AudioChunk {
        let chunk = AudioChunk {
            seq: self.next_seq,
            data: Bytes::from(data),
        };
        self.next_seq += 1;
        chunk
    }
}

// =============================================================================
// Live frame variant
// =============================================================================

type FrameSlot = Arc<Mutex<Option<mpsc::Receiver<Vec<i16>>>>>;

/// Capture from live PCM frames pushed by the host audio stack.
///
/// Frames must be mono 24kHz i16. The receiving end is the exclusive input
/// resource: it is taken on `start` and returned on `stop`.
pub struct FrameStreamCapture {
    permission: Arc<dyn MicrophonePermission>,
    frames: FrameSlot,
    interval: Duration,
}

impl FrameStreamCapture {
    pub fn new(
        permission: Arc<dyn MicrophonePermission>,
        frames: mpsc::Receiver<Vec<i16>>,
        interval: Duration,
    ) -> Self {
        Self {
            permission,
            frames: Arc::new(Mutex::new(Some(frames))),
            interval,
        }
    }

    /// Build a capture together with the sender the host pushes frames into.
    pub fn channel(
        permission: Arc<dyn MicrophonePermission>,
        interval: Duration,
    ) -> (Self, mpsc::Sender<Vec<i16>>) {
        let (tx, rx) = mpsc::channel(64);
        (Self::new(permission, rx, interval), tx)
    }
}

#[async_trait]
impl AudioCapture for FrameStreamCapture {
    async fn start(&self, on_chunk: mpsc::Sender<AudioChunk>) -> CallResult<CaptureHandle> {
        if !self.permission.request().await {
            return Err(CallError::PermissionDenied);
        }

        let mut frames = self
            .frames
            .lock()
            .take()
            .ok_or_else(|| CallError::CaptureFailure("frame input already in use".to_string()))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let slot = self.frames.clone();
        let mut assembler = ChunkAssembler::new(self.interval);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    frame = frames.recv() => {
                        let Some(frame) = frame else {
                            if let Some(tail) = assembler.flush() {
                                tokio::select! {
                                    _ = token.cancelled() => {}
                                    _ = on_chunk.send(tail) => {}
                                }
                            }
                            debug!("Frame source closed");
                            break;
                        };
                        let mut open = true;
                        for chunk in assembler.push(&frame) {
                            tokio::select! {
                                _ = token.cancelled() => {
                                    open = false;
                                    break;
                                }
                                sent = on_chunk.send(chunk) => {
                                    if sent.is_err() {
                                        debug!("Chunk consumer gone, stopping frame capture");
                                        open = false;
                                        break;
                                    }
                                }
                            }
                        }
                        if !open {
                            break;
                        }
                    }
                }
            }
            *slot.lock() = Some(frames);
        });

        info!("Frame capture started ({:?} windows)", self.interval);
        Ok(CaptureHandle::running(cancel, task))
    }

    fn name(&self) -> &'static str {
        "frame-stream"
    }
}

// =============================================================================
// Recorded file variant
// =============================================================================

/// Capture from a recorded WAV, normalized to mono 24kHz PCM16.
///
/// The recording is replayed one window per interval so the remote side
/// sees the same pacing as a live microphone.
pub struct RecordingCapture {
    permission: Arc<dyn MicrophonePermission>,
    path: PathBuf,
    interval: Duration,
    in_use: Arc<AtomicBool>,
}

impl RecordingCapture {
    pub fn new(
        permission: Arc<dyn MicrophonePermission>,
        path: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            permission,
            path: path.into(),
            interval,
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AudioCapture for RecordingCapture {
    async fn start(&self, on_chunk: mpsc::Sender<AudioChunk>) -> CallResult<CaptureHandle> {
        if !self.permission.request().await {
            return Err(CallError::PermissionDenied);
        }

        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CallError::CaptureFailure(
                "recording already in use".to_string(),
            ));
        }

        let path = self.path.clone();
        let samples = match tokio::task::spawn_blocking(move || load_normalized(&path)).await {
            Ok(Ok(samples)) => samples,
            Ok(Err(e)) => {
                self.in_use.store(false, Ordering::Release);
                return Err(e);
            }
            Err(e) => {
                self.in_use.store(false, Ordering::Release);
                return Err(CallError::CaptureFailure(format!("loader panicked: {}", e)));
            }
        };

        let mut assembler = ChunkAssembler::new(self.interval);
        let mut chunks = assembler.push(&samples);
        chunks.extend(assembler.flush());
        info!(
            "Recording capture started: {} ({} chunks)",
            self.path.display(),
            chunks.len()
        );

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let in_use = self.in_use.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for chunk in chunks {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            sent = on_chunk.send(chunk) => {
                                if sent.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            in_use.store(false, Ordering::Release);
            debug!("Recording capture finished");
        });

        Ok(CaptureHandle::running(cancel, task))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Read a WAV file as mono 24kHz i16 samples.
pub fn load_normalized(path: &Path) -> CallResult<Vec<i16>> {
    let reader = hound::WavReader::open(path).map_err(|e| {
        CallError::CaptureFailure(format!("cannot open {}: {}", path.display(), e))
    })?;
    let spec = reader.spec();
    debug!(
        "Loading recording: {}Hz, {} channels, {} bits {:?}",
        spec.sample_rate, spec.channels, spec.bits_per_sample, spec.sample_format
    );

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CallError::CaptureFailure(format!("bad samples: {}", e)))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CallError::CaptureFailure(format!("bad samples: {}", e)))?
        }
    };

    let mono = downmix(&interleaved, spec.channels);
    let resampled = resample_linear(&mono, spec.sample_rate, SAMPLE_RATE);
    Ok(resampled
        .into_iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect())
}

fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear interpolation resampling.
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let new_len = (samples.len() as f64 / ratio).ceil() as usize;
    let mut resampled = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 * ratio;
        let idx0 = (src_idx.floor() as usize).min(samples.len() - 1);
        let idx1 = (idx0 + 1).min(samples.len() - 1);
        let frac = (src_idx - idx0 as f64) as f32;
        resampled.push(samples[idx0] * (1.0 - frac) + samples[idx1] * frac);
    }

    resampled
}

// =============================================================================
// Variant selection
// =============================================================================

/// Where captured audio comes from.
pub enum CaptureSource {
    /// Live frames pushed by the host
    Frames(mpsc::Receiver<Vec<i16>>),
    /// Recorded WAV file
    Recording(PathBuf),
}

/// Select the capture variant for a source.
pub fn create_capture(
    source: CaptureSource,
    permission: Arc<dyn MicrophonePermission>,
    interval: Duration,
) -> Arc<dyn AudioCapture> {
    match source {
        CaptureSource::Frames(rx) => Arc::new(FrameStreamCapture::new(permission, rx, interval)),
        CaptureSource::Recording(path) => {
            Arc::new(RecordingCapture::new(permission, path, interval))
        }
    }
}
