//! Voice call orchestration.
//!
//! A [`VoiceCall`] wires capture, the realtime session and playback together
//! for one tutor call. `start` acquires the microphone before connecting so
//! a refused permission never opens a transport. `end_call` tears everything
//! down step by step; every step runs even if an earlier one failed, and the
//! whole sequence is safe to repeat at any point in the call's life.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::audio::capture::{AudioCapture, AudioChunk, CaptureHandle};
use crate::core::audio::playback::PlaybackQueue;
use crate::core::audio::sink::AudioSink;
use crate::core::credentials::CredentialProvider;
use crate::core::realtime::config::RealtimeSettings;
use crate::core::realtime::session::{CallStatus, RealtimeSession, SessionEvent};
use crate::errors::CallResult;

/// Captured chunks buffered between capture and the session.
const CHUNK_BUFFER: usize = 32;

#[derive(Default)]
struct CallResources {
    capture: Option<Arc<CaptureHandle>>,
    session: Option<RealtimeSession>,
    pump: Option<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
}

/// One tutor call.
pub struct VoiceCall {
    call_id: String,
    settings: RealtimeSettings,
    credentials: Arc<dyn CredentialProvider>,
    capture: Arc<dyn AudioCapture>,
    sink: Arc<dyn AudioSink>,
    resources: Mutex<CallResources>,
    muted: AtomicBool,
}

impl VoiceCall {
    pub fn new(
        settings: RealtimeSettings,
        credentials: Arc<dyn CredentialProvider>,
        capture: Arc<dyn AudioCapture>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            settings,
            credentials,
            capture,
            sink,
            resources: Mutex::new(CallResources::default()),
            muted: AtomicBool::new(false),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Start capture, connect and begin streaming.
    ///
    /// Starting a call that is already running is a no-op.
    pub async fn start(&self) -> CallResult<()> {
        if self.resources.lock().session.is_some() {
            debug!(call_id = %self.call_id, "Call already started");
            return Ok(());
        }
        info!(
            call_id = %self.call_id,
            "Starting call ({} capture, {} / {})",
            self.capture.name(),
            self.settings.persona.style,
            self.settings.persona.language
        );

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let capture = Arc::new(self.capture.start(chunk_tx).await?);

        let playback = PlaybackQueue::new(self.sink.clone());
        let session = RealtimeSession::new(
            self.call_id.clone(),
            self.settings.clone(),
            self.credentials.clone(),
            playback,
        );
        session.set_muted(self.muted.load(Ordering::Acquire));
        let events = session.subscribe();
        let pump = tokio::spawn(pump_chunks(session.clone(), chunk_rx));

        {
            let mut resources = self.resources.lock();
            resources.capture = Some(capture.clone());
            resources.session = Some(session.clone());
            resources.pump = Some(pump);
        }

        if let Err(e) = session.connect().await {
            if e.is_fatal() {
                error!(call_id = %self.call_id, "Call setup rejected: {}", e);
            } else {
                warn!(call_id = %self.call_id, "Call setup failed: {}", e);
            }
            self.end_call().await;
            return Err(e);
        }

        let supervisor = tokio::spawn(supervise(session.clone(), capture, events));
        let mut resources = self.resources.lock();
        if resources.session.is_some() {
            resources.supervisor = Some(supervisor);
        } else {
            // end_call ran while connecting
            supervisor.abort();
        }
        Ok(())
    }

    /// End the call and release every resource.
    ///
    /// Stops the microphone, cancels any pending reconnect, closes the
    /// transport, empties and releases playback and clears the transcript.
    pub async fn end_call(&self) {
        let resources = std::mem::take(&mut *self.resources.lock());

        if let Some(capture) = &resources.capture {
            capture.stop().await;
        }
        if let Some(pump) = resources.pump {
            pump.abort();
        }
        if let Some(supervisor) = resources.supervisor {
            supervisor.abort();
        }
        if let Some(session) = &resources.session {
            session.close().await;
            if let Err(e) = session.playback().shutdown().await {
                warn!(call_id = %self.call_id, "Failed to release audio sink: {}", e);
            }
            session.clear_transcript();
            info!(call_id = %self.call_id, "Call ended");
        }
    }

    /// Flip mute. Returns the new state.
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.muted.fetch_xor(true, Ordering::AcqRel);
        if let Some(session) = &self.resources.lock().session {
            session.set_muted(muted);
        }
        info!(call_id = %self.call_id, "Microphone {}", if muted { "muted" } else { "unmuted" });
        muted
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.resources.lock().session.is_some()
    }

    pub fn status(&self) -> CallStatus {
        match &self.resources.lock().session {
            Some(session) => session.status(),
            None => CallStatus {
                muted: self.is_muted(),
                ..Default::default()
            },
        }
    }

    /// Live session, if the call is running.
    pub fn session(&self) -> Option<RealtimeSession> {
        self.resources.lock().session.clone()
    }

    pub fn subscribe(&self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.resources.lock().session.as_ref().map(|s| s.subscribe())
    }
}

/// Forward captured chunks to the session in capture order.
async fn pump_chunks(session: RealtimeSession, mut chunks: mpsc::Receiver<AudioChunk>) {
    let mut sent = 0u64;
    let mut dropped = 0u64;
    while let Some(chunk) = chunks.recv().await {
        match session.send_audio(&chunk).await {
            Ok(true) => sent += 1,
            Ok(false) => dropped += 1,
            Err(e) => {
                dropped += 1;
                warn!("{}", e);
            }
        }
    }
    debug!(
        call_id = %session.call_id(),
        "Capture pump finished: {} sent, {} dropped",
        sent, dropped
    );
}

/// Release capture and playback once the session ends on its own.
async fn supervise(
    session: RealtimeSession,
    capture: Arc<CaptureHandle>,
    mut events: broadcast::Receiver<SessionEvent>,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Fatal(e)) => {
                warn!(call_id = %session.call_id(), "Call aborted: {}", e);
                break;
            }
            Ok(SessionEvent::Closed { code }) => {
                info!(call_id = %session.call_id(), "Call closed by remote (code {:?})", code);
                break;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("Supervisor lagged {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }

    capture.stop().await;
    session.playback().clear();
}
