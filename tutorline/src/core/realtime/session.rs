//! Realtime session protocol.
//!
//! A [`RealtimeSession`] owns one duplex WebSocket connection to the realtime
//! endpoint for the lifetime of a call attempt. A single connection task
//! multiplexes outbound client events and inbound server events, routes
//! audio deltas into the [`PlaybackQueue`], and on abnormal closure runs the
//! reconnect policy before resuming on a fresh transport.
//!
//! State flows out through two channels:
//! - a `watch` of [`CallStatus`] (state, speaking, reconnecting, transcript)
//! - a `broadcast` of observational [`SessionEvent`]s

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use http::header::AUTHORIZATION;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::RealtimeSettings;
use super::messages::{ClientEvent, ServerEvent, SessionConfig};
use super::resilience::{
    CLOSE_ABNORMAL, CloseDisposition, CloseReason, classify, is_auth_status, wait_before_retry,
};
use super::transcript::TranscriptBuffer;
use crate::core::audio::capture::AudioChunk;
use crate::core::audio::playback::PlaybackQueue;
use crate::core::credentials::{Credential, CredentialProvider};
use crate::errors::{CallError, CallResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Outbound channel capacity per connection.
const OUTBOUND_CAPACITY: usize = 256;

/// Observational event channel capacity.
const EVENT_CAPACITY: usize = 128;

/// Upper bound on waiting for the connection task during `close`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Close code used when a close frame carries no status.
const CLOSE_NO_STATUS: u16 = 1005;

// =============================================================================
// Observable state
// =============================================================================

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Open => write!(f, "open"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// User-visible call status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStatus {
    pub state: SessionState,
    /// Assistant audio is streaming
    pub speaking: bool,
    /// A reconnect is scheduled or in flight
    pub reconnecting: bool,
    /// Captured audio is being dropped
    pub muted: bool,
    /// Current assistant utterance
    pub transcript: String,
    /// Last error that ended or interrupted the session
    pub error: Option<CallError>,
}

/// Observational events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SessionCreated { id: String },
    SessionUpdated,
    /// Final text of an assistant utterance
    AssistantTranscript(String),
    /// Completed transcription of the user's speech
    UserTranscript(String),
    SpeechStarted,
    SpeechStopped,
    ResponseDone { status: String },
    /// Error event sent by the server; the connection stays up
    ServerError { error_type: String, message: String },
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected { attempt: u32 },
    Closed { code: Option<u16> },
    Fatal(CallError),
}

/// Connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// WebSocket handshakes attempted
    pub connection_attempts: u32,
    /// Reconnect timers scheduled
    pub reconnects_scheduled: u32,
}

enum Outbound {
    Event(ClientEvent),
    Close,
}

// =============================================================================
// Session
// =============================================================================

struct SessionInner {
    call_id: String,
    settings: RealtimeSettings,
    credentials: Arc<dyn CredentialProvider>,
    /// Present only while a transport is open
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    status: watch::Sender<CallStatus>,
    events: broadcast::Sender<SessionEvent>,
    playback: PlaybackQueue,
    transcript: Mutex<TranscriptBuffer>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    connection_attempts: AtomicU32,
    reconnects_scheduled: AtomicU32,
}

impl SessionInner {
    fn set_state(&self, state: SessionState) {
        self.status.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            s.state = state;
            true
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn fail(&self, err: CallError) {
        error!(call_id = %self.call_id, "Realtime session failed: {}", err);
        self.status.send_modify(|s| {
            s.reconnecting = false;
            s.error = Some(err.clone());
        });
        self.emit(SessionEvent::Fatal(err));
    }
}

/// One realtime call attempt over a duplex connection.
#[derive(Clone)]
pub struct RealtimeSession {
    inner: Arc<SessionInner>,
}

impl RealtimeSession {
    pub fn new(
        call_id: impl Into<String>,
        settings: RealtimeSettings,
        credentials: Arc<dyn CredentialProvider>,
        playback: PlaybackQueue,
    ) -> Self {
        let (status, _) = watch::channel(CallStatus::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                call_id: call_id.into(),
                settings,
                credentials,
                outbound: Mutex::new(None),
                status,
                events,
                playback,
                transcript: Mutex::new(TranscriptBuffer::new()),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
                started: AtomicBool::new(false),
                connection_attempts: AtomicU32::new(0),
                reconnects_scheduled: AtomicU32::new(0),
            }),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.inner.call_id
    }

    pub fn settings(&self) -> &RealtimeSettings {
        &self.inner.settings
    }

    /// Open the transport, configure the session and schedule the greeting.
    ///
    /// The credential is fetched before any transport is opened, so a
    /// missing key fails with `NotConfigured` without touching the network.
    /// Calling `connect` on a live session is a no-op.
    pub async fn connect(&self) -> CallResult<()> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(CallError::ConnectionFailed("session is closed".to_string()));
        }
        if inner.started.swap(true, Ordering::AcqRel) {
            debug!(call_id = %inner.call_id, "Session already connected");
            return Ok(());
        }

        inner.set_state(SessionState::Connecting);
        let (mut ws, rx) = match establish(inner).await {
            Ok(connection) => connection,
            Err(e) => {
                inner.started.store(false, Ordering::Release);
                inner.status.send_modify(|s| {
                    s.state = SessionState::Closed;
                    s.error = Some(e.clone());
                });
                return Err(e);
            }
        };

        if inner.cancel.is_cancelled() {
            inner.outbound.lock().take();
            let _ = ws.close(None).await;
            inner.set_state(SessionState::Closed);
            return Err(CallError::ConnectionFailed(
                "session closed while connecting".to_string(),
            ));
        }

        let task = tokio::spawn(run(inner.clone(), ws, rx));
        *inner.task.lock() = Some(task);
        Ok(())
    }

    /// Send one captured chunk as `input_audio_buffer.append`.
    ///
    /// Returns `Ok(false)` when the chunk was dropped because the transport
    /// is not open or the call is muted.
    pub async fn send_audio(&self, chunk: &AudioChunk) -> CallResult<bool> {
        if self.inner.status.borrow().muted {
            return Ok(false);
        }
        let sender = self.inner.outbound.lock().clone();
        let Some(sender) = sender else {
            trace!("Dropping chunk {}: transport not open", chunk.seq);
            return Ok(false);
        };
        sender
            .send(Outbound::Event(ClientEvent::audio_append(&chunk.data)))
            .await
            .map_err(|_| {
                CallError::CaptureFailure(format!("chunk {} not sent: transport closing", chunk.seq))
            })?;
        Ok(true)
    }

    /// Close the transport and cancel any pending reconnect. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return;
        }
        inner.set_state(SessionState::Closing);
        inner.cancel.cancel();
        if let Some(tx) = inner.outbound.lock().take() {
            let _ = tx.try_send(Outbound::Close);
        }

        let task = inner.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                warn!(call_id = %inner.call_id, "Connection task did not stop in time, aborting");
                task.abort();
            }
        }

        inner.status.send_modify(|s| {
            s.state = SessionState::Closed;
            s.speaking = false;
            s.reconnecting = false;
        });
        info!(call_id = %inner.call_id, "Realtime session closed");
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.status.send_modify(|s| s.muted = muted);
    }

    pub fn clear_transcript(&self) {
        self.inner.transcript.lock().clear();
        self.inner.status.send_modify(|s| s.transcript.clear());
    }

    pub fn state(&self) -> SessionState {
        self.inner.status.borrow().state
    }

    pub fn is_open(&self) -> bool {
        self.inner.outbound.lock().is_some()
    }

    pub fn status(&self) -> CallStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<CallStatus> {
        self.inner.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn transcript(&self) -> String {
        self.inner.transcript.lock().text().to_string()
    }

    pub fn playback(&self) -> &PlaybackQueue {
        &self.inner.playback
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            connection_attempts: self.inner.connection_attempts.load(Ordering::Relaxed),
            reconnects_scheduled: self.inner.reconnects_scheduled.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RealtimeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSession")
            .field("call_id", &self.inner.call_id)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Connection setup
// =============================================================================

fn build_request(settings: &RealtimeSettings, credential: &Credential) -> CallResult<Request> {
    let url = settings
        .connect_url()
        .map_err(|e| CallError::InvalidConfiguration(format!("invalid realtime url: {e}")))?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| CallError::InvalidConfiguration(format!("invalid realtime url: {e}")))?;

    let auth = HeaderValue::from_str(&credential.bearer()).map_err(|_| {
        CallError::InvalidConfiguration("credential is not a valid header value".to_string())
    })?;
    let headers = request.headers_mut();
    headers.insert(AUTHORIZATION, auth);
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
    Ok(request)
}

fn map_handshake_error(err: tungstenite::Error) -> CallError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            let reason = format!("handshake rejected with HTTP {status}");
            if is_auth_status(status) {
                CallError::ProtocolError {
                    code: status,
                    reason,
                }
            } else {
                CallError::ConnectionFailed(reason)
            }
        }
        other => CallError::ConnectionFailed(other.to_string()),
    }
}

/// Fetch the credential, open the transport and queue `session.update`.
async fn establish(
    inner: &Arc<SessionInner>,
) -> CallResult<(WsStream, mpsc::Receiver<Outbound>)> {
    let credential = inner.credentials.fetch().await?;
    let request = build_request(&inner.settings, &credential)?;
    drop(credential);

    inner.connection_attempts.fetch_add(1, Ordering::Relaxed);
    debug!(call_id = %inner.call_id, "Connecting to {}", inner.settings.url);
    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(map_handshake_error)?;
    info!(call_id = %inner.call_id, "Connected to realtime endpoint");

    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let session_update = ClientEvent::SessionUpdate {
        session: SessionConfig::from_settings(&inner.settings),
    };
    tx.try_send(Outbound::Event(session_update))
        .map_err(|_| CallError::ConnectionFailed("outbound channel unavailable".to_string()))?;

    *inner.outbound.lock() = Some(tx.clone());
    inner.status.send_modify(|s| {
        s.state = SessionState::Open;
        s.reconnecting = false;
        s.error = None;
    });
    schedule_greeting(inner, tx);
    Ok((ws, rx))
}

/// Ask the assistant to speak first once the configuration has settled.
fn schedule_greeting(inner: &Arc<SessionInner>, tx: mpsc::Sender<Outbound>) {
    let delay = inner.settings.greeting_delay;
    let cancel = inner.cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                if tx.send(Outbound::Event(ClientEvent::ResponseCreate)).await.is_err() {
                    debug!("Connection gone before greeting");
                }
            }
        }
    });
}

// =============================================================================
// Connection task
// =============================================================================

async fn run(inner: Arc<SessionInner>, ws: WsStream, rx: mpsc::Receiver<Outbound>) {
    let mut connection = Some((ws, rx));

    while let Some((ws, rx)) = connection.take() {
        let reason = pump(&inner, ws, rx).await;
        inner.outbound.lock().take();
        inner.status.send_modify(|s| s.speaking = false);
        info!(call_id = %inner.call_id, "Realtime transport closed: {:?}", reason);

        match classify(&reason) {
            CloseDisposition::Finished => {
                inner.emit(SessionEvent::Closed {
                    code: reason.code(),
                });
            }
            CloseDisposition::Fatal(err) => inner.fail(err),
            CloseDisposition::Retry(err) => {
                if inner.cancel.is_cancelled() {
                    inner.emit(SessionEvent::Closed {
                        code: reason.code(),
                    });
                } else {
                    connection = reconnect(&inner, err).await;
                }
            }
        }
    }

    inner.status.send_modify(|s| {
        s.state = SessionState::Closed;
        s.speaking = false;
        s.reconnecting = false;
    });
    debug!(call_id = %inner.call_id, "Realtime connection task ended");
}

/// Run the reconnect policy after an abnormal close.
///
/// Only this task ever reconnects, so no second attempt can be in flight.
async fn reconnect(
    inner: &Arc<SessionInner>,
    cause: CallError,
) -> Option<(WsStream, mpsc::Receiver<Outbound>)> {
    let policy = &inner.settings.reconnect;
    let mut attempts = 0u32;
    let mut last_error = cause;

    while policy.should_retry(attempts) {
        attempts += 1;
        let delay = policy.delay(attempts);
        inner.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
        inner.status.send_modify(|s| {
            s.state = SessionState::Closed;
            s.reconnecting = true;
        });
        inner.emit(SessionEvent::Reconnecting {
            attempt: attempts,
            delay,
        });
        warn!(
            call_id = %inner.call_id,
            "Connection lost ({}), reconnecting in {:?} (attempt {})",
            last_error, delay, attempts
        );

        if !wait_before_retry(delay, &inner.cancel).await {
            info!(call_id = %inner.call_id, "Reconnect cancelled");
            return None;
        }

        inner.set_state(SessionState::Connecting);
        let outcome = tokio::select! {
            result = establish(inner) => result,
            _ = inner.cancel.cancelled() => return None,
        };
        match outcome {
            Ok(connection) => {
                info!(call_id = %inner.call_id, "Reconnected on attempt {}", attempts);
                inner.emit(SessionEvent::Reconnected { attempt: attempts });
                return Some(connection);
            }
            Err(e) if !e.is_retryable() => {
                inner.fail(e);
                return None;
            }
            Err(e) => {
                warn!(call_id = %inner.call_id, "Reconnect attempt {} failed: {}", attempts, e);
                last_error = e;
            }
        }
    }

    warn!(
        call_id = %inner.call_id,
        "Giving up after {} reconnect attempts: {}",
        attempts, last_error
    );
    inner.status.send_modify(|s| {
        s.reconnecting = false;
        s.error = Some(last_error);
    });
    inner.emit(SessionEvent::Closed {
        code: Some(CLOSE_ABNORMAL),
    });
    None
}

/// Drive one transport until it closes.
async fn pump(
    inner: &Arc<SessionInner>,
    ws: WsStream,
    mut rx: mpsc::Receiver<Outbound>,
) -> CloseReason {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Event(event)) => {
                    let json = match event.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to serialize event: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        return CloseReason::Transport(format!("send failed: {e}"));
                    }
                    trace!("Sent {}", event.kind());
                }
                Some(Outbound::Close) | None => {
                    close_sink(&mut sink).await;
                    return CloseReason::Local;
                }
            },

            _ = inner.cancel.cancelled() => {
                close_sink(&mut sink).await;
                return CloseReason::Local;
            }

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => handle_text(inner, text.as_str()),
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = sink.send(Message::Pong(payload)).await {
                        return CloseReason::Transport(format!("pong failed: {e}"));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    return CloseReason::Remote { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return CloseReason::Transport(e.to_string()),
                None => {
                    return CloseReason::Transport("stream ended without close frame".to_string());
                }
            }
        }
    }
}

async fn close_sink(sink: &mut WsSink) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "call ended".into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!("Close frame not delivered: {}", e);
    }
    let _ = sink.close().await;
}

// =============================================================================
// Inbound routing
// =============================================================================

fn handle_text(inner: &Arc<SessionInner>, text: &str) {
    let event = match ServerEvent::parse(text) {
        Ok(event) => event,
        Err(e) => {
            warn!(call_id = %inner.call_id, "Ignoring malformed server message: {}", e);
            return;
        }
    };

    match event {
        ServerEvent::SessionCreated { session } => {
            info!(call_id = %inner.call_id, "Session created: {}", session.id);
            inner.emit(SessionEvent::SessionCreated { id: session.id });
        }
        ServerEvent::SessionUpdated { .. } => {
            debug!("Session configuration acknowledged");
            inner.emit(SessionEvent::SessionUpdated);
        }
        ServerEvent::AudioDelta { delta } => {
            if delta.is_empty() {
                trace!("Skipping empty audio delta");
                return;
            }
            inner.playback.enqueue(delta);
            inner.status.send_if_modified(|s| !std::mem::replace(&mut s.speaking, true));
        }
        ServerEvent::AudioDone => {
            inner.status.send_if_modified(|s| std::mem::replace(&mut s.speaking, false));
        }
        ServerEvent::AudioTranscriptDelta { delta } => {
            let text = inner.transcript.lock().append(&delta).to_string();
            inner.status.send_modify(|s| s.transcript = text);
        }
        ServerEvent::AudioTranscriptDone { transcript } => {
            if transcript.is_empty() {
                trace!("Skipping empty final transcript");
                return;
            }
            let generation = inner.transcript.lock().finish(&transcript);
            inner
                .status
                .send_modify(|s| s.transcript.clone_from(&transcript));
            debug!("Assistant: {}", transcript);
            inner.emit(SessionEvent::AssistantTranscript(transcript));
            schedule_transcript_clear(inner, generation);
        }
        ServerEvent::TranscriptionCompleted { transcript } => {
            debug!("User: {}", transcript);
            inner.emit(SessionEvent::UserTranscript(transcript));
        }
        ServerEvent::SpeechStarted { .. } => inner.emit(SessionEvent::SpeechStarted),
        ServerEvent::SpeechStopped { .. } => inner.emit(SessionEvent::SpeechStopped),
        ServerEvent::ResponseDone { response } => {
            inner.emit(SessionEvent::ResponseDone {
                status: response.status,
            });
        }
        ServerEvent::Error { error } => {
            warn!(call_id = %inner.call_id, "Server error ({}): {}", error.error_type, error.message);
            inner.emit(SessionEvent::ServerError {
                error_type: error.error_type,
                message: error.message,
            });
        }
        ServerEvent::Unknown => trace!("Ignoring unhandled server event"),
    }
}

fn schedule_transcript_clear(inner: &Arc<SessionInner>, generation: u64) {
    let hold = inner.settings.transcript_hold;
    let cancel = inner.cancel.clone();
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(hold) => {
                let Some(inner) = weak.upgrade() else { return };
                if inner.transcript.lock().clear_if(generation) {
                    inner.status.send_modify(|s| s.transcript.clear());
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::sink::ClockedSink;
    use crate::core::credentials::StaticCredentialProvider;

    fn session(credentials: Arc<dyn CredentialProvider>) -> RealtimeSession {
        RealtimeSession::new(
            "test-call",
            RealtimeSettings::default(),
            credentials,
            PlaybackQueue::new(Arc::new(ClockedSink::new())),
        )
    }

    #[test]
    fn test_build_request_headers() {
        let credential = Credential::new("sk-test").unwrap();
        let request = build_request(&RealtimeSettings::default(), &credential).unwrap();

        assert_eq!(request.headers()["authorization"], "Bearer sk-test");
        assert_eq!(request.headers()["openai-beta"], "realtime=v1");
        assert_eq!(
            request.uri().query(),
            Some("model=gpt-4o-realtime-preview-2024-12-17")
        );
    }

    #[tokio::test]
    async fn test_connect_without_credential_opens_nothing() {
        let session = session(Arc::new(StaticCredentialProvider::unset()));

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, CallError::NotConfigured(_)));
        assert_eq!(session.stats().connection_attempts, 0);
        assert!(!session.is_open());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_send_audio_before_open_is_dropped() {
        let session = session(Arc::new(StaticCredentialProvider::new("sk-test")));
        let chunk = AudioChunk {
            seq: 0,
            data: bytes::Bytes::from_static(&[0, 0]),
        };
        assert!(!session.send_audio(&chunk).await.unwrap());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_before_connect() {
        let session = session(Arc::new(StaticCredentialProvider::new("sk-test")));
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_routing_updates_status() {
        let session = session(Arc::new(StaticCredentialProvider::new("sk-test")));
        let inner = &session.inner;
        let mut events = session.subscribe();

        handle_text(inner, r#"{"type":"response.audio_transcript.delta","delta":"Hey "}"#);
        handle_text(inner, r#"{"type":"response.audio_transcript.delta","delta":"Eduardo"}"#);
        assert_eq!(session.status().transcript, "Hey Eduardo");

        handle_text(inner, r#"{"type":"response.audio.delta","delta":"AAAA"}"#);
        assert!(session.status().speaking);
        handle_text(inner, r#"{"type":"response.audio.done"}"#);
        assert!(!session.status().speaking);

        handle_text(inner, r#"{"type":"error","error":{"type":"server_error","message":"oops"}}"#);
        handle_text(inner, "not json");
        handle_text(inner, r#"{"type":"response.output_item.added"}"#);

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::ServerError {
                error_type: "server_error".into(),
                message: "oops".into()
            }
        );
        // Errors never close the session by themselves
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_empty_payloads_are_skipped() {
        let session = session(Arc::new(StaticCredentialProvider::new("sk-test")));
        let inner = &session.inner;

        handle_text(inner, r#"{"type":"response.audio.delta","delta":""}"#);
        handle_text(inner, r#"{"type":"response.audio.delta"}"#);
        assert!(!session.status().speaking);
        assert!(session.playback().is_empty());
        assert_eq!(session.playback().stats().played, 0);

        handle_text(inner, r#"{"type":"response.audio_transcript.delta","delta":"Hola"}"#);
        handle_text(inner, r#"{"type":"response.audio_transcript.done","transcript":""}"#);
        handle_text(inner, r#"{"type":"response.audio_transcript.done"}"#);
        assert_eq!(session.status().transcript, "Hola");
        assert_eq!(session.transcript(), "Hola");
    }
}
