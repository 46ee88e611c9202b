//! Connection resilience.
//!
//! Classifies how a transport ended and decides whether the session may
//! reconnect. Abnormal closes (no close frame, network failure) are retried
//! according to [`ReconnectPolicy`]; protocol and authentication closes are
//! fatal; any other close ends the call quietly.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::CallError;

/// Close code sent when the endpoint violated the protocol.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Close code sent when the endpoint received data it cannot accept.
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
/// Reserved code reported when no close frame was received.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code sent on policy (authentication) violation.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// When and how often a dropped call is redialled.
///
/// Out of the box a dropped call gets one more try, three seconds later.
/// The budget applies per disconnect: once a redial succeeds, the next drop
/// starts counting from zero again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Redial after an abnormal closure at all
    pub enabled: bool,

    /// Redials per disconnect, 0 for no limit
    pub max_attempts: u32,

    /// Wait before the first redial (ms)
    pub initial_delay_ms: u64,

    /// Ceiling on the wait (ms)
    pub max_delay_ms: u64,

    /// Growth of the wait between consecutive redials; values below 1
    /// are treated as 1
    pub backoff_multiplier: f32,

    /// Spread each wait by up to a quarter either way
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 1,
            initial_delay_ms: 3000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Wait before redial number `attempt`, counting from 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.max_delay_ms.max(self.initial_delay_ms);
        let growth = f64::from(self.backoff_multiplier.max(1.0));
        let steps = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;

        let scaled_ms = (self.initial_delay_ms as f64 * growth.powi(steps)).round();
        let wait = if scaled_ms.is_finite() && scaled_ms < ceiling_ms as f64 {
            Duration::from_millis(scaled_ms as u64)
        } else {
            Duration::from_millis(ceiling_ms)
        };

        if self.jitter {
            wait.mul_f64(1.0 + jitter_factor(attempt))
        } else {
            wait
        }
    }

    /// Whether a redial may follow `attempts` redials already made for
    /// this disconnect.
    pub fn should_retry(&self, attempts: u32) -> bool {
        if !self.enabled {
            return false;
        }
        self.max_attempts == 0 || attempts < self.max_attempts
    }
}

/// Spread factor in `-0.25..0.25`, from the clock's sub-second part mixed
/// with the attempt number.
fn jitter_factor(attempt: u32) -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let mixed = u64::from(nanos ^ attempt.rotate_left(16))
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    let unit = (mixed >> 11) as f64 / (1u64 << 53) as f64;
    (unit - 0.5) * 0.5
}

/// How a transport ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by this side (`close()` or end of call)
    Local,
    /// Remote sent a close frame
    Remote { code: u16, reason: String },
    /// Stream error or EOF without a close frame
    Transport(String),
}

impl CloseReason {
    /// Close code as observed by the application.
    pub fn code(&self) -> Option<u16> {
        match self {
            CloseReason::Local => None,
            CloseReason::Remote { code, .. } => Some(*code),
            CloseReason::Transport(_) => Some(CLOSE_ABNORMAL),
        }
    }
}

/// What the session does after a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Call is over; nothing to report
    Finished,
    /// Abort the call with this error
    Fatal(CallError),
    /// Reconnect if the policy allows
    Retry(CallError),
}

/// Map a close to its disposition.
pub fn classify(reason: &CloseReason) -> CloseDisposition {
    match reason {
        CloseReason::Local => CloseDisposition::Finished,
        CloseReason::Transport(detail) => {
            CloseDisposition::Retry(CallError::TransportDropped(detail.clone()))
        }
        CloseReason::Remote { code, reason } => match *code {
            CLOSE_ABNORMAL => CloseDisposition::Retry(CallError::TransportDropped(reason.clone())),
            CLOSE_PROTOCOL_ERROR | CLOSE_UNSUPPORTED_DATA | CLOSE_POLICY_VIOLATION => {
                CloseDisposition::Fatal(CallError::ProtocolError {
                    code: *code,
                    reason: reason.clone(),
                })
            }
            _ => CloseDisposition::Finished,
        },
    }
}

/// Whether a handshake HTTP status means bad credentials.
pub fn is_auth_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}

/// Sleep out a reconnect delay. Returns `false` if cancelled first.
pub async fn wait_before_retry(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}
