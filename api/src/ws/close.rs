//! WebSocket close codes.
//!
//! The server only ever emits normal closure, going away and policy
//! violation. Anything else requested by callers is mapped onto that set.

use axum::extract::ws::{CloseCode, CloseFrame, Message, Utf8Bytes};

/// Normal closure.
pub const NORMAL: CloseCode = 1000;

/// Server shutting down or peer unreachable.
pub const GOING_AWAY: CloseCode = 1001;

/// Handshake or message violated server policy.
pub const POLICY_VIOLATION: CloseCode = 1008;

/// Close reasons must fit a control frame.
const MAX_REASON_BYTES: usize = 123;

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Regular close, including a superseded session.
    Normal,
    /// Shutdown, missed heartbeat or a stalled outbound queue.
    GoingAway,
    /// Missing identity or other policy failure.
    PolicyViolation,
}

impl CloseReason {
    /// Wire close code.
    #[must_use]
    pub const fn code(&self) -> CloseCode {
        match self {
            Self::Normal => NORMAL,
            Self::GoingAway => GOING_AWAY,
            Self::PolicyViolation => POLICY_VIOLATION,
        }
    }

    /// Builds a close message carrying this reason.
    #[must_use]
    pub fn frame(&self, reason: &str) -> Message {
        Message::Close(Some(CloseFrame {
            code: self.code(),
            reason: Utf8Bytes::from(truncate(reason).to_string()),
        }))
    }
}

impl From<u16> for CloseReason {
    fn from(code: u16) -> Self {
        match sanitize(code) {
            GOING_AWAY => Self::GoingAway,
            POLICY_VIOLATION => Self::PolicyViolation,
            _ => Self::Normal,
        }
    }
}

/// Maps codes outside the application range `1000..=4999` to normal closure.
#[must_use]
pub const fn sanitize(code: u16) -> CloseCode {
    if code >= 1000 && code <= 4999 {
        code
    } else {
        NORMAL
    }
}

fn truncate(reason: &str) -> &str {
    if reason.len() <= MAX_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason.get(..end).unwrap_or_default()
}
