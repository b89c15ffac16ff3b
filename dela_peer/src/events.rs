//! Events delivered to the presentation layer

use dela_core::transfer::ReceivedFile;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSender {
    Local,
    Peer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub content: String,
    /// Milliseconds since the Unix epoch, as stamped by the author
    pub timestamp: u64,
    pub sender: MessageSender,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Sending,
    Receiving,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Message(ChatMessage),
    TransferProgress {
        file_name: String,
        direction: TransferDirection,
        /// 0.0 to 100.0
        progress: f32,
    },
    FileReceived(ReceivedFile),
    TransferFailed {
        file_name: String,
        direction: TransferDirection,
        reason: String,
    },
    Error(String),
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Suppresses progress reports that would not change the whole percentage
#[derive(Debug, Default)]
pub(crate) struct ProgressThrottle {
    last: Option<u32>,
}

impl ProgressThrottle {
    pub(crate) fn should_report(&mut self, progress: f32) -> bool {
        let percent = progress.floor() as u32;
        if self.last == Some(percent) {
            return false;
        }
        self.last = Some(percent);
        true
    }
}
