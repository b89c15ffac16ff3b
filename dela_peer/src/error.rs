use dela_core::error::{ProtocolError, RoomError, TransferError};
use thiserror::Error;

/// Failures reported by [`Session`](crate::Session) calls
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected to a peer")]
    NotConnected,
    #[error("Relay did not answer in time")]
    Timeout,
    #[error("Connection to relay closed")]
    Closed,
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),
    /// `error` envelope that is not a room error
    #[error("Relay error: {0}")]
    Relay(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
