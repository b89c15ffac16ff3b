//! Error taxonomy shared by the relay and its peers.

use crate::protocol::ErrorCode;
use thiserror::Error;

/// Room lifecycle failures, reported to the requester only
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Room not found")]
    RoomNotFound,
    #[error("Room is full")]
    RoomFull,
    #[error("Connection is already in a room")]
    AlreadyInRoom,
    #[error("Unknown connection")]
    UnknownConnection,
}

impl RoomError {
    /// Wire code carried by the `error` envelope
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::RoomNotFound => ErrorCode::RoomNotFound,
            RoomError::RoomFull => ErrorCode::RoomFull,
            RoomError::AlreadyInRoom => ErrorCode::AlreadyInRoom,
            RoomError::UnknownConnection => ErrorCode::Internal,
        }
    }

    /// Map an `error` envelope code back to a room error
    pub fn from_code(code: ErrorCode) -> Option<Self> {
        match code {
            ErrorCode::RoomNotFound => Some(RoomError::RoomNotFound),
            ErrorCode::RoomFull => Some(RoomError::RoomFull),
            ErrorCode::AlreadyInRoom => Some(RoomError::AlreadyInRoom),
            ErrorCode::Protocol | ErrorCode::Internal => None,
        }
    }
}

/// Malformed frames. The connection stays open after one of these.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Message type {0} is not accepted here")]
    UnexpectedType(String),
    #[error("Missing field {0}")]
    MissingField(&'static str),
    #[error("Binary frames are not supported")]
    BinaryFrame,
}

/// File transfer failures, local to the peer that observes them
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("File {file_name} is incomplete, missing chunks: {missing:?}")]
    Reassembly { file_name: String, missing: Vec<u32> },
    #[error("Chunk index {index} outside 0..{total_chunks}")]
    ChunkOutOfRange { index: u32, total_chunks: u32 },
    #[error("Chunk {index} carries invalid data")]
    InvalidChunkData { index: u32 },
    #[error("File too large: {0} bytes")]
    FileTooLarge(u64),
    #[error("Implausible file-info for {file_name}: {file_size} bytes in {total_chunks} chunks")]
    InvalidFileInfo {
        file_name: String,
        file_size: u64,
        total_chunks: u32,
    },
    #[error("Peer stopped acknowledging chunks")]
    Stalled,
    #[error("Another file transfer is already in progress")]
    Busy,
    #[error("No file transfer in progress")]
    NoActiveTransfer,
}
