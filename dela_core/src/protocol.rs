//! Envelope wire format
//!
//! Every WebSocket text frame is a JSON object with a `type` tag and
//! camelCase fields, e.g. `{"type":"join-room","roomCode":"AB12CD"}`.

use crate::error::{ProtocolError, RoomError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound for a single envelope (100MB)
pub const MAX_ENVELOPE_SIZE: usize = 100 * 1024 * 1024;

/// Machine readable reason carried by `error` envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Protocol,
    RoomNotFound,
    RoomFull,
    AlreadyInRoom,
    Internal,
}

/// Messages exchanged between peers and the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Ask the relay for a new room
    CreateRoom,
    /// Code issued for a new room
    RoomCreated { room_code: String },
    /// Attempt to join an existing room
    JoinRoom {
        #[serde(alias = "roomId")]
        room_code: String,
    },
    /// Join accepted
    RoomJoined {
        #[serde(default)]
        room_code: String,
    },
    /// A guest attached to the host's room
    PeerJoined,
    /// The counterpart left, was reaped or the room expired
    PeerDisconnected,
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
    ChatMessage { content: String, timestamp: u64 },
    /// Announces a transfer before any chunk is sent
    FileInfo {
        file_name: String,
        file_size: u64,
        #[serde(default)]
        file_type: String,
        total_chunks: u32,
    },
    /// One base64 encoded segment
    FileChunk { chunk_index: u32, data: String },
    FileComplete,
    /// Receiver stored the chunk
    FileAck { chunk_index: u32 },
    /// Receiver discarded the transfer
    FileFailed {
        file_name: String,
        missing_chunks: Vec<u32>,
    },
}

impl Envelope {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::CreateRoom => EnvelopeKind::CreateRoom,
            Envelope::RoomCreated { .. } => EnvelopeKind::RoomCreated,
            Envelope::JoinRoom { .. } => EnvelopeKind::JoinRoom,
            Envelope::RoomJoined { .. } => EnvelopeKind::RoomJoined,
            Envelope::PeerJoined => EnvelopeKind::PeerJoined,
            Envelope::PeerDisconnected => EnvelopeKind::PeerDisconnected,
            Envelope::Error { .. } => EnvelopeKind::Error,
            Envelope::ChatMessage { .. } => EnvelopeKind::ChatMessage,
            Envelope::FileInfo { .. } => EnvelopeKind::FileInfo,
            Envelope::FileChunk { .. } => EnvelopeKind::FileChunk,
            Envelope::FileComplete => EnvelopeKind::FileComplete,
            Envelope::FileAck { .. } => EnvelopeKind::FileAck,
            Envelope::FileFailed { .. } => EnvelopeKind::FileFailed,
        }
    }

    pub fn room_error(err: &RoomError) -> Self {
        Envelope::Error {
            message: err.to_string(),
            code: Some(err.code()),
        }
    }

    pub fn protocol_error(err: &ProtocolError) -> Self {
        Envelope::Error {
            message: err.to_string(),
            code: Some(ErrorCode::Protocol),
        }
    }
}

/// The `type` tag on its own, used by the relay to route frames without
/// decoding their payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    CreateRoom,
    RoomCreated,
    JoinRoom,
    RoomJoined,
    PeerJoined,
    PeerDisconnected,
    Error,
    ChatMessage,
    FileInfo,
    FileChunk,
    FileComplete,
    FileAck,
    FileFailed,
}

const KINDS: [EnvelopeKind; 13] = [
    EnvelopeKind::CreateRoom,
    EnvelopeKind::RoomCreated,
    EnvelopeKind::JoinRoom,
    EnvelopeKind::RoomJoined,
    EnvelopeKind::PeerJoined,
    EnvelopeKind::PeerDisconnected,
    EnvelopeKind::Error,
    EnvelopeKind::ChatMessage,
    EnvelopeKind::FileInfo,
    EnvelopeKind::FileChunk,
    EnvelopeKind::FileComplete,
    EnvelopeKind::FileAck,
    EnvelopeKind::FileFailed,
];

impl EnvelopeKind {
    pub fn tag(self) -> &'static str {
        match self {
            EnvelopeKind::CreateRoom => "create-room",
            EnvelopeKind::RoomCreated => "room-created",
            EnvelopeKind::JoinRoom => "join-room",
            EnvelopeKind::RoomJoined => "room-joined",
            EnvelopeKind::PeerJoined => "peer-joined",
            EnvelopeKind::PeerDisconnected => "peer-disconnected",
            EnvelopeKind::Error => "error",
            EnvelopeKind::ChatMessage => "chat-message",
            EnvelopeKind::FileInfo => "file-info",
            EnvelopeKind::FileChunk => "file-chunk",
            EnvelopeKind::FileComplete => "file-complete",
            EnvelopeKind::FileAck => "file-ack",
            EnvelopeKind::FileFailed => "file-failed",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        KINDS.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Kinds the relay forwards verbatim to the counterpart
    pub fn is_peer_to_peer(self) -> bool {
        matches!(
            self,
            EnvelopeKind::ChatMessage
                | EnvelopeKind::FileInfo
                | EnvelopeKind::FileChunk
                | EnvelopeKind::FileComplete
                | EnvelopeKind::FileAck
                | EnvelopeKind::FileFailed
        )
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Routing view of a frame: the tag plus the room code for `join-room`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameHeader {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "roomId")]
    pub room_code: Option<String>,
}

impl FrameHeader {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Short, human transcribable room identifier, always upper case
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Normalize user input: surrounding whitespace dropped, upper-cased
    pub fn normalize(input: &str) -> Self {
        RoomCode(input.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}
