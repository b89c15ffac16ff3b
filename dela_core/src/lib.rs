//! Relay and transfer core for Dela
//!
//! Two peers share a room code, pair up through the relay and exchange chat
//! messages and a file. This crate holds the envelope protocol, the relay
//! server and the chunked transfer state machines used by both ends.

pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod transfer;

pub use config::RelayConfig;
pub use error::{ProtocolError, RoomError, TransferError};
pub use protocol::{Envelope, EnvelopeKind, ErrorCode, RoomCode};
