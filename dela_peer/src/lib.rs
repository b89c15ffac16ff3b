//! Peer side of a Dela session
//!
//! Connects to a relay, creates or joins a room and exchanges chat
//! messages and files with the single counterpart in that room.

pub mod config;
mod connector;
pub mod error;
pub mod events;
mod receiver;
pub mod sender;
pub mod session;
pub mod state;

pub use config::PeerConfig;
pub use error::SessionError;
pub use events::{ChatMessage, MessageSender, SessionEvent, SessionState, TransferDirection};
pub use sender::FileUpload;
pub use session::Session;
pub use state::{SessionStateMachine, StateInput};
