//! Chunked file transfer over relayed envelopes
//!
//! The sender announces a file with `file-info`, streams base64 chunks
//! tagged with their index and finishes with `file-complete`. The receiver
//! stores chunks by index, so arrival order does not matter, and only
//! produces output once every slot is filled.

pub mod constants;
pub mod receiver;
pub mod sender;
pub mod utils;

pub use constants::{
    ACK_TIMEOUT_SECS, CHUNK_SIZE, DEFAULT_MIME_TYPE, MAX_FILE_SIZE, MAX_TOTAL_CHUNKS,
    TRANSFER_WINDOW,
};
pub use receiver::{IncomingTransfer, Reassembler, ReceivedFile};
pub use sender::{FlowWindow, OutgoingTransfer, total_chunks_for};
pub use utils::sanitize_file_name;
