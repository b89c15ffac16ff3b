/// Size of one file chunk before base64 encoding (64KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks a sender may have in flight without an acknowledgment
pub const TRANSFER_WINDOW: usize = 16;

/// How long a sender with a full window waits for the next ack (10 seconds)
pub const ACK_TIMEOUT_SECS: u64 = 10;

/// Announced when the caller does not know the file's type
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Maximum length of a saved file name in bytes
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Largest file a peer will send or accept (4GB)
pub const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Upper bound on the chunk count of an announced file
pub const MAX_TOTAL_CHUNKS: u32 = 1 << 20;
