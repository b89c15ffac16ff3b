//! Sender side of a transfer

use super::constants::{CHUNK_SIZE, MAX_FILE_SIZE, MAX_TOTAL_CHUNKS};
use crate::error::TransferError;
use crate::protocol::Envelope;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use std::collections::BTreeSet;

/// `ceil(size / chunk_size)`, or `None` when the count does not fit the wire format
pub fn total_chunks_for(size: u64, chunk_size: usize) -> Option<u32> {
    let chunk_size = chunk_size.max(1) as u64;
    u32::try_from(size.div_ceil(chunk_size)).ok()
}

/// Splits one file into the envelope sequence
/// `file-info`, `file-chunk` × n, `file-complete`
#[derive(Debug)]
pub struct OutgoingTransfer {
    file_name: String,
    mime_type: String,
    data: Bytes,
    chunk_size: usize,
    total_chunks: u32,
    next_chunk_index: u32,
}

impl OutgoingTransfer {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Bytes,
    ) -> Result<Self, TransferError> {
        Self::with_chunk_size(file_name, mime_type, data, CHUNK_SIZE)
    }

    pub fn with_chunk_size(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Bytes,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        let chunk_size = chunk_size.max(1);
        let size = data.len() as u64;
        let total_chunks = total_chunks_for(size, chunk_size)
            .filter(|&n| size <= MAX_FILE_SIZE && n <= MAX_TOTAL_CHUNKS)
            .ok_or(TransferError::FileTooLarge(size))?;
        Ok(Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
            chunk_size,
            total_chunks,
            next_chunk_index: 0,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn sent_chunks(&self) -> u32 {
        self.next_chunk_index
    }

    /// Percentage of chunks emitted so far
    pub fn progress(&self) -> f32 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        (self.next_chunk_index as f32 / self.total_chunks as f32) * 100.0
    }

    pub fn is_finished(&self) -> bool {
        self.next_chunk_index >= self.total_chunks
    }

    /// The announcement sent before any chunk
    pub fn file_info(&self) -> Envelope {
        Envelope::FileInfo {
            file_name: self.file_name.clone(),
            file_size: self.total_size(),
            file_type: self.mime_type.clone(),
            total_chunks: self.total_chunks,
        }
    }

    /// Next `file-chunk` in index order, `None` once all were emitted
    pub fn next_chunk(&mut self) -> Option<Envelope> {
        if self.is_finished() {
            return None;
        }
        let index = self.next_chunk_index;
        let start = index as usize * self.chunk_size;
        let end = (start + self.chunk_size).min(self.data.len());
        self.next_chunk_index += 1;

        Some(Envelope::FileChunk {
            chunk_index: index,
            data: STANDARD.encode(&self.data[start..end]),
        })
    }

    /// Terminal envelope; consumes the transfer
    pub fn complete(self) -> Envelope {
        Envelope::FileComplete
    }
}

/// Bounded set of chunks sent but not yet acknowledged
#[derive(Debug)]
pub struct FlowWindow {
    capacity: usize,
    in_flight: BTreeSet<u32>,
}

impl FlowWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_flight: BTreeSet::new(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.capacity
    }

    pub fn record_sent(&mut self, index: u32) {
        self.in_flight.insert(index);
    }

    /// Returns false for duplicate or unknown acks
    pub fn acknowledge(&mut self, index: u32) -> bool {
        self.in_flight.remove(&index)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_parts(envelope: &Envelope) -> (u32, Vec<u8>) {
        match envelope {
            Envelope::FileChunk { chunk_index, data } => {
                (*chunk_index, STANDARD.decode(data).unwrap())
            }
            other => panic!("Expected file-chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_total_chunks() {
        assert_eq!(total_chunks_for(0, CHUNK_SIZE), Some(0));
        assert_eq!(total_chunks_for(1, CHUNK_SIZE), Some(1));
        assert_eq!(total_chunks_for(CHUNK_SIZE as u64, CHUNK_SIZE), Some(1));
        assert_eq!(total_chunks_for(CHUNK_SIZE as u64 + 1, CHUNK_SIZE), Some(2));
        assert_eq!(total_chunks_for(10 * 1024 * 1024, CHUNK_SIZE), Some(160));
        assert_eq!(total_chunks_for(10 * 1024 * 1024 + 1, CHUNK_SIZE), Some(161));
        assert_eq!(total_chunks_for(u64::MAX, 1), None);
    }

    #[test]
    fn test_chunks_cover_file_in_order() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut transfer =
            OutgoingTransfer::with_chunk_size("a.bin", "", Bytes::from(data.clone()), 4096)
                .unwrap();
        assert_eq!(transfer.total_chunks(), 3);

        let mut rebuilt = Vec::new();
        let mut expected_index = 0;
        while let Some(chunk) = transfer.next_chunk() {
            let (index, bytes) = chunk_parts(&chunk);
            assert_eq!(index, expected_index);
            expected_index += 1;
            rebuilt.extend(bytes);
        }
        assert_eq!(rebuilt, data);
        assert!(transfer.is_finished());
        assert_eq!(transfer.progress(), 100.0);
        assert_eq!(transfer.complete(), Envelope::FileComplete);
    }

    #[test]
    fn test_file_info_announces_totals() {
        let transfer =
            OutgoingTransfer::new("report.pdf", "application/pdf", Bytes::from(vec![7u8; 70_000]))
                .unwrap();
        assert_eq!(
            transfer.file_info(),
            Envelope::FileInfo {
                file_name: "report.pdf".to_string(),
                file_size: 70_000,
                file_type: "application/pdf".to_string(),
                total_chunks: 2,
            }
        );
        assert_eq!(transfer.progress(), 0.0);
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let mut transfer = OutgoingTransfer::new("empty.txt", "text/plain", Bytes::new()).unwrap();
        assert_eq!(transfer.total_chunks(), 0);
        assert!(transfer.next_chunk().is_none());
        assert_eq!(transfer.progress(), 100.0);
    }

    #[test]
    fn test_progress_counts_emitted_chunks() {
        let mut transfer =
            OutgoingTransfer::with_chunk_size("a", "", Bytes::from(vec![0u8; 40]), 10).unwrap();
        transfer.next_chunk();
        assert_eq!(transfer.sent_chunks(), 1);
        assert_eq!(transfer.progress(), 25.0);
    }

    #[test]
    fn test_flow_window() {
        let mut window = FlowWindow::new(2);
        assert!(window.has_capacity());
        window.record_sent(0);
        window.record_sent(1);
        assert!(!window.has_capacity());

        assert!(!window.acknowledge(7));
        assert!(window.acknowledge(1));
        assert!(!window.acknowledge(1));
        assert!(window.has_capacity());
        assert_eq!(window.in_flight(), 1);

        // Zero capacity would never send anything
        assert!(FlowWindow::new(0).has_capacity());
    }
}
