//! Receiver side of a transfer

use super::constants::{CHUNK_SIZE, MAX_FILE_SIZE, MAX_TOTAL_CHUNKS};
use super::sender::total_chunks_for;
use crate::error::TransferError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Bytes, BytesMut};

/// A fully reassembled file, ready to be presented or saved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Slot-per-chunk buffer for one announced file
#[derive(Debug)]
pub struct IncomingTransfer {
    file_name: String,
    total_size: u64,
    mime_type: String,
    slots: Vec<Option<Bytes>>,
    received_count: u32,
}

impl IncomingTransfer {
    pub fn new(
        file_name: impl Into<String>,
        total_size: u64,
        mime_type: impl Into<String>,
        total_chunks: u32,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            total_size,
            mime_type: mime_type.into(),
            slots: vec![None; total_chunks as usize],
            received_count: 0,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_chunks(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn received_chunks(&self) -> u32 {
        self.received_count
    }

    /// Percentage of filled slots
    pub fn progress(&self) -> f32 {
        if self.slots.is_empty() {
            return 100.0;
        }
        (self.received_count as f32 / self.slots.len() as f32) * 100.0
    }

    /// Decode a base64 chunk and store it at `index`
    pub fn accept_chunk(&mut self, index: u32, data: &str) -> Result<(), TransferError> {
        self.check_index(index)?;
        let bytes = STANDARD
            .decode(data)
            .map_err(|_| TransferError::InvalidChunkData { index })?;
        self.store_chunk(index, Bytes::from(bytes))
    }

    /// Store raw bytes at `index`; a repeated index overwrites the slot
    pub fn store_chunk(&mut self, index: u32, bytes: Bytes) -> Result<(), TransferError> {
        self.check_index(index)?;
        let slot = &mut self.slots[index as usize];
        if slot.is_none() {
            self.received_count += 1;
        }
        *slot = Some(bytes);
        Ok(())
    }

    pub fn missing_chunks(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index as u32)
            .collect()
    }

    /// Concatenate all slots in index order
    ///
    /// Fails, producing nothing, if any slot is still empty.
    pub fn finish(self) -> Result<ReceivedFile, TransferError> {
        let missing = self.missing_chunks();
        if !missing.is_empty() {
            return Err(TransferError::Reassembly {
                file_name: self.file_name,
                missing,
            });
        }

        let len: usize = self.slots.iter().flatten().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(len);
        for chunk in self.slots.into_iter().flatten() {
            data.extend_from_slice(&chunk);
        }
        if data.len() as u64 != self.total_size {
            tracing::warn!(
                "{}: reassembled {} bytes, announced {}",
                self.file_name,
                data.len(),
                self.total_size
            );
        }

        Ok(ReceivedFile {
            file_name: self.file_name,
            mime_type: self.mime_type,
            data: data.freeze(),
        })
    }

    fn check_index(&self, index: u32) -> Result<(), TransferError> {
        if (index as usize) < self.slots.len() {
            Ok(())
        } else {
            Err(TransferError::ChunkOutOfRange {
                index,
                total_chunks: self.total_chunks(),
            })
        }
    }
}

/// Receiver session lifecycle across `file-info` / `file-chunk` /
/// `file-complete` envelopes
#[derive(Debug, Default)]
pub struct Reassembler {
    session: Option<IncomingTransfer>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn current(&self) -> Option<&IncomingTransfer> {
        self.session.as_ref()
    }

    /// Start a fresh session, replacing any unfinished one
    ///
    /// Checked before anything is allocated: the size must be within
    /// `MAX_FILE_SIZE`, the count within `MAX_TOTAL_CHUNKS`, and no chunk may
    /// be empty or larger than `CHUNK_SIZE`. A rejected announcement leaves
    /// no session.
    pub fn on_file_info(
        &mut self,
        file_name: &str,
        file_size: u64,
        mime_type: &str,
        total_chunks: u32,
    ) -> Result<&IncomingTransfer, TransferError> {
        if let Some(old) = self.session.take() {
            tracing::warn!(
                "Discarding unfinished transfer of {} ({}/{} chunks)",
                old.file_name(),
                old.received_chunks(),
                old.total_chunks()
            );
        }

        let fewest = total_chunks_for(file_size, CHUNK_SIZE);
        let plausible = file_size <= MAX_FILE_SIZE
            && total_chunks <= MAX_TOTAL_CHUNKS
            && fewest.is_some_and(|fewest| total_chunks >= fewest)
            && u64::from(total_chunks) <= file_size;
        if !plausible {
            return Err(TransferError::InvalidFileInfo {
                file_name: file_name.to_string(),
                file_size,
                total_chunks,
            });
        }

        Ok(self
            .session
            .insert(IncomingTransfer::new(file_name, file_size, mime_type, total_chunks)))
    }

    /// Store a chunk of the current session
    pub fn on_file_chunk(
        &mut self,
        index: u32,
        data: &str,
    ) -> Result<&IncomingTransfer, TransferError> {
        let session = self
            .session
            .as_mut()
            .ok_or(TransferError::NoActiveTransfer)?;
        session.accept_chunk(index, data)?;
        Ok(session)
    }

    /// Finish the current session; `None` when no `file-info` preceded it
    ///
    /// The session is dropped whatever the outcome.
    pub fn on_file_complete(&mut self) -> Option<Result<ReceivedFile, TransferError>> {
        self.session.take().map(IncomingTransfer::finish)
    }

    /// Drop the current session without output
    pub fn discard(&mut self) -> bool {
        self.session.take().is_some()
    }
}
