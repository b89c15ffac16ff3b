//! Incoming file handling
//!
//! Turns `file-info` / `file-chunk` / `file-complete` envelopes into
//! replies for the sender and events for the presentation layer.

use crate::events::{ProgressThrottle, SessionEvent, TransferDirection};
use dela_core::error::TransferError;
use dela_core::protocol::Envelope;
use dela_core::transfer::Reassembler;
use tracing::{debug, info, warn};

/// Side effect requested by an incoming envelope
#[derive(Debug)]
pub(crate) enum Effect {
    Reply(Envelope),
    Emit(SessionEvent),
}

#[derive(Debug, Default)]
pub(crate) struct IncomingFiles {
    reassembler: Reassembler,
    throttle: ProgressThrottle,
}

impl IncomingFiles {
    pub(crate) fn handle(&mut self, envelope: Envelope) -> Vec<Effect> {
        match envelope {
            Envelope::FileInfo {
                file_name,
                file_size,
                file_type,
                total_chunks,
            } => {
                info!(
                    "Receiving file: {} ({} bytes, {} chunks)",
                    file_name, file_size, total_chunks
                );
                let started = self
                    .reassembler
                    .on_file_info(&file_name, file_size, &file_type, total_chunks)
                    .map(|_| ());
                if let Err(e) = started {
                    warn!("{}", e);
                    return vec![Effect::Emit(SessionEvent::TransferFailed {
                        file_name,
                        direction: TransferDirection::Receiving,
                        reason: e.to_string(),
                    })];
                }
                self.throttle = ProgressThrottle::default();
                self.progress().into_iter().collect()
            }
            Envelope::FileChunk { chunk_index, data } => {
                let stored = self
                    .reassembler
                    .on_file_chunk(chunk_index, &data)
                    .map(|_| ());
                match stored {
                    Ok(()) => {
                        let mut effects = vec![Effect::Reply(Envelope::FileAck { chunk_index })];
                        effects.extend(self.progress());
                        effects
                    }
                    Err(TransferError::NoActiveTransfer) => {
                        debug!("Chunk {} arrived without file-info", chunk_index);
                        Vec::new()
                    }
                    Err(e) => {
                        warn!("Ignoring chunk: {}", e);
                        Vec::new()
                    }
                }
            }
            Envelope::FileComplete => match self.reassembler.on_file_complete() {
                None => {
                    debug!("file-complete without an active transfer");
                    Vec::new()
                }
                Some(Ok(file)) => {
                    info!("File received: {} ({} bytes)", file.file_name, file.data.len());
                    vec![Effect::Emit(SessionEvent::FileReceived(file))]
                }
                Some(Err(e)) => {
                    warn!("{}", e);
                    let reason = e.to_string();
                    let TransferError::Reassembly { file_name, missing } = e else {
                        return vec![Effect::Emit(SessionEvent::Error(reason))];
                    };
                    vec![
                        Effect::Reply(Envelope::FileFailed {
                            file_name: file_name.clone(),
                            missing_chunks: missing,
                        }),
                        Effect::Emit(SessionEvent::TransferFailed {
                            file_name,
                            direction: TransferDirection::Receiving,
                            reason,
                        }),
                    ]
                }
            },
            other => {
                debug!("Not a file envelope: {}", other.kind());
                Vec::new()
            }
        }
    }

    /// Drop an unfinished transfer; reports it if there was one
    pub(crate) fn abort(&mut self, reason: &str) -> Option<SessionEvent> {
        let file_name = self.reassembler.current()?.file_name().to_string();
        self.reassembler.discard();
        warn!("Discarding incoming {}: {}", file_name, reason);
        Some(SessionEvent::TransferFailed {
            file_name,
            direction: TransferDirection::Receiving,
            reason: reason.to_string(),
        })
    }

    fn progress(&mut self) -> Option<Effect> {
        let session = self.reassembler.current()?;
        let progress = session.progress();
        if !self.throttle.should_report(progress) {
            return None;
        }
        Some(Effect::Emit(SessionEvent::TransferProgress {
            file_name: session.file_name().to_string(),
            direction: TransferDirection::Receiving,
            progress,
        }))
    }
}
