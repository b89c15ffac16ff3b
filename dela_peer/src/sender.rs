use crate::connector::Link;
use crate::error::SessionError;
use crate::events::{ProgressThrottle, SessionEvent, TransferDirection};
use bytes::Bytes;
use dela_core::error::TransferError;
use dela_core::transfer::{DEFAULT_MIME_TYPE, FlowWindow, OutgoingTransfer};
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A file picked for sending
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl FileUpload {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Read a whole file from disk; the local path is never sent
    pub async fn from_path(path: &Path) -> Result<Self, SessionError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid file name"))?
            .to_string();
        let data = tokio::fs::read(path).await?;
        Ok(Self::new(file_name, DEFAULT_MIME_TYPE, data))
    }
}

/// Stream one file to the peer
///
/// Sends `file-info`, then chunks while the flow window has room, waiting
/// on `acks` whenever it is full. `file-complete` goes out right after the
/// last chunk without waiting for the remaining acks.
pub(crate) async fn send_file(
    upload: FileUpload,
    link: &Link,
    acks: &mut mpsc::UnboundedReceiver<u32>,
    window_size: usize,
    ack_timeout: Duration,
    event_tx: &mpsc::Sender<SessionEvent>,
) -> Result<(), SessionError> {
    let mut transfer = OutgoingTransfer::new(upload.file_name, upload.mime_type, upload.data)?;
    let file_name = transfer.file_name().to_string();
    info!(
        "Sending file: {} ({} bytes, {} chunks)",
        file_name,
        transfer.total_size(),
        transfer.total_chunks()
    );

    link.send(&transfer.file_info())?;

    let mut window = FlowWindow::new(window_size);
    let mut throttle = ProgressThrottle::default();
    report_progress(event_tx, &mut throttle, &file_name, transfer.progress()).await;

    while !transfer.is_finished() {
        while !window.has_capacity() {
            match tokio::time::timeout(ack_timeout, acks.recv()).await {
                Ok(Some(index)) => acknowledge(&mut window, index),
                Ok(None) => return Err(SessionError::NotConnected),
                Err(_) => return Err(TransferError::Stalled.into()),
            }
        }
        while let Ok(index) = acks.try_recv() {
            acknowledge(&mut window, index);
        }

        let index = transfer.sent_chunks();
        let Some(chunk) = transfer.next_chunk() else {
            break;
        };
        link.send(&chunk)?;
        window.record_sent(index);
        report_progress(event_tx, &mut throttle, &file_name, transfer.progress()).await;
    }

    link.send(&transfer.complete())?;
    info!("File sent: {} ({} chunks in flight)", file_name, window.in_flight());
    Ok(())
}

fn acknowledge(window: &mut FlowWindow, index: u32) {
    if !window.acknowledge(index) {
        debug!("Ignoring stale ack for chunk {}", index);
    }
}

async fn report_progress(
    event_tx: &mpsc::Sender<SessionEvent>,
    throttle: &mut ProgressThrottle,
    file_name: &str,
    progress: f32,
) {
    if throttle.should_report(progress) {
        let _ = event_tx
            .send(SessionEvent::TransferProgress {
                file_name: file_name.to_string(),
                direction: TransferDirection::Sending,
                progress,
            })
            .await;
    }
}
