//! WebSocket link to the relay

use crate::error::SessionError;
use dela_core::protocol::Envelope;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};
use url::Url;

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Incoming half of a relay connection
pub(crate) type RelayStream = SplitStream<RelaySocket>;

/// Outgoing half of a relay connection
///
/// Frames are queued and written in order by a dedicated task. The socket
/// closes once `close` is called or every clone is dropped.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    outbound: mpsc::UnboundedSender<Message>,
}

impl Link {
    pub(crate) fn send(&self, envelope: &Envelope) -> Result<(), SessionError> {
        let text = envelope.encode()?;
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| SessionError::NotConnected)
    }

    pub(crate) fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}

/// Open a fresh relay connection, giving up after `timeout`
pub(crate) async fn connect(
    url: &Url,
    timeout: Duration,
) -> Result<(Link, RelayStream), SessionError> {
    info!("Connecting to relay {}", url);
    let (socket, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| SessionError::Timeout)??;

    let (sink, stream) = socket.split();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_frames(sink, outbound_rx));

    debug!("Relay connection to {} established", url);
    Ok((Link { outbound }, stream))
}

async fn write_frames(
    mut sink: SplitSink<RelaySocket, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            debug!("Relay write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }

    let _ = sink.close().await;
}
