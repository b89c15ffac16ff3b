//! WebSocket connection handler
//!
//! One reader loop per connection feeds the dispatcher in receipt order; a
//! writer task drains the connection's FIFO queue into the socket. The
//! handler only returns once the writer is done, so a tracked handler
//! covers every queued frame.

use super::dispatcher::Dispatcher;
use super::registry::{ConnectionId, Outbound, Registry};
use crate::error::ProtocolError;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Shared relay state handed to every connection
pub struct RelayState {
    pub registry: Arc<Registry>,
    pub dispatcher: Dispatcher,
    /// Cancelled when the server shuts down
    pub shutdown: CancellationToken,
    /// Tracks connection tasks so shutdown can wait for queued frames to flush
    pub connections: TaskTracker,
    pub max_envelope_size: usize,
}

impl RelayState {
    pub fn new(
        registry: Arc<Registry>,
        shutdown: CancellationToken,
        max_envelope_size: usize,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry.clone()),
            registry,
            shutdown,
            connections: TaskTracker::new(),
            max_envelope_size,
        }
    }
}

/// Handle WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>, client_addr: String) {
    let (sender, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let terminate = CancellationToken::new();
    let id = state.registry.register(outbound_tx, terminate.clone()).await;

    tracing::info!("New client {} connected from {}", id, client_addr);

    let mut writer = tokio::spawn(write_outbound(id, sender, outbound_rx));
    let mut writer_done = false;

    loop {
        tokio::select! {
            // Writer gone: the transport failed
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            _ = terminate.cancelled() => {
                tracing::warn!("Terminating connection {}", id);
                writer.abort();
                break;
            }
            _ = state.shutdown.cancelled() => {
                tracing::debug!("Closing {} for shutdown", id);
                break;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.dispatcher.dispatch(id, text).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.registry.mark_alive(id).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        state
                            .dispatcher
                            .reply_protocol_error(id, &ProtocolError::BinaryFrame)
                            .await;
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // Answered by the websocket layer
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Client {} disconnected", id);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on {}: {}", id, e);
                        break;
                    }
                }
            }
        }
    }

    // Dropping the registry entry closes the queue; the writer flushes what
    // is left and then closes the socket. An aborted writer ends at once.
    state.registry.disconnect(id).await;
    if !writer_done {
        let _ = writer.await;
    }
}

async fn write_outbound(
    id: ConnectionId,
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let msg = match frame {
            Outbound::Envelope(envelope) => match envelope.encode() {
                Ok(text) => Message::Text(text.into()),
                Err(e) => {
                    tracing::error!("Cannot encode {} for {}: {}", envelope.kind(), id, e);
                    continue;
                }
            },
            Outbound::Relayed(text) => Message::Text(text),
            Outbound::Ping => Message::Ping(Bytes::new()),
        };
        if let Err(e) = sender.send(msg).await {
            tracing::debug!("Send to {} failed: {}", id, e);
            break;
        }
    }

    let _ = sender.close().await;
}
