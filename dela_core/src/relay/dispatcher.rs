//! Inbound frame dispatch
//!
//! Room requests go to the registry, peer payloads are forwarded verbatim to
//! the counterpart, everything else is answered with an `error` envelope.

use super::registry::{ConnectionId, Outbound, Registry};
use crate::error::ProtocolError;
use crate::protocol::{Envelope, EnvelopeKind, FrameHeader};
use axum::extract::ws::Utf8Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Handle one text frame received from `from`
    pub async fn dispatch(&self, from: ConnectionId, text: Utf8Bytes) {
        let header = match FrameHeader::parse(text.as_str()) {
            Ok(header) => header,
            Err(e) => {
                tracing::warn!("Invalid message format from {}: {}", from, e);
                self.reply_protocol_error(from, &e).await;
                return;
            }
        };

        match EnvelopeKind::from_tag(&header.kind) {
            Some(EnvelopeKind::CreateRoom) => self.create_room(from).await,
            Some(EnvelopeKind::JoinRoom) => match header.room_code {
                Some(code) => self.join_room(from, &code).await,
                None => {
                    self.reply_protocol_error(from, &ProtocolError::MissingField("roomCode"))
                        .await
                }
            },
            Some(kind) if kind.is_peer_to_peer() => {
                self.relay(from, text).await;
            }
            Some(kind) => {
                tracing::warn!("{} sent relay-only message type {}", from, kind);
                self.reply_protocol_error(from, &ProtocolError::UnexpectedType(header.kind))
                    .await;
            }
            None => {
                tracing::warn!("Unknown message type from {}: {}", from, header.kind);
                self.reply_protocol_error(from, &ProtocolError::UnknownType(header.kind))
                    .await;
            }
        }
    }

    /// Forward a frame unchanged to the other member of `from`'s room
    ///
    /// Dropped without notice when there is no room or no counterpart yet.
    pub async fn relay(&self, from: ConnectionId, frame: Utf8Bytes) -> bool {
        let delivered = self
            .registry
            .send_to_counterpart(from, Outbound::Relayed(frame))
            .await;
        if !delivered {
            tracing::debug!("Dropping frame from {}: no counterpart", from);
        }
        delivered
    }

    async fn create_room(&self, from: ConnectionId) {
        let reply = match self.registry.create_room(from).await {
            Ok(code) => Envelope::RoomCreated {
                room_code: code.into(),
            },
            Err(e) => {
                tracing::warn!("Create room failed for {}: {}", from, e);
                Envelope::room_error(&e)
            }
        };
        self.registry
            .send_to(from, Outbound::Envelope(reply))
            .await;
    }

    async fn join_room(&self, from: ConnectionId, code: &str) {
        // Success notifications are sent by the registry itself
        if let Err(e) = self.registry.join_room(code, from).await {
            tracing::warn!("Join room {} failed for {}: {}", code, from, e);
            self.registry
                .send_to(from, Outbound::Envelope(Envelope::room_error(&e)))
                .await;
        }
    }

    pub async fn reply_protocol_error(&self, to: ConnectionId, err: &ProtocolError) {
        self.registry
            .send_to(to, Outbound::Envelope(Envelope::protocol_error(err)))
            .await;
    }
}
