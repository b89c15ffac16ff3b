//! Peer session: one room, one counterpart
//!
//! A [`Session`] owns at most one relay connection at a time. Every
//! create/join opens a fresh one. Incoming frames are handled by a reader
//! task and surface as [`SessionEvent`]s on the channel returned by
//! [`Session::new`].

use crate::config::PeerConfig;
use crate::connector::{self, Link, RelayStream};
use crate::error::SessionError;
use crate::events::{
    ChatMessage, MessageSender, SessionEvent, SessionState, TransferDirection, now_millis,
};
use crate::receiver::{Effect, IncomingFiles};
use crate::sender::{self, FileUpload};
use crate::state::{SessionStateMachine, StateInput};
use dela_core::error::{RoomError, TransferError};
use dela_core::protocol::{Envelope, RoomCode};
use dela_core::relay::Role;
use futures_util::StreamExt;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    config: PeerConfig,
    event_tx: mpsc::Sender<SessionEvent>,
    data: Mutex<SessionData>,
}

struct SessionData {
    machine: SessionStateMachine,
    role: Role,
    room_code: Option<RoomCode>,
    messages: Vec<ChatMessage>,
    link: Option<Link>,
    /// Bumped whenever the link is replaced or dropped so stale reader
    /// tasks and requests can tell they are outdated
    generation: u64,
    pending: Option<oneshot::Sender<Envelope>>,
    outgoing_acks: Option<mpsc::UnboundedSender<u32>>,
    incoming: IncomingFiles,
}

impl SessionData {
    fn new() -> Self {
        Self {
            machine: SessionStateMachine::new(),
            role: Role::Unassigned,
            room_code: None,
            messages: Vec::new(),
            link: None,
            generation: 0,
            pending: None,
            outgoing_acks: None,
            incoming: IncomingFiles::default(),
        }
    }

    fn apply(&mut self, input: StateInput, events: &mut Vec<SessionEvent>) {
        let Some(state) = self.machine.apply(input) else {
            return;
        };
        if state == SessionState::Disconnected {
            let reason = match input {
                StateInput::PeerDisconnected => "Peer disconnected",
                StateInput::TransportClosed => "Connection to relay closed",
                _ => "Session closed",
            };
            self.release(reason, events);
        }
        events.push(SessionEvent::StateChanged(state));
    }

    /// Drop everything tied to the current link
    fn release(&mut self, reason: &str, events: &mut Vec<SessionEvent>) {
        self.generation += 1;
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.pending = None;
        self.outgoing_acks = None;
        self.role = Role::Unassigned;
        self.room_code = None;
        events.extend(self.incoming.abort(reason));
    }

    fn connected_link(&self) -> Result<Link, SessionError> {
        match &self.link {
            Some(link) if self.machine.is_connected() => Ok(link.clone()),
            _ => Err(SessionError::NotConnected),
        }
    }
}

impl Session {
    /// Create an idle session and the receiver for its events
    ///
    /// The receiver must be drained: incoming frames are not processed
    /// while the channel is full.
    pub fn new(config: PeerConfig) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let inner = Arc::new(Inner {
            config,
            event_tx,
            data: Mutex::new(SessionData::new()),
        });
        (Self { inner }, event_rx)
    }

    /// Open a room as host and return its code
    ///
    /// The session stays `Connecting` until a guest joins.
    pub async fn create_room(&self) -> Result<RoomCode, SessionError> {
        let (generation, reply) = self.request(Envelope::CreateRoom, None).await?;
        match reply {
            Envelope::RoomCreated { room_code } => Ok(RoomCode::normalize(&room_code)),
            other => Err(self.reject(generation, other).await),
        }
    }

    /// Join the room `code` as guest; the code is case-insensitive
    pub async fn join_room(&self, code: &str) -> Result<(), SessionError> {
        let code = RoomCode::normalize(code);
        let request = Envelope::JoinRoom {
            room_code: code.to_string(),
        };
        let (generation, reply) = self.request(request, Some(code)).await?;
        match reply {
            Envelope::RoomJoined { .. } => Ok(()),
            other => Err(self.reject(generation, other).await),
        }
    }

    pub async fn send_message(
        &self,
        content: impl Into<String>,
    ) -> Result<ChatMessage, SessionError> {
        let message = ChatMessage {
            content: content.into(),
            timestamp: now_millis(),
            sender: MessageSender::Local,
        };

        {
            let mut data = self.inner.data.lock().await;
            data.connected_link()?.send(&Envelope::ChatMessage {
                content: message.content.clone(),
                timestamp: message.timestamp,
            })?;
            data.messages.push(message.clone());
        }

        self.inner
            .emit(vec![SessionEvent::Message(message.clone())])
            .await;
        Ok(message)
    }

    /// Send one file; resolves once `file-complete` has been queued
    ///
    /// Only one outgoing transfer runs at a time.
    pub async fn send_file(&self, upload: FileUpload) -> Result<(), SessionError> {
        let (link, mut acks, generation) = {
            let mut data = self.inner.data.lock().await;
            let link = data.connected_link()?;
            if data.outgoing_acks.is_some() {
                return Err(TransferError::Busy.into());
            }
            let (ack_tx, ack_rx) = mpsc::unbounded_channel();
            data.outgoing_acks = Some(ack_tx);
            (link, ack_rx, data.generation)
        };

        let file_name = upload.file_name.clone();
        let config = &self.inner.config;
        let result = sender::send_file(
            upload,
            &link,
            &mut acks,
            config.transfer_window,
            config.ack_timeout,
            &self.inner.event_tx,
        )
        .await;

        {
            let mut data = self.inner.data.lock().await;
            if data.generation == generation {
                data.outgoing_acks = None;
            }
        }

        if let Err(e) = &result {
            warn!("Sending {} failed: {}", file_name, e);
            self.inner
                .emit(vec![SessionEvent::TransferFailed {
                    file_name,
                    direction: TransferDirection::Sending,
                    reason: e.to_string(),
                }])
                .await;
        }
        result
    }

    /// Chat history of the current room, oldest first
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.inner.data.lock().await.messages.clone()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.data.lock().await.machine.state()
    }

    pub async fn role(&self) -> Role {
        self.inner.data.lock().await.role
    }

    pub async fn room_code(&self) -> Option<RoomCode> {
        self.inner.data.lock().await.room_code.clone()
    }

    /// Leave the room and close the relay connection
    pub async fn disconnect(&self) {
        let mut events = Vec::new();
        self.inner
            .data
            .lock()
            .await
            .apply(StateInput::LocalDisconnect, &mut events);
        self.inner.emit(events).await;
    }

    /// Open a fresh link, send `request` and wait for the relay's answer
    async fn request(
        &self,
        request: Envelope,
        room_code: Option<RoomCode>,
    ) -> Result<(u64, Envelope), SessionError> {
        self.disconnect().await;

        let config = &self.inner.config;
        let (link, stream) = connector::connect(&config.relay_url, config.request_timeout).await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let mut events = Vec::new();
        let generation = {
            let mut data = self.inner.data.lock().await;
            data.generation += 1;
            data.link = Some(link.clone());
            data.pending = Some(reply_tx);
            data.room_code = room_code;
            data.messages.clear();
            data.apply(StateInput::TransportOpened, &mut events);
            data.generation
        };
        tokio::spawn(read_frames(Arc::downgrade(&self.inner), generation, stream));
        self.inner.emit(events).await;

        if let Err(e) = link.send(&request) {
            self.abandon(generation).await;
            return Err(e);
        }

        match tokio::time::timeout(config.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok((generation, reply)),
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => {
                warn!("No answer to {} within {:?}", request.kind(), config.request_timeout);
                self.abandon(generation).await;
                Err(SessionError::Timeout)
            }
        }
    }

    async fn reject(&self, generation: u64, reply: Envelope) -> SessionError {
        self.abandon(generation).await;
        match reply {
            Envelope::Error {
                message,
                code: Some(code),
            } => match RoomError::from_code(code) {
                Some(err) => SessionError::Room(err),
                None => SessionError::Relay(message),
            },
            Envelope::Error { message, .. } => SessionError::Relay(message),
            other => SessionError::UnexpectedReply(other.kind().to_string()),
        }
    }

    /// Drop the link opened for a request that did not succeed
    async fn abandon(&self, generation: u64) {
        let mut events = Vec::new();
        {
            let mut data = self.inner.data.lock().await;
            if data.generation == generation {
                data.apply(StateInput::LocalDisconnect, &mut events);
            }
        }
        self.inner.emit(events).await;
    }
}

impl Inner {
    async fn emit(&self, events: Vec<SessionEvent>) {
        for event in events {
            let _ = self.event_tx.send(event).await;
        }
    }

    /// Returns false once the link this reader belongs to is outdated
    async fn handle_envelope(&self, generation: u64, envelope: Envelope) -> bool {
        let mut events = Vec::new();
        {
            let mut data = self.data.lock().await;
            if data.generation != generation {
                return false;
            }

            match envelope {
                Envelope::RoomCreated { room_code } => match data.pending.take() {
                    Some(reply) => {
                        info!("Room {} created, waiting for a guest", room_code);
                        data.role = Role::Host;
                        data.room_code = Some(RoomCode::normalize(&room_code));
                        let _ = reply.send(Envelope::RoomCreated { room_code });
                    }
                    None => debug!("Unsolicited room-created"),
                },
                Envelope::RoomJoined { room_code } => match data.pending.take() {
                    Some(reply) => {
                        info!("Joined room {}", room_code);
                        data.role = Role::Guest;
                        if !room_code.is_empty() {
                            data.room_code = Some(RoomCode::normalize(&room_code));
                        }
                        data.apply(StateInput::RoomJoined, &mut events);
                        let _ = reply.send(Envelope::RoomJoined { room_code });
                    }
                    None => debug!("Unsolicited room-joined"),
                },
                Envelope::Error { message, code } => match data.pending.take() {
                    Some(reply) => {
                        let _ = reply.send(Envelope::Error { message, code });
                    }
                    None => {
                        warn!("Relay error: {}", message);
                        events.push(SessionEvent::Error(message));
                    }
                },
                Envelope::PeerJoined => {
                    info!("Peer joined the room");
                    data.apply(StateInput::PeerJoined, &mut events);
                }
                Envelope::PeerDisconnected => {
                    info!("Peer disconnected");
                    data.apply(StateInput::PeerDisconnected, &mut events);
                }
                Envelope::ChatMessage { content, timestamp } => {
                    let message = ChatMessage {
                        content,
                        timestamp,
                        sender: MessageSender::Peer,
                    };
                    data.messages.push(message.clone());
                    events.push(SessionEvent::Message(message));
                }
                Envelope::FileAck { chunk_index } => match &data.outgoing_acks {
                    Some(acks) => {
                        let _ = acks.send(chunk_index);
                    }
                    None => debug!("Ack for chunk {} without a transfer", chunk_index),
                },
                Envelope::FileFailed {
                    file_name,
                    missing_chunks,
                } => {
                    let err = TransferError::Reassembly {
                        file_name: file_name.clone(),
                        missing: missing_chunks,
                    };
                    warn!("Peer rejected file: {}", err);
                    events.push(SessionEvent::TransferFailed {
                        file_name,
                        direction: TransferDirection::Sending,
                        reason: err.to_string(),
                    });
                }
                envelope @ (Envelope::FileInfo { .. }
                | Envelope::FileChunk { .. }
                | Envelope::FileComplete) => {
                    for effect in data.incoming.handle(envelope) {
                        match effect {
                            Effect::Reply(reply) => {
                                if let Some(link) = &data.link {
                                    let _ = link.send(&reply);
                                }
                            }
                            Effect::Emit(event) => events.push(event),
                        }
                    }
                }
                other @ (Envelope::CreateRoom | Envelope::JoinRoom { .. }) => {
                    debug!("Ignoring {} from relay", other.kind());
                }
            }
        }
        self.emit(events).await;
        true
    }

    async fn transport_closed(&self, generation: u64) {
        let mut events = Vec::new();
        {
            let mut data = self.data.lock().await;
            if data.generation == generation {
                info!("Relay connection closed");
                data.apply(StateInput::TransportClosed, &mut events);
            }
        }
        self.emit(events).await;
    }
}

async fn read_frames(inner: Weak<Inner>, generation: u64, mut stream: RelayStream) {
    while let Some(frame) = stream.next().await {
        let Some(session) = inner.upgrade() else {
            return;
        };
        match frame {
            Ok(Message::Text(text)) => match Envelope::decode(text.as_str()) {
                Ok(envelope) => {
                    if !session.handle_envelope(generation, envelope).await {
                        return;
                    }
                }
                Err(e) => warn!("Dropping malformed frame from relay: {}", e),
            },
            Ok(Message::Close(_)) => break,
            // Pings are answered by tungstenite
            Ok(_) => {}
            Err(e) => {
                debug!("Relay connection error: {}", e);
                break;
            }
        }
    }

    if let Some(session) = inner.upgrade() {
        session.transport_closed(generation).await;
    }
}
