//! Connection state of one peer session

use crate::events::SessionState;

/// Everything that can move a session between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateInput {
    TransportOpened,
    RoomJoined,
    PeerJoined,
    PeerDisconnected,
    TransportClosed,
    LocalDisconnect,
}

#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Apply an input; returns the new state if it changed
    pub fn apply(&mut self, input: StateInput) -> Option<SessionState> {
        use SessionState::*;
        use StateInput::*;

        let next = match (self.state, input) {
            (Disconnected, TransportOpened) => Connecting,
            (Connecting, RoomJoined | PeerJoined) => Connected,
            (Connecting | Connected, PeerDisconnected | TransportClosed | LocalDisconnect) => {
                Disconnected
            }
            _ => return None,
        };

        tracing::debug!("Session {} -> {} on {:?}", self.state, next, input);
        self.state = next;
        Some(next)
    }
}
