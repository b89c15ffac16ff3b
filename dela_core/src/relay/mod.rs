//! Relay server
//!
//! Pairs two WebSocket connections per room and forwards peer envelopes
//! between them.

pub mod dispatcher;
pub mod handler;
pub mod liveness;
pub mod registry;
pub mod server;

pub use dispatcher::Dispatcher;
pub use handler::RelayState;
pub use liveness::LivenessMonitor;
pub use registry::{ConnectionId, Outbound, Registry, Role, Room};
pub use server::{create_router, run_relay, serve};
