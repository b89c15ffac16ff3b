//! Peer-side settings

use dela_core::transfer::{ACK_TIMEOUT_SECS, TRANSFER_WINDOW};
use std::time::Duration;
use url::Url;

/// How long create/join wait for the relay's answer (5 seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Capacity of the session event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// WebSocket endpoint of the relay, e.g. `ws://relay.example:3000/ws`
    pub relay_url: Url,
    pub request_timeout: Duration,
    /// Unacknowledged chunks allowed in flight
    pub transfer_window: usize,
    pub ack_timeout: Duration,
    pub event_capacity: usize,
}

impl PeerConfig {
    /// Accepts `ws`/`wss` URLs as well as the page URL the web client is
    /// served from (`http://host:port/`), which maps to `ws://host:port/ws`
    pub fn new(relay_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            relay_url: websocket_url(relay_url)?,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            transfer_window: TRANSFER_WINDOW,
            ack_timeout: Duration::from_secs(ACK_TIMEOUT_SECS),
            event_capacity: EVENT_CHANNEL_CAPACITY,
        })
    }
}

fn websocket_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw.trim())?;

    let scheme = match url.scheme() {
        "http" => Some("ws"),
        "https" => Some("wss"),
        _ => None,
    };
    if let Some(scheme) = scheme {
        // Only fails for cannot-be-a-base URLs, which http ones never are
        let _ = url.set_scheme(scheme);
        if url.path() == "/" || url.path().is_empty() {
            url.set_path("/ws");
        }
    }
    Ok(url)
}
