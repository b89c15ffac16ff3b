//! End-to-end relay tests over real WebSocket connections.

use dela_core::config::RelayConfig;
use dela_core::protocol::{Envelope, ErrorCode};
use dela_core::relay::serve;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestRelay {
    url: String,
    shutdown: CancellationToken,
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start_relay(config: RelayConfig) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(serve(listener, config, shutdown.clone()));
    TestRelay {
        url: format!("ws://{}/ws", addr),
        shutdown,
    }
}

/// Relay on its own runtime, dropped as soon as `serve` returns, the way the
/// binary exits after shutdown
fn start_relay_on_own_runtime(
    config: RelayConfig,
) -> (TestRelay, std::thread::JoinHandle<()>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    let thread = std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = TcpListener::from_std(listener).unwrap();
            serve(listener, config, token).await.unwrap();
        });
    });

    let relay = TestRelay {
        url: format!("ws://{}/ws", addr),
        shutdown,
    };
    (relay, thread)
}

async fn connect(relay: &TestRelay) -> Client {
    let (client, _) = connect_async(relay.url.as_str())
        .await
        .expect("Failed to connect");
    client
}

async fn send(client: &mut Client, envelope: &Envelope) {
    send_raw(client, &envelope.encode().unwrap()).await;
}

async fn send_raw(client: &mut Client, text: &str) {
    client
        .send(Message::Text(text.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame, skipping control frames
async fn recv_text(client: &mut Client) -> String {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Close(_))) | None => panic!("Connection closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("WebSocket error: {}", e),
            }
        }
    })
    .await
    .expect("Timeout waiting for frame")
}

async fn recv(client: &mut Client) -> Envelope {
    Envelope::decode(&recv_text(client).await).unwrap()
}

async fn create_room(client: &mut Client) -> String {
    send(client, &Envelope::CreateRoom).await;
    match recv(client).await {
        Envelope::RoomCreated { room_code } => room_code,
        other => panic!("Expected room-created, got {:?}", other),
    }
}

/// Host and guest in the same room
async fn pair(relay: &TestRelay) -> (Client, Client, String) {
    let mut host = connect(relay).await;
    let mut guest = connect(relay).await;
    let code = create_room(&mut host).await;

    send(
        &mut guest,
        &Envelope::JoinRoom {
            room_code: code.clone(),
        },
    )
    .await;
    assert_eq!(
        recv(&mut guest).await,
        Envelope::RoomJoined {
            room_code: code.clone()
        }
    );
    assert_eq!(recv(&mut host).await, Envelope::PeerJoined);
    (host, guest, code)
}

#[tokio::test]
async fn test_create_and_join_room() {
    let relay = start_relay(RelayConfig::default()).await;
    let mut host = connect(&relay).await;
    let code = create_room(&mut host).await;

    assert_eq!(code.len(), 6);
    assert!(
        code.chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
    );

    // Codes are typed by humans; case and padding do not matter
    let mut guest = connect(&relay).await;
    send_raw(
        &mut guest,
        &format!(r#"{{"type":"join-room","roomCode":"  {}  "}}"#, code.to_lowercase()),
    )
    .await;
    assert_eq!(
        recv(&mut guest).await,
        Envelope::RoomJoined {
            room_code: code.clone()
        }
    );
    assert_eq!(recv(&mut host).await, Envelope::PeerJoined);
}

#[tokio::test]
async fn test_join_unknown_room() {
    let relay = start_relay(RelayConfig::default()).await;
    let mut guest = connect(&relay).await;
    send(
        &mut guest,
        &Envelope::JoinRoom {
            room_code: "ZZZZZZ".to_string(),
        },
    )
    .await;

    match recv(&mut guest).await {
        Envelope::Error { code, .. } => assert_eq!(code, Some(ErrorCode::RoomNotFound)),
        other => panic!("Expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_third_client_gets_room_full() {
    let relay = start_relay(RelayConfig::default()).await;
    let (mut host, mut guest, code) = pair(&relay).await;

    let mut intruder = connect(&relay).await;
    send_raw(
        &mut intruder,
        &format!(r#"{{"type":"join-room","roomId":"{}"}}"#, code),
    )
    .await;
    match recv(&mut intruder).await {
        Envelope::Error { code, message } => {
            assert_eq!(code, Some(ErrorCode::RoomFull));
            assert_eq!(message, "Room is full");
        }
        other => panic!("Expected error, got {:?}", other),
    }

    // The existing pair is unaffected
    send(
        &mut host,
        &Envelope::ChatMessage {
            content: "still here".to_string(),
            timestamp: 1,
        },
    )
    .await;
    assert_eq!(
        recv(&mut guest).await,
        Envelope::ChatMessage {
            content: "still here".to_string(),
            timestamp: 1
        }
    );
}

#[tokio::test]
async fn test_frames_are_forwarded_verbatim_and_in_order() {
    let relay = start_relay(RelayConfig::default()).await;
    let (mut host, mut guest, _) = pair(&relay).await;

    let frames = [
        r#"{"type":"chat-message","content":"hello","timestamp":1700000000000}"#,
        r#"{"type":"file-info","fileName":"a.bin","fileSize":3,"fileType":"","totalChunks":3}"#,
        r#"{"type":"file-chunk","chunkIndex":0,"data":"AA=="}"#,
        r#"{"type":"file-chunk", "chunkIndex":1, "data":"AQ==", "extra":true}"#,
        r#"{"type":"file-chunk","chunkIndex":2,"data":"Ag=="}"#,
        r#"{"type":"file-complete"}"#,
    ];
    for frame in frames {
        send_raw(&mut host, frame).await;
    }
    for frame in frames {
        assert_eq!(recv_text(&mut guest).await, frame);
    }

    // And back the other way
    send_raw(&mut guest, r#"{"type":"file-ack","chunkIndex":2}"#).await;
    assert_eq!(
        recv(&mut host).await,
        Envelope::FileAck { chunk_index: 2 }
    );
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let relay = start_relay(RelayConfig::default()).await;
    let mut client = connect(&relay).await;

    for bad in ["not json", r#"{"content":"no type"}"#, r#"{"type":"teleport"}"#] {
        send_raw(&mut client, bad).await;
        match recv(&mut client).await {
            Envelope::Error { code, .. } => assert_eq!(code, Some(ErrorCode::Protocol)),
            other => panic!("Expected error for {:?}, got {:?}", bad, other),
        }
    }

    client
        .send(Message::Binary(vec![1, 2, 3].into()))
        .await
        .unwrap();
    match recv(&mut client).await {
        Envelope::Error { code, .. } => assert_eq!(code, Some(ErrorCode::Protocol)),
        other => panic!("Expected error, got {:?}", other),
    }

    // Still usable
    create_room(&mut client).await;
}

#[tokio::test]
async fn test_close_notifies_counterpart() {
    let relay = start_relay(RelayConfig::default()).await;
    let (mut host, mut guest, code) = pair(&relay).await;

    guest.close(None).await.unwrap();
    assert_eq!(recv(&mut host).await, Envelope::PeerDisconnected);

    // The room is gone
    let mut late = connect(&relay).await;
    send(&mut late, &Envelope::JoinRoom { room_code: code }).await;
    match recv(&mut late).await {
        Envelope::Error { code, .. } => assert_eq!(code, Some(ErrorCode::RoomNotFound)),
        other => panic!("Expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unresponsive_peer_is_reaped() {
    let config = RelayConfig {
        ping_interval: Duration::from_millis(200),
        ..RelayConfig::default()
    };
    let relay = start_relay(config).await;
    let (mut host, guest, _) = pair(&relay).await;

    // Never polled again, so pings go unanswered
    let _silent = guest;

    let envelope = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match host.next().await {
                Some(Ok(Message::Text(text))) => return Envelope::decode(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("Host connection ended: {:?}", other),
            }
        }
    })
    .await
    .expect("Guest was never reaped");
    assert_eq!(envelope, Envelope::PeerDisconnected);
}

#[tokio::test]
async fn test_shutdown_closes_connections() {
    let relay = start_relay(RelayConfig::default()).await;
    let mut client = connect(&relay).await;
    create_room(&mut client).await;

    relay.shutdown.cancel();
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "Client was not closed on shutdown");
}

#[tokio::test]
async fn test_reaped_connection_is_dropped_with_its_queue() {
    let config = RelayConfig {
        ping_interval: Duration::from_secs(1),
        ..RelayConfig::default()
    };
    let relay = start_relay(config).await;
    let (mut host, mut guest, _) = pair(&relay).await;

    // The guest stops reading while far more than the socket buffers can hold
    // piles up in its queue
    let content = "x".repeat(1024 * 1024);
    for timestamp in 0..40 {
        send(
            &mut host,
            &Envelope::ChatMessage {
                content: content.clone(),
                timestamp,
            },
        )
        .await;
    }
    let envelope = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match host.next().await {
                Some(Ok(Message::Text(text))) => return Envelope::decode(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("Host connection ended: {:?}", other),
            }
        }
    })
    .await
    .expect("Guest was never reaped");
    assert_eq!(envelope, Envelope::PeerDisconnected);

    // Whatever was already in flight drains, then the stream ends
    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        let mut delivered = 0;
        loop {
            match guest.next().await {
                Some(Ok(Message::Text(_))) => delivered += 1,
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return delivered,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("Reaped connection was left open");
    assert!(delivered < 40, "all {} queued frames were delivered", delivered);
}

#[tokio::test]
async fn test_shutdown_flushes_queued_frames() {
    let (relay, thread) = start_relay_on_own_runtime(RelayConfig::default());
    let (mut host, mut guest, _) = pair(&relay).await;

    let content = "y".repeat(1024 * 1024);
    for timestamp in 0..20 {
        send(
            &mut host,
            &Envelope::ChatMessage {
                content: content.clone(),
                timestamp,
            },
        )
        .await;
    }
    // Frames are dispatched in order, so once this error comes back every
    // chat above sits in the guest's queue
    send_raw(&mut host, "not json").await;
    assert!(matches!(recv(&mut host).await, Envelope::Error { .. }));

    relay.shutdown.cancel();

    let mut timestamps = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match guest.next().await {
                Some(Ok(Message::Text(text))) => {
                    let envelope = Envelope::decode(&text).unwrap();
                    if let Envelope::ChatMessage { timestamp, .. } = envelope {
                        timestamps.push(timestamp);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "Guest was not closed after shutdown");
    assert_eq!(timestamps, (0..20).collect::<Vec<u64>>());

    tokio::task::spawn_blocking(move || thread.join().unwrap())
        .await
        .unwrap();
}
