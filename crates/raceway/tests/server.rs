//! Integration tests for the Raceway server over real WebSocket sockets.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use raceway::prelude::*;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    addr: String,
    rooms: Vec<RoomId>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), RacewayError>>,
}

fn room(name: &str, visible: bool) -> RoomConfig {
    RoomConfig {
        name: name.to_string(),
        visible,
        ..RoomConfig::default()
    }
}

/// Starts a server on a random port with the given rooms.
async fn start_server(rooms: Vec<RoomConfig>) -> TestServer {
    let mut builder = RacewayServer::builder().bind("127.0.0.1:0");
    for config in rooms {
        builder = builder.room(config);
    }
    let server = builder.build().await.expect("server should build");
    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let rooms = server.room_ids().await;

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async {
        let _ = stopped.await;
    }));

    TestServer {
        addr,
        rooms,
        stop,
        task,
    }
}

async fn connect(addr: &str, path: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}{path}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, frame: ClientFrame) {
    let bytes = frame.encode(&JsonCodec).expect("encode");
    ws.send(Message::Binary(bytes.into())).await.expect("send");
}

async fn handshake(ws: &mut ClientWs, version: f32) {
    send(
        ws,
        ClientFrame::Connect(Some(ClientInfo {
            version,
            is_testing: false,
        })),
    )
    .await;
}

/// Next message of any kind, failing after two seconds.
async fn next_message(ws: &mut ClientWs) -> Message {
    tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for message")
        .expect("stream ended")
        .expect("websocket error")
}

/// Reads server frames until one matches.
async fn wait_for(ws: &mut ClientWs, pred: impl Fn(&ServerFrame) -> bool) -> ServerFrame {
    loop {
        match next_message(ws).await {
            Message::Binary(data) => {
                let frame = ServerFrame::decode(&JsonCodec, &data).expect("decode");
                if pred(&frame) {
                    return frame;
                }
            }
            Message::Close(frame) => panic!("closed while waiting: {frame:?}"),
            _ => {}
        }
    }
}

/// Reads until the close frame and returns its reason.
async fn close_reason(ws: &mut ClientWs) -> String {
    loop {
        if let Message::Close(frame) = next_message(ws).await {
            return frame.map(|f| f.reason.to_string()).unwrap_or_default();
        }
    }
}

/// Connects, handshakes and joins as `name`.
async fn join(addr: &str, path: &str, name: &str) -> (ClientWs, ClientId) {
    let mut ws = connect(addr, path).await;
    handshake(&mut ws, 0.91).await;
    wait_for(&mut ws, |f| matches!(f, ServerFrame::Connect(_))).await;

    let id = ClientId::random();
    send(
        &mut ws,
        ClientFrame::matched(MatchMessage::ClientJoined {
            client_id: id,
            name: name.to_string(),
        }),
    )
    .await;
    wait_for(&mut ws, |f| {
        matches!(f, ServerFrame::Match { message: MatchMessage::ClientJoined { client_id, .. }, .. } if *client_id == id)
    })
    .await;
    (ws, id)
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_room_list_shows_visible_rooms() {
    let server = start_server(vec![room("Main", true), room("Secret", false)]).await;
    let mut ws = connect(&server.addr, "/rooms").await;

    let listing: Vec<RoomListEntry> = match next_message(&mut ws).await {
        Message::Binary(data) => serde_json::from_slice(&data).expect("listing json"),
        other => panic!("expected listing, got {other:?}"),
    };
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "Main");
    assert_eq!(listing[0].id, server.rooms[0]);
    assert!(!listing[0].in_game);
    assert_eq!(close_reason(&mut ws).await, "Room list sent");
}

#[tokio::test]
async fn test_join_and_chat() {
    let server = start_server(vec![room("Main", true)]).await;
    let path = format!("/rooms/{}", server.rooms[0].0);

    let (mut alice, _) = join(&server.addr, &path, "Alice").await;
    let (mut bob, _) = join(&server.addr, &path, "Bob").await;

    send(
        &mut alice,
        ClientFrame::matched(MatchMessage::Chat {
            from: String::new(),
            kind: ChatKind::Player,
            text: "hello".into(),
        }),
    )
    .await;

    let frame = wait_for(&mut bob, |f| {
        matches!(f, ServerFrame::Match { message: MatchMessage::Chat { kind: ChatKind::Player, .. }, .. })
    })
    .await;
    match frame {
        ServerFrame::Match {
            message: MatchMessage::Chat { from, text, .. },
            ..
        } => {
            assert_eq!(from, "Alice");
            assert_eq!(text, "hello");
        }
        other => panic!("expected chat, got {other:?}"),
    }
}

#[tokio::test]
async fn test_snapshot_lists_existing_clients() {
    let server = start_server(vec![room("Main", true)]).await;
    let (_alice, alice_id) = join(&server.addr, "/", "Alice").await;

    let mut ws = connect(&server.addr, "/").await;
    handshake(&mut ws, 0.91).await;
    let frame = wait_for(&mut ws, |f| matches!(f, ServerFrame::Connect(_))).await;
    let ServerFrame::Connect(state) = frame else {
        unreachable!()
    };
    assert_eq!(state.clients.len(), 1);
    assert_eq!(state.clients[0].client_id, alice_id);
    assert!(!state.in_race);
}

#[tokio::test]
async fn test_version_mismatch_is_rejected() {
    let server = start_server(vec![room("Main", true)]).await;
    let mut ws = connect(&server.addr, "/").await;
    handshake(&mut ws, 0.5).await;

    let frame = wait_for(&mut ws, |f| matches!(f, ServerFrame::Validate { .. })).await;
    assert!(matches!(frame, ServerFrame::Validate { accepted: false, .. }));
    wait_for(&mut ws, |f| matches!(f, ServerFrame::Disconnect { .. })).await;
    assert!(close_reason(&mut ws).await.contains("different game version"));
}

#[tokio::test]
async fn test_unknown_room_is_closed() {
    let server = start_server(vec![room("Main", true)]).await;
    let mut ws = connect(&server.addr, "/rooms/999999").await;
    assert_eq!(close_reason(&mut ws).await, "Room not found");

    let mut ws = connect(&server.addr, "/admin").await;
    assert_eq!(close_reason(&mut ws).await, "Unknown path");
}

#[tokio::test]
async fn test_shutdown_disconnects_clients() {
    let server = start_server(vec![room("Main", true)]).await;
    let (mut alice, _) = join(&server.addr, "/", "Alice").await;

    server.stop.send(()).expect("server still running");

    let frame = wait_for(&mut alice, |f| matches!(f, ServerFrame::Disconnect { .. })).await;
    assert_eq!(
        frame,
        ServerFrame::Disconnect {
            reason: SHUTDOWN_REASON.into()
        }
    );
    assert_eq!(close_reason(&mut alice).await, SHUTDOWN_REASON);

    tokio::time::timeout(Duration::from_secs(10), server.task)
        .await
        .expect("server did not stop")
        .expect("server task panicked")
        .expect("server returned an error");
}
