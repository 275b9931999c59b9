//! HTTP and WebSocket tests against a live server

use std::net::SocketAddr;
use std::time::Duration;

use broadside::ServerBuilder;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ServerBuilder::new()
        .sweep_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    tokio::spawn(server.serve(listener, std::future::pending()));
    addr
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, event: &str, payload: Value) {
    let frame = json!({ "event": event, "payload": payload }).to_string();
    socket.send(Message::Text(frame)).await.unwrap();
}

/// Next frame named `event`, skipping any others.
async fn expect(socket: &mut Socket, event: &str) -> Value {
    let wait = async {
        loop {
            let frame = socket.next().await.unwrap().unwrap();
            if let Message::Text(text) = frame {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["event"] == event {
                    return value["payload"].clone();
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", event))
}

async fn register(addr: SocketAddr, name: &str) -> Socket {
    let mut socket = connect(addr).await;
    send(&mut socket, "register", json!({ "username": name })).await;
    let payload = expect(&mut socket, "register_success").await;
    assert_eq!(payload["username"], name);
    socket
}

/// Test health endpoint
#[tokio::test]
async fn test_health() {
    let addr = spawn_server().await;

    let resp = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(resp.status(), 200);

    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["usersOnline"], 0);
    assert_eq!(json["gamesActive"], 0);
}

/// Test roster and availability endpoints
#[tokio::test]
async fn test_user_endpoints() {
    let addr = spawn_server().await;
    let _alice = register(addr, "Alice").await;

    for path in ["users/online", "api/users/online"] {
        let json: Value = reqwest::get(format!("http://{}/{}", addr, path))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["count"], 1);
        assert_eq!(json["users"], json!(["alice"]));
    }

    let taken: Value = reqwest::get(format!("http://{}/api/users/check/ALICE", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(taken["available"], false);

    let free: Value = reqwest::get(format!("http://{}/api/users/check/bob", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(free["available"], true);

    let invalid: Value = reqwest::get(format!("http://{}/api/users/check/b", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(invalid["available"], false);
    assert_eq!(invalid["message"], "Username must be at least 2 characters");
}

/// Test malformed frames get an error and keep the socket open
#[tokio::test]
async fn test_malformed_frame() {
    let addr = spawn_server().await;
    let mut socket = connect(addr).await;

    socket.send(Message::Text("not json".into())).await.unwrap();
    expect(&mut socket, "error").await;

    send(&mut socket, "no_such_event", json!({})).await;
    expect(&mut socket, "error").await;

    send(&mut socket, "register", json!({ "username": "carol" })).await;
    expect(&mut socket, "register_success").await;
}

/// Test a full match over the wire, ending in surrender
#[tokio::test]
async fn test_invite_and_surrender() {
    let addr = spawn_server().await;
    let mut alice = register(addr, "alice").await;
    let mut bob = register(addr, "bob").await;

    send(&mut alice, "send_invitation", json!({ "toUsername": "bob" })).await;
    let sent = expect(&mut alice, "invitation_sent").await;
    assert_eq!(sent["toUser"], "bob");

    let invite = expect(&mut bob, "invitation_received").await;
    assert_eq!(invite["fromUser"], "alice");
    let game_id = invite["gameId"].as_str().unwrap().to_string();

    send(
        &mut bob,
        "respond_invitation",
        json!({ "inviteId": invite["inviteId"], "response": "accept" }),
    )
    .await;
    let start = expect(&mut alice, "game_start").await;
    assert_eq!(start["gameId"], game_id.as_str());
    assert_eq!(start["opponent"], "bob");
    assert_eq!(start["isPlayer1"], true);
    let start = expect(&mut bob, "game_start").await;
    assert_eq!(start["isPlayer1"], false);

    send(&mut bob, "surrender", json!({ "gameId": game_id })).await;
    for socket in [&mut alice, &mut bob] {
        let finished = expect(socket, "game_finished").await;
        assert_eq!(finished["winner"], "alice");
        assert_eq!(finished["reason"], "surrender");
    }
}

/// Test that closing a socket forfeits the game and updates the roster
#[tokio::test]
async fn test_disconnect_forfeits() {
    let addr = spawn_server().await;
    let mut alice = register(addr, "alice").await;
    let mut bob = register(addr, "bob").await;

    send(&mut alice, "send_invitation", json!({ "toUsername": "bob" })).await;
    let invite = expect(&mut bob, "invitation_received").await;
    send(
        &mut bob,
        "respond_invitation",
        json!({ "inviteId": invite["inviteId"], "response": "accept" }),
    )
    .await;
    expect(&mut alice, "game_start").await;

    bob.close(None).await.unwrap();

    expect(&mut alice, "opponent_disconnected").await;
    let finished = expect(&mut alice, "game_finished").await;
    assert_eq!(finished["winner"], "alice");
    assert_eq!(finished["reason"], "disconnect");

    let json: Value = reqwest::get(format!("http://{}/api/users/online", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(json["users"], json!(["alice"]));
}

/// Test duplicate names are rejected
#[tokio::test]
async fn test_duplicate_name() {
    let addr = spawn_server().await;
    let _alice = register(addr, "alice").await;

    let mut other = connect(addr).await;
    send(&mut other, "register", json!({ "username": "ALICE" })).await;
    let err = expect(&mut other, "register_error").await;
    assert!(err["message"].as_str().unwrap().contains("already taken"));
}
