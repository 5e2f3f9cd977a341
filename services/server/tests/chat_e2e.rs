//! End-to-end tests driving the real TCP accept loop with two live
//! clients speaking the wire protocol directly, no mocked transport.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use im_core::CoreShared;
use im_protocol::messages::{ChatBody, LoginRequest, OperateFriendRequest, RegisterRequest};
use im_protocol::{Command, FrameCodec, Packet, PayloadWriter};
use server::{db::Db, run_accept_loop, SqliteUserStore};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

type Client = Framed<TcpStream, FrameCodec>;

async fn spawn_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let db = Db::open_in_memory().unwrap();
    let user_store = SqliteUserStore::new(db, im_protocol::GROUP_ID_BOUNDARY);
    let shared = CoreShared::new(im_core::CoreConfig::fast_heartbeat_for_tests());
    let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        run_accept_loop(listener, shared, user_store, shutdown_rx).await;
    });
    addr
}

async fn connect(addr: std::net::SocketAddr) -> Client {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, FrameCodec::new())
}

async fn send(client: &mut Client, cmd: Command, seq: i32, body: &[u8], extra: &[u8]) {
    let bytes = Packet::encode(cmd, seq, body, extra).into_bytes().freeze();
    client.send(bytes).await.unwrap();
}

async fn recv(client: &mut Client) -> Packet {
    let raw: BytesMut = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .unwrap();
    Packet::decode(&raw).unwrap()
}

async fn register_and_login(client: &mut Client, username: &str, password: &str) -> i32 {
    send(
        client,
        Command::Register,
        1,
        &serde_json::to_vec(&RegisterRequest { username: username.into(), password: password.into() }).unwrap(),
        &[],
    )
    .await;
    recv(client).await;

    send(
        client,
        Command::Login,
        2,
        &serde_json::to_vec(&LoginRequest {
            username: username.into(),
            password: password.into(),
            clienttype: 1,
            status: 0,
        })
        .unwrap(),
        &[],
    )
    .await;
    let reply = recv(client).await;
    let login_reply: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
    login_reply["userid"].as_i64().unwrap() as i32
}

fn chat_extra(target: i32) -> Bytes {
    let mut w = PayloadWriter::new();
    w.write_i32(target);
    w.into_bytes().freeze()
}

#[tokio::test]
async fn two_clients_befriend_and_chat_over_a_live_socket() {
    let addr = spawn_server().await;

    let mut alice = connect(addr).await;
    let alice_id = register_and_login(&mut alice, "alice", "pw").await;

    let mut bob = connect(addr).await;
    let bob_id = register_and_login(&mut bob, "bob", "pw").await;

    // Alice requests bob as a friend. The wire contract carries no
    // direct reply for a request, only a notice routed to the target.
    send(
        &mut alice,
        Command::OperateFriend,
        3,
        &serde_json::to_vec(&OperateFriendRequest { kind: 1, userid: bob_id, accept: None }).unwrap(),
        &[],
    )
    .await;
    let request_notice = recv(&mut bob).await;
    assert_eq!(request_notice.cmd, Command::OperateFriend);
    let notice: serde_json::Value = serde_json::from_slice(&request_notice.body).unwrap();
    assert_eq!(notice["userid"], alice_id);

    // Bob accepts. He gets a direct ack; alice gets a notice of her own.
    send(
        &mut bob,
        Command::OperateFriend,
        3,
        &serde_json::to_vec(&OperateFriendRequest { kind: 3, userid: alice_id, accept: Some(1) }).unwrap(),
        &[],
    )
    .await;
    let bob_ack = recv(&mut bob).await;
    let ack: serde_json::Value = serde_json::from_slice(&bob_ack.body).unwrap();
    assert_eq!(ack["accept"], 1);

    let alice_notice = recv(&mut alice).await;
    let notice: serde_json::Value = serde_json::from_slice(&alice_notice.body).unwrap();
    assert_eq!(notice["accept"], 1);

    send(
        &mut alice,
        Command::Chat,
        4,
        &serde_json::to_vec(&ChatBody { msg: "hello over the wire".into() }).unwrap(),
        &chat_extra(bob_id),
    )
    .await;

    let delivered = recv(&mut bob).await;
    assert_eq!(delivered.cmd, Command::Chat);
    let body: ChatBody = serde_json::from_slice(&delivered.body).unwrap();
    assert_eq!(body.msg, "hello over the wire");
}

#[tokio::test]
async fn second_login_from_the_same_user_kicks_the_first_socket() {
    let addr = spawn_server().await;

    let mut first = connect(addr).await;
    register_and_login(&mut first, "carol", "pw").await;

    let mut second = connect(addr).await;
    send(
        &mut second,
        Command::Login,
        1,
        &serde_json::to_vec(&LoginRequest {
            username: "carol".into(),
            password: "pw".into(),
            clienttype: 1,
            status: 0,
        })
        .unwrap(),
        &[],
    )
    .await;
    recv(&mut second).await;

    let kick = recv(&mut first).await;
    assert_eq!(kick.cmd, Command::KickUser);
}

#[tokio::test]
async fn heartbeat_timeout_closes_an_idle_connection() {
    let addr = spawn_server().await;
    let mut client = connect(addr).await;
    register_and_login(&mut client, "dora", "pw").await;

    let closed = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match client.next().await {
                None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "expected the idle connection to be closed by the heartbeat watchdog");
}
