//! Browser-side view of the server: sign-in cookie, upgrade, chat frames.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE, LOCATION};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use chat_room::session::{self, SessionRecord};
use chat_room::{ChatMessage, ChatServer, ProviderRegistry, ServerConfig, Tracer, WriterTracer};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

async fn start(config: ServerConfig, tracer: Box<dyn Tracer>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ChatServer::with_tracer(config, ProviderRegistry::new(), tracer);
    tokio::spawn(async move { server.serve(listener).await });
    addr
}

fn session_for(name: &str) -> String {
    let record = SessionRecord::new(name, &format!("{}@example.com", name), "");
    format!("auth={}", session::encode(&record).unwrap())
}

async fn connect(addr: SocketAddr, cookie: Option<&str>) -> Result<Socket, WsError> {
    let mut request = format!("ws://{}/room", addr).into_client_request().unwrap();
    if let Some(cookie) = cookie {
        request
            .headers_mut()
            .insert(COOKIE, HeaderValue::from_str(cookie).unwrap());
    }
    connect_async(request).await.map(|(ws, _)| ws)
}

async fn say(ws: &mut Socket, body: &str) {
    let frame = serde_json::json!({ "message": body }).to_string();
    ws.send(Message::text(frame)).await.unwrap();
}

async fn next_chat(ws: &mut Socket) -> ChatMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame within 5s");
        match frame {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

#[tokio::test]
async fn message_echoed_to_sender() {
    let addr = start(ServerConfig::default(), Box::new(chat_room::Off)).await;
    let mut alice = connect(addr, Some(&session_for("Alice"))).await.unwrap();

    say(&mut alice, "hello").await;
    let got = next_chat(&mut alice).await;
    assert_eq!(got.sender_name, "Alice");
    assert!(got.avatar_url.starts_with("//www.gravatar.com/avatar/"));
    assert_eq!(got.body, "hello");
}

#[tokio::test]
async fn broadcast_between_clients() {
    let addr = start(ServerConfig::default(), Box::new(chat_room::Off)).await;
    let mut alice = connect(addr, Some(&session_for("Alice"))).await.unwrap();
    let mut bob = connect(addr, Some(&session_for("Bob"))).await.unwrap();

    // Each echo proves that client has joined.
    say(&mut alice, "alice here").await;
    assert_eq!(next_chat(&mut alice).await.body, "alice here");
    say(&mut bob, "bob here").await;
    assert_eq!(next_chat(&mut bob).await.body, "bob here");

    say(&mut alice, "hi bob").await;
    let mut seen_by_bob = next_chat(&mut bob).await;
    while seen_by_bob.body != "hi bob" {
        seen_by_bob = next_chat(&mut bob).await;
    }
    assert_eq!(seen_by_bob.sender_name, "Alice");
}

#[tokio::test]
async fn invalid_frame_skipped() {
    let addr = start(ServerConfig::default(), Box::new(chat_room::Off)).await;
    let mut alice = connect(addr, Some(&session_for("Alice"))).await.unwrap();

    alice.send(Message::text("not json".to_string())).await.unwrap();
    say(&mut alice, "still here").await;
    assert_eq!(next_chat(&mut alice).await.body, "still here");
}

#[tokio::test]
async fn large_message_with_small_buffers() {
    let mut config = ServerConfig::default();
    config.read_buffer_size = 512;
    config.write_buffer_size = 512;
    let addr = start(config, Box::new(chat_room::Off)).await;
    let mut alice = connect(addr, Some(&session_for("Alice"))).await.unwrap();

    let body = "x".repeat(8 * 1024);
    say(&mut alice, &body).await;
    assert_eq!(next_chat(&mut alice).await.body, body);
}

#[tokio::test]
async fn disconnect_sends_one_leave() {
    let trace = SharedBuf::default();
    let addr = start(ServerConfig::default(), Box::new(WriterTracer::new(trace.clone()))).await;
    let mut alice = connect(addr, Some(&session_for("Alice"))).await.unwrap();

    say(&mut alice, "bye").await;
    next_chat(&mut alice).await;
    alice.close(None).await.unwrap();

    let mut waited = Duration::ZERO;
    while !trace.contents().contains(" left") {
        assert!(waited < Duration::from_secs(5), "leave never reached the room");
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let out = trace.contents();
    assert_eq!(out.matches(" joined").count(), 1);
    assert_eq!(out.matches(" left").count(), 1);
    assert!(!out.contains("not in room"));
}

#[tokio::test]
async fn upgrade_without_session_redirects_to_login() {
    let addr = start(ServerConfig::default(), Box::new(chat_room::Off)).await;

    match connect(addr, None).await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
            assert_eq!(response.headers()[LOCATION], "/login");
        }
        other => panic!("expected redirect, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn upgrade_with_garbage_session_rejected() {
    let trace = SharedBuf::default();
    let addr = start(ServerConfig::default(), Box::new(WriterTracer::new(trace.clone()))).await;

    match connect(addr, Some("auth=garbage")).await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        other => panic!("expected 400, got {:?}", other.map(|_| ())),
    }
    assert!(trace.contents().is_empty());
}
