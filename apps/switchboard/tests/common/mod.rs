use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use switchboard::config::Config;
use switchboard::gateway::{server, Hub, Router};
use switchboard::{actions, AppState};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a real TCP server around `hub` with the built-in routes.
/// The server runs in the background.
pub async fn start_server_with(hub: Arc<Hub>) -> SocketAddr {
    let config = Config::default();
    let router = Router::new(Vec::new()).register(actions::routes());
    let app = server::router(&config.socket_path).with_state(AppState::new(hub, router, config));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

pub async fn start_server() -> (SocketAddr, Arc<Hub>) {
    let hub = Arc::new(Hub::new());
    let addr = start_server_with(hub.clone()).await;
    (addr, hub)
}

pub async fn connect(addr: SocketAddr) -> Socket {
    let url = format!("ws://{addr}/socket");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

pub async fn send(ws: &mut Socket, body: Value) {
    ws.send(tungstenite::Message::Text(body.to_string().into()))
        .await
        .expect("send");
}

pub async fn send_raw(ws: &mut Socket, raw: &str) {
    ws.send(tungstenite::Message::Text(raw.to_string().into()))
        .await
        .expect("send");
}

/// Read the next text frame as JSON, failing after five seconds.
pub async fn recv(ws: &mut Socket) -> Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("ws read error");
        if let tungstenite::Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("parse frame");
        }
    }
}

/// Assert nothing arrives within a short window.
pub async fn expect_silence(ws: &mut Socket) {
    if let Ok(Some(Ok(msg))) = time::timeout(Duration::from_millis(200), ws.next()).await {
        panic!("expected no frame, got {msg:?}");
    }
}

/// Send a request and return the reply correlated to it.
pub async fn request(ws: &mut Socket, correlation_id: &str, kind: &str, data: Value) -> Value {
    send(
        ws,
        serde_json::json!({ "correlationId": correlation_id, "type": kind, "data": data }),
    )
    .await;
    let reply = recv(ws).await;
    assert_eq!(reply["correlationId"], correlation_id);
    reply
}

/// Poll until `check` holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    assert!(check(), "condition never became true");
}
