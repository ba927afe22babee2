//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use crate::AppState;

use super::connection::{ConnectionId, SocketConnection};
use super::fanout::Client;

/// How long a closing connection waits for queued frames to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Mount the socket endpoint at `path`. Upgrades on any other path are 404.
pub fn router(path: &str) -> Router<AppState> {
    Router::new().route(path, get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (outbox, frames) = mpsc::unbounded_channel::<String>();

    let id = ConnectionId::generate();
    let conn = Arc::new(SocketConnection::new(id.clone(), outbox));

    let mut writer = tokio::spawn(run_writer(ws_tx, frames, id.clone()));

    state.hub.connect(conn.clone());
    tracing::info!(conn_id = %id, "client connected");

    let client = Client::new(state.hub.clone(), conn.clone());

    // Frames from one connection are dispatched strictly one at a time.
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => state.router.dispatch(&client, text.as_str()).await,
            Ok(Message::Close(frame)) => {
                if let Some(frame) = frame {
                    tracing::debug!(conn_id = %id, code = frame.code, reason = %frame.reason.as_str(), "close frame");
                }
                break;
            }
            Ok(Message::Binary(_)) => {
                tracing::debug!(conn_id = %id, "ignoring binary frame");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                tracing::debug!(?e, conn_id = %id, "ws read error");
                break;
            }
        }
    }

    conn.close();
    state.hub.disconnect(&id);

    // Dropping the last outbox handles lets the writer flush what is queued.
    drop(client);
    drop(conn);
    if time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        tracing::debug!(conn_id = %id, "writer did not drain in time");
        writer.abort();
    }

    tracing::info!(conn_id = %id, "client disconnected");
}

/// Forward queued frames to the socket until the outbox closes or a write
/// fails.
async fn run_writer<S>(mut sink: S, mut frames: mpsc::UnboundedReceiver<String>, id: ConnectionId)
where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = frames.recv().await {
        if sink.send(Message::Text(frame.into())).await.is_err() {
            tracing::debug!(conn_id = %id, "ws write loop closed");
            break;
        }
    }
}
