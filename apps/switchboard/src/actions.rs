//! Built-in routes shipped with the switchboard binary.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::gateway::envelope::empty_object;
use crate::gateway::{action_fn, ActionResult, Client, Reply, Route};

pub const PING: &str = "ping";
pub const ECHO: &str = "echo";
pub const CHANNEL_JOIN: &str = "channel.join";
pub const CHANNEL_LEAVE: &str = "channel.leave";
pub const CHANNEL_EMIT: &str = "channel.emit";
pub const BROADCAST: &str = "broadcast";

#[derive(Debug, Deserialize)]
struct ChannelPayload {
    channel: String,
}

#[derive(Debug, Deserialize)]
struct EmitPayload {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channels: Vec<String>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default = "empty_object")]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct BroadcastPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default = "empty_object")]
    data: Value,
}

pub fn routes() -> Vec<Route> {
    vec![
        Route::on(PING, vec![action_fn(|_, _, reply| async move { Ok(reply.accept()) })]),
        Route::on(ECHO, vec![action_fn(|_, data, reply| async move { Ok(reply.respond(data)) })]),
        Route::on(CHANNEL_JOIN, vec![action_fn(join)]),
        Route::on(CHANNEL_LEAVE, vec![action_fn(leave)]),
        Route::on(CHANNEL_EMIT, vec![action_fn(emit)]),
        Route::on(BROADCAST, vec![action_fn(broadcast)]),
    ]
}

fn invalid(reply: Reply, err: serde_json::Error, data: Value) -> ActionResult {
    reply.reject(format!("Invalid payload: {err}"), data)
}

async fn join(client: Client, data: Value, reply: Reply) -> anyhow::Result<ActionResult> {
    let payload: ChannelPayload = match serde_json::from_value(data.clone()) {
        Ok(p) => p,
        Err(err) => return Ok(invalid(reply, err, data)),
    };
    client.join(&payload.channel);
    Ok(reply.respond(json!({ "channel": payload.channel })))
}

async fn leave(client: Client, data: Value, reply: Reply) -> anyhow::Result<ActionResult> {
    let payload: ChannelPayload = match serde_json::from_value(data.clone()) {
        Ok(p) => p,
        Err(err) => return Ok(invalid(reply, err, data)),
    };
    client.leave(&payload.channel);
    Ok(reply.respond(json!({ "channel": payload.channel })))
}

/// Channel-scoped broadcast to one or more channels, skipping the sender.
async fn emit(client: Client, data: Value, reply: Reply) -> anyhow::Result<ActionResult> {
    let payload: EmitPayload = match serde_json::from_value(data.clone()) {
        Ok(p) => p,
        Err(err) => return Ok(invalid(reply, err, data)),
    };

    let mut channels = payload.channel.into_iter().chain(payload.channels);
    let Some(first) = channels.next() else {
        return Ok(reply.reject("Invalid payload: no channel given", data));
    };
    let delivered = channels
        .fold(client.to(first), |broadcast, channel| broadcast.to(channel))
        .emit(&payload.kind, &payload.data);

    tracing::debug!(conn_id = %client.id(), kind = %payload.kind, delivered, "channel emit");
    Ok(reply.accept())
}

/// Process-wide broadcast, skipping the sender.
async fn broadcast(client: Client, data: Value, reply: Reply) -> anyhow::Result<ActionResult> {
    let payload: BroadcastPayload = match serde_json::from_value(data.clone()) {
        Ok(p) => p,
        Err(err) => return Ok(invalid(reply, err, data)),
    };
    client.broadcast(&payload.kind, &payload.data);
    Ok(reply.accept())
}
