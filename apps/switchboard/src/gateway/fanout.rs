//! Broadcast hub: direct, channel-scoped and process-wide delivery.
//!
//! Each broadcast serializes its frame once and sends one copy per resolved
//! target. Sends to connections that closed in the meantime are dropped.
//! Broadcasts that originate on this process are mirrored to the bus when a
//! [`Bridge`] is attached; broadcasts replayed from the bus never are.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use super::bridge::Bridge;
use super::channels::ChannelDirectory;
use super::connection::{Connection, ConnectionId};
use super::envelope;
use super::registry::ConnectionRegistry;

/// Where a broadcast came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Raised on this process; mirrored to the bus.
    Local,
    /// Replayed from the bus; delivered locally only.
    Remote,
}

/// Engine state shared by every connection task: registry, channels and the
/// optional bridge. Construct once and hand out via `Arc`.
pub struct Hub {
    registry: ConnectionRegistry,
    channels: ChannelDirectory,
    bridge: Option<Bridge>,
}

impl Hub {
    /// A local-only hub.
    pub fn new() -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            channels: ChannelDirectory::new(),
            bridge: None,
        }
    }

    /// A hub that mirrors local broadcasts through `bridge`.
    pub fn with_bridge(bridge: Bridge) -> Self {
        Self {
            bridge: Some(bridge),
            ..Self::new()
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn channels(&self) -> &ChannelDirectory {
        &self.channels
    }

    pub fn bridge(&self) -> Option<&Bridge> {
        self.bridge.as_ref()
    }

    // -- lifecycle ----------------------------------------------------------

    pub fn connect(&self, conn: Arc<dyn Connection>) {
        self.registry.register(conn);
    }

    /// Forget a closed connection and remove it from every channel.
    pub fn disconnect(&self, id: &ConnectionId) {
        self.registry.remove(id);
        let left = self.channels.leave_all(id);
        if !left.is_empty() {
            tracing::debug!(conn_id = %id, channels = ?left, "removed closed connection from channels");
        }
    }

    pub fn join(&self, channel: &str, id: &ConnectionId) -> bool {
        let joined = self.channels.join(channel, id);
        if joined {
            tracing::debug!(conn_id = %id, %channel, "joined channel");
        }
        joined
    }

    pub fn leave(&self, channel: &str, id: &ConnectionId) -> bool {
        let left = self.channels.leave(channel, id);
        if left {
            tracing::debug!(conn_id = %id, %channel, "left channel");
        }
        left
    }

    // -- scopes -------------------------------------------------------------

    /// Send to a single connection. Returns `false` if it is gone.
    pub fn send_to(&self, id: &ConnectionId, kind: &str, data: &Value) -> bool {
        match self.registry.live(id) {
            Some(conn) => deliver(&[conn], envelope::serialize(kind, data)) == 1,
            None => false,
        }
    }

    /// Start a channel-scoped broadcast.
    pub fn to(&self, channel: impl Into<String>) -> Broadcast<'_> {
        Broadcast {
            hub: self,
            channels: vec![channel.into()],
            exclude: HashSet::new(),
        }
    }

    /// Send to every open connection on this process and mirror to the bus.
    /// Returns the number of local deliveries.
    pub fn broadcast(&self, kind: &str, data: &Value) -> usize {
        self.broadcast_all(kind, data, &HashSet::new(), Origin::Local)
    }

    pub(crate) fn broadcast_all(
        &self,
        kind: &str,
        data: &Value,
        exclude: &HashSet<ConnectionId>,
        origin: Origin,
    ) -> usize {
        let targets: Vec<_> = self
            .registry
            .open_connections()
            .into_iter()
            .filter(|conn| !exclude.contains(conn.id()))
            .collect();
        let delivered = deliver(&targets, envelope::serialize(kind, data));

        if origin == Origin::Local {
            if let Some(bridge) = &self.bridge {
                bridge.publish_broadcast(kind, data);
            }
        }
        delivered
    }

    pub(crate) fn broadcast_channels<S: AsRef<str>>(
        &self,
        channels: &[S],
        kind: &str,
        data: &Value,
        exclude: &HashSet<ConnectionId>,
        origin: Origin,
    ) -> usize {
        let mut names: Vec<&str> = Vec::with_capacity(channels.len());
        for channel in channels {
            if !names.contains(&channel.as_ref()) {
                names.push(channel.as_ref());
            }
        }

        let targets = self
            .channels
            .resolve_targets(&self.registry, &names, exclude);
        let delivered = deliver(&targets, envelope::serialize(kind, data));

        if origin == Origin::Local {
            if let Some(bridge) = &self.bridge {
                bridge.publish_channels(&names, kind, data);
            }
        }
        delivered
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Send one frame to each target, returning how many accepted it.
fn deliver(targets: &[Arc<dyn Connection>], frame: String) -> usize {
    let mut delivered = 0;
    for conn in targets {
        match conn.send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(err) => tracing::debug!(conn_id = %conn.id(), error = %err, "dropped send"),
        }
    }
    delivered
}

/// A channel-scoped broadcast under construction.
///
/// Every connection that belongs to any of the chosen channels receives one
/// copy, regardless of how many of those channels it shares.
#[must_use = "a broadcast does nothing until `emit` is called"]
pub struct Broadcast<'a> {
    hub: &'a Hub,
    channels: Vec<String>,
    exclude: HashSet<ConnectionId>,
}

impl Broadcast<'_> {
    /// Add another channel to the target set.
    pub fn to(mut self, channel: impl Into<String>) -> Self {
        let channel = channel.into();
        if !self.channels.contains(&channel) {
            self.channels.push(channel);
        }
        self
    }

    /// Skip this connection even if it is a member.
    pub fn except(mut self, id: &ConnectionId) -> Self {
        self.exclude.insert(id.clone());
        self
    }

    /// Deliver locally and mirror to the bus. Returns local deliveries.
    pub fn emit(self, kind: &str, data: &Value) -> usize {
        self.hub
            .broadcast_channels(self.channels.as_slice(), kind, data, &self.exclude, Origin::Local)
    }
}

/// The calling connection as seen by an action.
#[derive(Clone)]
pub struct Client {
    hub: Arc<Hub>,
    conn: Arc<dyn Connection>,
}

impl Client {
    pub fn new(hub: Arc<Hub>, conn: Arc<dyn Connection>) -> Self {
        Self { hub, conn }
    }

    pub fn id(&self) -> &ConnectionId {
        self.conn.id()
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Send a `{type, data}` frame to this client only.
    pub fn emit(&self, kind: &str, data: &Value) -> bool {
        deliver(&[self.conn.clone()], envelope::serialize(kind, data)) == 1
    }

    /// Send to every other connection on the process and mirror to the bus.
    pub fn broadcast(&self, kind: &str, data: &Value) -> usize {
        let exclude = HashSet::from([self.id().clone()]);
        self.hub.broadcast_all(kind, data, &exclude, Origin::Local)
    }

    /// Channel-scoped broadcast that skips this client.
    pub fn to(&self, channel: impl Into<String>) -> Broadcast<'_> {
        self.hub.to(channel).except(self.id())
    }

    pub fn join(&self, channel: &str) -> bool {
        self.hub.join(channel, self.id())
    }

    pub fn leave(&self, channel: &str) -> bool {
        self.hub.leave(channel, self.id())
    }

    /// Send a serialized reply frame back to this client.
    pub(crate) fn reply(&self, frame: String) {
        if let Err(err) = self.conn.send(frame) {
            tracing::debug!(conn_id = %self.id(), error = %err, "dropped reply");
        }
    }
}
