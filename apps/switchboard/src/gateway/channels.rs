//! Channel membership and broadcast target resolution.
//!
//! Channels are created on first join and removed as soon as their last member
//! leaves. Dead members are removed eagerly when their transport closes
//! ([`ChannelDirectory::leave_all`]) and lazily whenever a resolution touches
//! a channel that still lists them.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use super::connection::{Connection, ConnectionId};
use super::registry::ConnectionRegistry;

/// Thread-safe, DashMap-backed channel directory. Names are case-sensitive.
pub struct ChannelDirectory {
    channels: DashMap<String, HashSet<ConnectionId>>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Add a connection to a channel, creating the channel if needed.
    ///
    /// Returns `false` if the connection was already a member.
    pub fn join(&self, channel: &str, id: &ConnectionId) -> bool {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(id.clone())
    }

    /// Remove a connection from a channel. Leaving a channel you are not in is
    /// a no-op. Returns `true` if the connection was a member.
    pub fn leave(&self, channel: &str, id: &ConnectionId) -> bool {
        let removed = match self.channels.get_mut(channel) {
            Some(mut members) => members.remove(id),
            None => return false,
        };
        self.channels.remove_if(channel, |_, members| members.is_empty());
        removed
    }

    /// Remove a connection from every channel. Returns the channels it left.
    pub fn leave_all(&self, id: &ConnectionId) -> Vec<String> {
        let mut left = Vec::new();
        self.channels.retain(|name, members| {
            if members.remove(id) {
                left.push(name.clone());
            }
            !members.is_empty()
        });
        left
    }

    /// Compute the deduplicated live targets across `channels`, skipping any
    /// connection in `exclude`.
    ///
    /// Members that are no longer registered or no longer open are pruned from
    /// the channel as a side effect and never returned.
    pub fn resolve_targets<S: AsRef<str>>(
        &self,
        registry: &ConnectionRegistry,
        channels: &[S],
        exclude: &HashSet<ConnectionId>,
    ) -> Vec<Arc<dyn Connection>> {
        let mut seen: HashSet<ConnectionId> = HashSet::new();
        let mut targets = Vec::new();

        for channel in channels {
            let channel = channel.as_ref();
            let Some(mut members) = self.channels.get_mut(channel) else {
                continue;
            };

            members.retain(|id| match registry.live(id) {
                Some(conn) => {
                    if !exclude.contains(id) && seen.insert(id.clone()) {
                        targets.push(conn);
                    }
                    true
                }
                None => {
                    tracing::debug!(conn_id = %id, %channel, "pruned stale channel member");
                    false
                }
            });

            let now_empty = members.is_empty();
            drop(members);
            if now_empty {
                self.channels.remove_if(channel, |_, members| members.is_empty());
            }
        }

        targets
    }

    /// Current members of a channel (empty if the channel does not exist).
    pub fn members(&self, channel: &str) -> Vec<ConnectionId> {
        self.channels
            .get(channel)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::connection::testing::RecordingConnection;
    use super::*;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    fn setup(names: &[&str]) -> (ConnectionRegistry, Vec<Arc<RecordingConnection>>) {
        let registry = ConnectionRegistry::new();
        let conns: Vec<_> = names.iter().map(|n| RecordingConnection::new(n)).collect();
        for conn in &conns {
            registry.register(conn.clone());
        }
        (registry, conns)
    }

    fn target_ids(targets: &[Arc<dyn Connection>]) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = targets.iter().map(|c| c.id().clone()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn join_is_idempotent() {
        let dir = ChannelDirectory::new();
        assert!(dir.join("room", &id("a")));
        assert!(!dir.join("room", &id("a")));
        assert_eq!(dir.members("room"), vec![id("a")]);
    }

    #[test]
    fn leave_non_member_is_noop() {
        let dir = ChannelDirectory::new();
        assert!(!dir.leave("room", &id("a")));

        dir.join("room", &id("b"));
        assert!(!dir.leave("room", &id("a")));
        assert_eq!(dir.members("room"), vec![id("b")]);
    }

    #[test]
    fn last_leave_removes_channel() {
        let dir = ChannelDirectory::new();
        dir.join("room", &id("a"));
        dir.join("room", &id("b"));

        assert!(dir.leave("room", &id("a")));
        assert!(dir.contains("room"));
        assert!(dir.leave("room", &id("b")));
        assert!(!dir.contains("room"));
        assert!(dir.is_empty());
    }

    #[test]
    fn names_are_case_sensitive() {
        let dir = ChannelDirectory::new();
        dir.join("Room", &id("a"));
        dir.join("room", &id("b"));
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.members("Room"), vec![id("a")]);
    }

    #[test]
    fn leave_all_removes_from_every_channel() {
        let dir = ChannelDirectory::new();
        dir.join("x", &id("a"));
        dir.join("y", &id("a"));
        dir.join("y", &id("b"));

        let mut left = dir.leave_all(&id("a"));
        left.sort();
        assert_eq!(left, vec!["x".to_string(), "y".to_string()]);
        assert!(!dir.contains("x"));
        assert_eq!(dir.members("y"), vec![id("b")]);
    }

    #[test]
    fn overlapping_channels_resolve_once() {
        let (registry, _conns) = setup(&["a", "b", "c"]);
        let dir = ChannelDirectory::new();
        dir.join("x", &id("a"));
        dir.join("x", &id("b"));
        dir.join("y", &id("b"));
        dir.join("y", &id("c"));

        let targets = dir.resolve_targets(&registry, &["x", "y"], &HashSet::new());
        assert_eq!(target_ids(&targets), vec![id("a"), id("b"), id("c")]);
    }

    #[test]
    fn excluded_connection_is_never_targeted() {
        let (registry, _conns) = setup(&["a", "b"]);
        let dir = ChannelDirectory::new();
        for ch in ["x", "y"] {
            dir.join(ch, &id("a"));
            dir.join(ch, &id("b"));
        }

        let exclude = HashSet::from([id("a")]);
        let targets = dir.resolve_targets(&registry, &["x", "y"], &exclude);
        assert_eq!(target_ids(&targets), vec![id("b")]);
        // Excluded members stay in the channel.
        assert_eq!(dir.members("x").len(), 2);
    }

    #[test]
    fn dead_members_are_pruned_on_resolve() {
        let (registry, conns) = setup(&["a", "b"]);
        let dir = ChannelDirectory::new();
        dir.join("x", &id("a"));
        dir.join("x", &id("b"));
        conns[1].close();

        let targets = dir.resolve_targets(&registry, &["x"], &HashSet::new());
        assert_eq!(target_ids(&targets), vec![id("a")]);
        assert_eq!(dir.members("x"), vec![id("a")]);
    }

    #[test]
    fn unregistered_members_are_pruned_and_empty_channel_removed() {
        let (registry, _conns) = setup(&["a"]);
        let dir = ChannelDirectory::new();
        dir.join("x", &id("a"));
        registry.remove(&id("a"));

        let targets = dir.resolve_targets(&registry, &["x"], &HashSet::new());
        assert!(targets.is_empty());
        assert!(!dir.contains("x"));
    }

    #[test]
    fn unknown_channel_resolves_to_nothing() {
        let (registry, _conns) = setup(&["a"]);
        let dir = ChannelDirectory::new();
        let targets = dir.resolve_targets(&registry, &["ghost"], &HashSet::new());
        assert!(targets.is_empty());
        assert!(!dir.contains("ghost"));
    }
}
