//! Distributed bridge: mirrors broadcasts across processes over a pub/sub bus.
//!
//! Local broadcasts are queued on an outbox and published by a single task, so
//! fan-out never waits on the bus. Messages arriving from the bus are replayed
//! through the hub as [`Origin::Remote`], which delivers them to local members
//! without publishing them again.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{future, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_common::id::{prefix, prefixed_ulid};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::BusError;

use super::envelope::empty_object;
use super::fanout::{Hub, Origin};

/// Topic reserved for process-wide broadcasts unless configured otherwise.
pub const DEFAULT_BROADCAST_TOPIC: &str = "broadcast";

// ---------------------------------------------------------------------------
// Bus abstraction
// ---------------------------------------------------------------------------

/// One message received from the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

/// Abstraction over an external publish/subscribe bus.
///
/// Backed by Redis in production and an in-process channel in tests.
#[async_trait]
pub trait PubSubBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError>;

    /// Subscribe to every topic starting with `prefix`.
    async fn subscribe(&self, prefix: &str) -> Result<BoxStream<'static, BusMessage>, BusError>;
}

/// Payload carried on the bus: the broadcast frame, the publishing node and,
/// for channel-scoped broadcasts, the full channel list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Every channel a channel-scoped broadcast targets. Empty for
    /// process-wide broadcasts and for payloads from other publishers, which
    /// are scoped by topic instead.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Topic used for process-wide broadcasts.
    pub broadcast_topic: String,
    /// Prefix applied to every topic this bridge publishes or listens on.
    pub namespace: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broadcast_topic: DEFAULT_BROADCAST_TOPIC.to_string(),
            namespace: String::new(),
        }
    }
}

/// Publishing half of the bridge, owned by the [`Hub`].
pub struct Bridge {
    node_id: String,
    config: BridgeConfig,
    outbox: mpsc::UnboundedSender<(String, String)>,
}

impl Bridge {
    /// Spawn the publisher task. Must be called inside a Tokio runtime.
    pub fn spawn(bus: Arc<dyn PubSubBus>, config: BridgeConfig) -> Self {
        let (outbox, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_publisher(bus, rx));
        Self {
            node_id: prefixed_ulid(prefix::NODE),
            config,
            outbox,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub(crate) fn publish_broadcast(&self, kind: &str, data: &Value) {
        self.publish(&self.config.broadcast_topic, kind, data, Vec::new());
    }

    /// One bus message per call, on the first channel's topic, so a remote
    /// member of several channels still receives a single copy.
    pub(crate) fn publish_channels(&self, channels: &[&str], kind: &str, data: &Value) {
        let Some(first) = channels.first() else {
            return;
        };
        let channels = channels.iter().map(|c| c.to_string()).collect();
        self.publish(first, kind, data, channels);
    }

    fn publish(&self, name: &str, kind: &str, data: &Value, channels: Vec<String>) {
        let envelope = BusEnvelope {
            kind: kind.to_string(),
            data: data.clone(),
            node: Some(self.node_id.clone()),
            channels,
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(%name, %err, "failed to serialize bus payload");
                return;
            }
        };
        let topic = format!("{}{}", self.config.namespace, name);
        if self.outbox.send((topic, payload)).is_err() {
            tracing::warn!(%name, "bus publisher stopped; dropping broadcast");
        }
    }

    /// Map a bus message back onto local delivery.
    fn replay(&self, hub: &Hub, message: BusMessage) -> Result<(), BusError> {
        let Some(name) = message.topic.strip_prefix(&self.config.namespace) else {
            return Ok(());
        };
        let envelope: BusEnvelope = serde_json::from_str(&message.payload)?;
        if envelope.node.as_deref() == Some(self.node_id.as_str()) {
            return Ok(());
        }

        let none = Default::default();
        let delivered = if !envelope.channels.is_empty() {
            hub.broadcast_channels(&envelope.channels, &envelope.kind, &envelope.data, &none, Origin::Remote)
        } else if name == self.config.broadcast_topic {
            hub.broadcast_all(&envelope.kind, &envelope.data, &none, Origin::Remote)
        } else {
            hub.broadcast_channels(&[name], &envelope.kind, &envelope.data, &none, Origin::Remote)
        };
        tracing::debug!(topic = %message.topic, kind = %envelope.kind, delivered, "replayed bus message");
        Ok(())
    }
}

async fn run_publisher(bus: Arc<dyn PubSubBus>, mut rx: mpsc::UnboundedReceiver<(String, String)>) {
    while let Some((topic, payload)) = rx.recv().await {
        if let Err(err) = bus.publish(&topic, &payload).await {
            tracing::warn!(%topic, %err, "bus publish failed; dropping broadcast");
        }
    }
}

/// Build a bridged hub: start publishing, subscribe, and replay remote
/// broadcasts until the bus stream ends or the hub is dropped.
///
/// The subscription is in place before this returns, so no broadcast
/// published afterwards is missed.
pub async fn connect(
    bus: Arc<dyn PubSubBus>,
    config: BridgeConfig,
) -> Result<(Arc<Hub>, JoinHandle<()>), BusError> {
    let inbound = bus.subscribe(&config.namespace).await?;
    let bridge = Bridge::spawn(bus, config);
    tracing::info!(node_id = %bridge.node_id(), "distributed bridge enabled");

    let hub = Arc::new(Hub::with_bridge(bridge));
    let listener = tokio::spawn(run_listener(inbound, Arc::downgrade(&hub)));
    Ok((hub, listener))
}

async fn run_listener(mut inbound: BoxStream<'static, BusMessage>, hub: Weak<Hub>) {
    while let Some(message) = inbound.next().await {
        let Some(hub) = hub.upgrade() else {
            break;
        };
        let Some(bridge) = hub.bridge() else {
            break;
        };
        if let Err(err) = bridge.replay(&hub, message) {
            tracing::warn!(%err, "ignoring bus message");
        }
    }
    tracing::info!("bus subscription ended");
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Redis pub/sub. Publishes over a shared `ConnectionManager`; each
/// subscription opens its own pub/sub connection and pattern-subscribes.
pub struct RedisBus {
    client: redis::Client,
    publisher: redis::aio::ConnectionManager,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_connection_manager().await?;
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl PubSubBus for RedisBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        use redis::AsyncCommands;

        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(topic, payload)
            .await
            .map_err(|e| BusError::Publish {
                topic: topic.to_string(),
                message: e.to_string(),
            })
    }

    async fn subscribe(&self, prefix: &str) -> Result<BoxStream<'static, BusMessage>, BusError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;
        pubsub
            .psubscribe(format!("{prefix}*"))
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        let messages = pubsub.into_on_message().filter_map(|msg| {
            let topic = msg.get_channel_name().to_string();
            future::ready(match msg.get_payload::<String>() {
                Ok(payload) => Some(BusMessage { topic, payload }),
                Err(err) => {
                    tracing::warn!(%topic, %err, "non-text bus payload");
                    None
                }
            })
        });
        Ok(messages.boxed())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests / single-host bridging)
// ---------------------------------------------------------------------------

/// Capacity of the in-memory bus. Slow subscribers skip messages.
const MEMORY_BUS_CAPACITY: usize = 1024;

/// In-process bus. Every publish is delivered to every subscriber, including
/// the publisher's own, just like Redis.
pub struct MemoryBus {
    sender: broadcast::Sender<BusMessage>,
    history: Mutex<Vec<BusMessage>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(MEMORY_BUS_CAPACITY);
        Self {
            sender,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Every message published so far, in order.
    pub fn published(&self) -> Vec<BusMessage> {
        self.history.lock().clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        };
        self.history.lock().push(message.clone());
        // send() returns Err when nobody is subscribed.
        let _ = self.sender.send(message);
        Ok(())
    }

    async fn subscribe(&self, prefix: &str) -> Result<BoxStream<'static, BusMessage>, BusError> {
        let prefix = prefix.to_string();
        let rx = self.sender.subscribe();
        let messages = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, rx)),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "memory bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |message| future::ready(message.topic.starts_with(&prefix)));
        Ok(messages.boxed())
    }
}
