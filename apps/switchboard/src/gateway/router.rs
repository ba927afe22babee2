//! Action router: maps a message type to an ordered chain of actions.
//!
//! Every chain runs strictly in order and stops at the first action that does
//! not accept. A fully accepted chain sends nothing back; a rejection or a
//! response is sent to the calling connection only, tagged with the request's
//! correlation id.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{json, Map, Value};
use switchboard_common::id::{prefix, prefixed_ulid};

use crate::error::DispatchError;

use super::envelope::{self, Envelope, PartialEnvelope};
use super::fanout::Client;

// ---------------------------------------------------------------------------
// Action results
// ---------------------------------------------------------------------------

/// Outcome of a single action invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    /// Continue with the next action in the chain.
    Accepted,
    /// Stop the chain and tell the sender why.
    Rejected { message: String, data: Value },
    /// Stop the chain and answer the sender.
    Responded { data: Value },
}

impl ActionResult {
    /// The `data` object of a reply frame.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Accepted => json!({ "status": "accepted" }),
            Self::Rejected { message, data } => {
                json!({ "status": "rejected", "message": message, "data": data })
            }
            Self::Responded { data } => json!({ "status": "responded", "data": data }),
        }
    }
}

/// Result builder handed to every action.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reply;

impl Reply {
    pub fn accept(self) -> ActionResult {
        ActionResult::Accepted
    }

    pub fn reject(self, message: impl Into<String>, data: Value) -> ActionResult {
        ActionResult::Rejected {
            message: message.into(),
            data,
        }
    }

    pub fn respond(self, data: Value) -> ActionResult {
        ActionResult::Responded { data }
    }
}

// ---------------------------------------------------------------------------
// Actions and routes
// ---------------------------------------------------------------------------

/// One step of an action chain.
///
/// Returning `Err` stops the chain; the error text is sent back to the caller
/// as a rejection.
#[async_trait]
pub trait Action: Send + Sync {
    async fn call(&self, client: &Client, data: &Value, reply: Reply) -> anyhow::Result<ActionResult>;
}

/// Adapter that lets an async closure act as an [`Action`].
pub struct ActionFn<F>(F);

#[async_trait]
impl<F, Fut> Action for ActionFn<F>
where
    F: Fn(Client, Value, Reply) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ActionResult>> + Send + 'static,
{
    async fn call(&self, client: &Client, data: &Value, reply: Reply) -> anyhow::Result<ActionResult> {
        (self.0)(client.clone(), data.clone(), reply).await
    }
}

/// Wrap an async closure as a shareable action.
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn Action>
where
    F: Fn(Client, Value, Reply) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ActionResult>> + Send + 'static,
{
    Arc::new(ActionFn(f))
}

/// Binds a message type to its route-specific actions.
pub struct Route {
    pub kind: String,
    pub actions: Vec<Arc<dyn Action>>,
}

impl Route {
    pub fn on(kind: impl Into<String>, actions: Vec<Arc<dyn Action>>) -> Self {
        Self {
            kind: kind.into(),
            actions,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Immutable once wrapped in an `Arc` and shared with connection tasks.
pub struct Router {
    defaults: Vec<Arc<dyn Action>>,
    routes: HashMap<String, Vec<Arc<dyn Action>>>,
}

impl Router {
    /// `defaults` run before every route's own actions.
    pub fn new(defaults: Vec<Arc<dyn Action>>) -> Self {
        Self {
            defaults,
            routes: HashMap::new(),
        }
    }

    /// Register routes. A later route for the same type replaces the earlier one.
    pub fn register(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        for route in routes {
            let chain: Vec<Arc<dyn Action>> = self
                .defaults
                .iter()
                .cloned()
                .chain(route.actions)
                .collect();
            if self.routes.insert(route.kind.clone(), chain).is_some() {
                tracing::warn!(kind = %route.kind, "route registered twice; keeping the latest");
            }
        }
        self
    }

    pub fn has_route(&self, kind: &str) -> bool {
        self.routes.contains_key(kind)
    }

    fn chain(&self, kind: &str) -> Result<&[Arc<dyn Action>], DispatchError> {
        self.routes
            .get(kind)
            .map(Vec::as_slice)
            .ok_or_else(|| DispatchError::RouteNotFound(kind.to_string()))
    }

    /// Run the chain for `envelope`.
    ///
    /// Returns `Ok(None)` when every action accepted, or the terminal result.
    pub async fn run(
        &self,
        client: &Client,
        envelope: &Envelope,
    ) -> Result<Option<ActionResult>, DispatchError> {
        for action in self.chain(&envelope.kind)? {
            let outcome = AssertUnwindSafe(action.call(client, &envelope.data, Reply))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message(&*panic))));

            match outcome.map_err(DispatchError::Handler)? {
                ActionResult::Accepted => continue,
                terminal => return Ok(Some(terminal)),
            }
        }
        Ok(None)
    }

    /// Parse a raw frame, run its chain and send any terminal reply back to
    /// the caller. Every failure becomes a rejection; nothing propagates.
    pub async fn dispatch(&self, client: &Client, raw: &str) {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                let partial = PartialEnvelope::salvage(raw);
                tracing::debug!(conn_id = %client.id(), error = %err, "rejecting invalid envelope");
                let correlation_id = partial
                    .correlation_id
                    .unwrap_or_else(|| prefixed_ulid(prefix::SYNTHETIC_CORRELATION));
                let result = rejection(&err, json!(partial.kind), partial.data.unwrap_or(Value::Null));
                client.reply(envelope::serialize_response(&correlation_id, &result));
                return;
            }
        };

        let result = match self.run(client, &envelope).await {
            Ok(None) => {
                tracing::debug!(conn_id = %client.id(), kind = %envelope.kind, "chain accepted");
                return;
            }
            Ok(Some(result)) => result,
            Err(err) => {
                match &err {
                    DispatchError::Handler(source) => tracing::warn!(
                        conn_id = %client.id(),
                        kind = %envelope.kind,
                        error = %source,
                        "action failed"
                    ),
                    _ => tracing::debug!(
                        conn_id = %client.id(),
                        kind = %envelope.kind,
                        error = %err,
                        "dispatch rejected"
                    ),
                }
                rejection(&err, json!(envelope.kind), envelope.data.clone())
            }
        };

        client.reply(envelope.to_response(&result));
    }
}

fn rejection(err: &DispatchError, kind: Value, data: Value) -> ActionResult {
    let mut detail = Map::new();
    detail.insert("type".into(), kind);
    detail.insert("data".into(), data);
    Reply.reject(err.to_string(), Value::Object(detail))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("action panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("action panicked: {msg}")
    } else {
        "action panicked".to_string()
    }
}
