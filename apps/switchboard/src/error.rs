use thiserror::Error;

/// Everything that can go wrong between receiving a text frame and finishing
/// its action chain.
///
/// None of these terminate the connection: the router converts each one into
/// a `rejected` reply addressed to the sender.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The frame is not a JSON object, or a field has the wrong shape.
    #[error("Socket Message Violation: Malformed message body ({0})")]
    Malformed(String),

    /// One or more mandatory envelope keys are absent.
    #[error("Socket Message Violation: Missing required '{}' key(s) in message body", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// No action chain is registered for the envelope's type.
    #[error("Action Handlers Not Found: No handlers registered for message type '{0}'")]
    RouteNotFound(String),

    /// A handler in the chain returned an error.
    #[error("{0}")]
    Handler(anyhow::Error),
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// A send to a connection whose transport has already gone away.
#[derive(Debug, Error)]
#[error("connection {0} is closed")]
pub struct SendError(pub String);

/// Failures talking to the external publish/subscribe bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connect(String),

    #[error("bus publish to '{topic}' failed: {message}")]
    Publish { topic: String, message: String },

    #[error("bus subscribe failed: {0}")]
    Subscribe(String),

    #[error("bus payload is not a broadcast envelope: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!(?err, "redis error");
        Self::Connect(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_lists_every_key() {
        let err = DispatchError::MissingFields(vec!["correlationId", "type"]);
        assert_eq!(
            err.to_string(),
            "Socket Message Violation: Missing required 'correlationId, type' key(s) in message body"
        );
    }

    #[test]
    fn route_not_found_names_the_type() {
        let err = DispatchError::RouteNotFound("unknown".into());
        assert!(err.to_string().contains("'unknown'"));
        assert!(err.to_string().contains("No handlers"));
    }

    #[test]
    fn handler_failure_keeps_the_message_text() {
        let err = DispatchError::Handler(anyhow::anyhow!("database unavailable"));
        assert_eq!(err.to_string(), "database unavailable");
    }
}
