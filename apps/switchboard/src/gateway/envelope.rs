//! Envelope codec: inbound request parsing and outbound wire frames.

use serde_json::{Map, Value};

use crate::error::DispatchError;

use super::router::ActionResult;

// ---------------------------------------------------------------------------
// Wire keys
// ---------------------------------------------------------------------------

pub const CORRELATION_ID: &str = "correlationId";
pub const TYPE: &str = "type";
pub const DATA: &str = "data";

/// Older clients send the correlation id under this key.
pub const LEGACY_CORRELATION_ID: &str = "uuid";

const REQUIRED_KEYS: [&str; 2] = [CORRELATION_ID, TYPE];

// ---------------------------------------------------------------------------
// Client → Server envelope
// ---------------------------------------------------------------------------

/// A validated inbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Caller-chosen id echoed back on the terminal reply.
    pub correlation_id: String,
    /// Selects the action chain.
    pub kind: String,
    /// Request payload, `{}` when the client omitted it.
    pub data: Value,
}

impl Envelope {
    /// Parse and validate a raw text frame.
    ///
    /// Fails with [`DispatchError::Malformed`] when the frame is not a JSON
    /// object or a mandatory key has the wrong shape, and with
    /// [`DispatchError::MissingFields`] listing every absent mandatory key.
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        let Value::Object(mut body) = serde_json::from_str::<Value>(raw)? else {
            return Err(DispatchError::Malformed("expected a JSON object".into()));
        };
        promote_legacy_id(&mut body);

        let missing: Vec<&'static str> = REQUIRED_KEYS
            .into_iter()
            .filter(|key| body.get(*key).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(DispatchError::MissingFields(missing));
        }

        let correlation_id = take_string(&mut body, CORRELATION_ID)?;
        let kind = take_string(&mut body, TYPE)?;
        let data = match body.remove(DATA) {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(data) => data,
        };

        Ok(Self {
            correlation_id,
            kind,
            data,
        })
    }

    /// Wire form of a terminal reply to this envelope.
    pub fn to_response(&self, result: &ActionResult) -> String {
        serialize_response(&self.correlation_id, result)
    }
}

/// Whatever could be recovered from a frame that failed validation.
///
/// Used to address a best-effort rejection when [`Envelope::parse`] fails.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PartialEnvelope {
    pub correlation_id: Option<String>,
    pub kind: Option<String>,
    pub data: Option<Value>,
}

impl PartialEnvelope {
    pub fn salvage(raw: &str) -> Self {
        let Ok(Value::Object(mut body)) = serde_json::from_str::<Value>(raw) else {
            return Self::default();
        };
        promote_legacy_id(&mut body);

        let string_field = |body: &Map<String, Value>, key: &str| {
            body.get(key).and_then(Value::as_str).map(str::to_owned)
        };
        Self {
            correlation_id: string_field(&body, CORRELATION_ID),
            kind: string_field(&body, TYPE),
            data: body.remove(DATA).filter(|d| !d.is_null()),
        }
    }
}

fn promote_legacy_id(body: &mut Map<String, Value>) {
    if !body.contains_key(CORRELATION_ID) {
        if let Some(id) = body.remove(LEGACY_CORRELATION_ID) {
            body.insert(CORRELATION_ID.to_string(), id);
        }
    }
}

fn take_string(body: &mut Map<String, Value>, key: &str) -> Result<String, DispatchError> {
    match body.remove(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(DispatchError::Malformed(format!("'{key}' must be a string"))),
    }
}

// ---------------------------------------------------------------------------
// Server → Client frames
// ---------------------------------------------------------------------------

/// Broadcast frame: `{ type, data }`. Broadcasts carry no correlation id, and
/// a `null` payload goes out as `{}`.
pub fn serialize(kind: &str, data: &Value) -> String {
    if data.is_null() {
        return serde_json::json!({ TYPE: kind, DATA: empty_object() }).to_string();
    }
    serde_json::json!({ TYPE: kind, DATA: data }).to_string()
}

/// Serde default for optional `data` payloads.
pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Reply frame: `{ correlationId, data }` where `data` is the action result.
pub fn serialize_response(correlation_id: &str, result: &ActionResult) -> String {
    serde_json::json!({
        CORRELATION_ID: correlation_id,
        DATA: result.to_payload(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse_value(raw: &str) -> Value {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn parse_full_envelope() {
        let env = Envelope::parse(r#"{"correlationId":"1","type":"chat","data":{"text":"hi"}}"#)
            .unwrap();
        assert_eq!(env.correlation_id, "1");
        assert_eq!(env.kind, "chat");
        assert_eq!(env.data, json!({"text": "hi"}));
    }

    #[test]
    fn data_defaults_to_empty_object() {
        let env = Envelope::parse(r#"{"correlationId":"1","type":"ping"}"#).unwrap();
        assert_eq!(env.data, json!({}));

        let env = Envelope::parse(r#"{"correlationId":"1","type":"ping","data":null}"#).unwrap();
        assert_eq!(env.data, json!({}));
    }

    #[test]
    fn data_is_passed_through_unmodified() {
        let env =
            Envelope::parse(r#"{"correlationId":"1","type":"t","data":{"a":[1,2],"b":null}}"#)
                .unwrap();
        assert_eq!(env.data, json!({"a": [1, 2], "b": null}));
    }

    #[test]
    fn missing_fields_are_all_listed() {
        match Envelope::parse(r#"{"data":{}}"#) {
            Err(DispatchError::MissingFields(keys)) => {
                assert_eq!(keys, vec![CORRELATION_ID, TYPE]);
            }
            other => panic!("expected MissingFields, got {other:?}"),
        }

        match Envelope::parse(r#"{"correlationId":"7"}"#) {
            Err(DispatchError::MissingFields(keys)) => assert_eq!(keys, vec![TYPE]),
            other => panic!("expected MissingFields, got {other:?}"),
        }
    }

    #[test]
    fn null_counts_as_missing() {
        assert!(matches!(
            Envelope::parse(r#"{"correlationId":null,"type":"x"}"#),
            Err(DispatchError::MissingFields(_))
        ));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(Envelope::parse("not json"), Err(DispatchError::Malformed(_))));
        assert!(matches!(Envelope::parse("[1,2]"), Err(DispatchError::Malformed(_))));
        assert!(matches!(
            Envelope::parse(r#"{"correlationId":1,"type":"x"}"#),
            Err(DispatchError::Malformed(_))
        ));
    }

    #[test]
    fn legacy_uuid_key_is_accepted() {
        let env = Envelope::parse(r#"{"uuid":"abc","type":"ping"}"#).unwrap();
        assert_eq!(env.correlation_id, "abc");
    }

    #[test]
    fn salvage_recovers_partial_fields() {
        let partial = PartialEnvelope::salvage(r#"{"correlationId":"9","data":{"x":1}}"#);
        assert_eq!(partial.correlation_id.as_deref(), Some("9"));
        assert_eq!(partial.kind, None);
        assert_eq!(partial.data, Some(json!({"x": 1})));

        assert_eq!(PartialEnvelope::salvage("garbage"), PartialEnvelope::default());
    }

    #[test]
    fn broadcast_frame_has_no_correlation_id() {
        let frame = parse_value(&serialize("chat", &json!({"text": "yo"})));
        assert_eq!(frame, json!({"type": "chat", "data": {"text": "yo"}}));
    }

    #[test]
    fn broadcast_frame_without_payload_carries_empty_object() {
        let frame = parse_value(&serialize("ping", &Value::Null));
        assert_eq!(frame, json!({"type": "ping", "data": {}}));
    }

    #[test]
    fn response_frame_embeds_correlation_id() {
        let frame = parse_value(&serialize_response(
            "2",
            &ActionResult::Responded {
                data: json!({"msg": "hi"}),
            },
        ));
        assert_eq!(
            frame,
            json!({"correlationId": "2", "data": {"status": "responded", "data": {"msg": "hi"}}})
        );

        let frame = parse_value(&serialize_response(
            "3",
            &ActionResult::Rejected {
                message: "nope".into(),
                data: json!({}),
            },
        ));
        assert_eq!(frame["data"]["status"], "rejected");
        assert_eq!(frame["data"]["message"], "nope");
        assert_eq!(frame["data"]["data"], json!({}));
    }
}
