use crate::error::BridgeError;
use crate::snowflake::Snowflake;
use crate::types::QueueName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind-tagged wire message exchanged between bridge nodes.
///
/// Encoded as JSON on the broker; field names follow the wire contract
/// (`correlationId`, `replyTo`), not Rust convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Envelope {
    Request(RequestEnvelope),
    Reply(ReplyEnvelope),
}

/// A method call addressed to a target queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub method: String,
    pub correlation_id: Snowflake,
    /// Queue the reply must be published to. Absent for fire-and-forget
    /// notifications, which expect no reply at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<QueueName>,
    #[serde(default)]
    pub payload: Value,
}

/// The outcome of a dispatched request, published to its `reply_to` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub method: String,
    pub correlation_id: Snowflake,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// Structured error carried in a reply instead of a raw exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

/// Error code for a dispatch-time handler lookup miss.
pub const CODE_UNKNOWN_METHOD: &str = "unknown-method";
/// Error code for a handler that returned a failure or panicked.
pub const CODE_HANDLER_ERROR: &str = "handler-error";

impl ReplyEnvelope {
    /// Successful reply carrying the handler's payload.
    pub fn ok(request: &RequestEnvelope, payload: Value) -> Self {
        Self {
            method: request.method.clone(),
            correlation_id: request.correlation_id,
            payload,
            error: None,
        }
    }

    /// Error reply with a structured code and message.
    pub fn err(request: &RequestEnvelope, code: &str, message: impl Into<String>) -> Self {
        Self {
            method: request.method.clone(),
            correlation_id: request.correlation_id,
            payload: Value::Null,
            error: Some(WireError {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    /// Convert this reply into the caller-side result, mapping wire error
    /// codes back onto the bridge error taxonomy.
    pub fn into_result(self) -> Result<Value, BridgeError> {
        match self.error {
            None => Ok(self.payload),
            Some(e) if e.code == CODE_UNKNOWN_METHOD => Err(BridgeError::UnknownMethod {
                method: self.method,
            }),
            Some(e) => Err(BridgeError::Handler {
                method: self.method,
                message: e.message,
            }),
        }
    }
}

impl Envelope {
    /// Encode for publishing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BridgeError> {
        serde_json::to_vec(self).map_err(|e| BridgeError::MalformedMessage {
            reason: format!("failed to encode envelope: {e}"),
            source: Some(Box::new(e)),
        })
    }

    /// Decode a delivered broker message body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(bytes).map_err(|e| BridgeError::MalformedMessage {
            reason: format!("failed to decode envelope: {e}"),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> RequestEnvelope {
        RequestEnvelope {
            method: "vm-stopService".into(),
            correlation_id: Snowflake(1000),
            reply_to: Some(QueueName::new("reply-gateway-api")),
            payload: json!({"vmId": "v1", "serviceId": "svc1"}),
        }
    }

    #[test]
    fn request_wire_shape() {
        let env = Envelope::Request(sample_request());
        let value: Value = serde_json::from_slice(&env.to_bytes().unwrap()).unwrap();
        assert_eq!(value["kind"], "request");
        assert_eq!(value["method"], "vm-stopService");
        assert_eq!(value["correlationId"], "1000");
        assert_eq!(value["replyTo"], "reply-gateway-api");
        assert_eq!(value["payload"]["serviceId"], "svc1");
    }

    #[test]
    fn request_round_trip() {
        let env = Envelope::Request(sample_request());
        let decoded = Envelope::from_bytes(&env.to_bytes().unwrap()).unwrap();
        match decoded {
            Envelope::Request(r) => {
                assert_eq!(r.method, "vm-stopService");
                assert_eq!(r.correlation_id, Snowflake(1000));
                assert_eq!(r.reply_to, Some(QueueName::new("reply-gateway-api")));
            }
            _ => panic!("expected Request variant"),
        }
    }

    #[test]
    fn notification_omits_reply_to() {
        let mut req = sample_request();
        req.reply_to = None;
        let value: Value =
            serde_json::from_slice(&Envelope::Request(req).to_bytes().unwrap()).unwrap();
        assert!(value.get("replyTo").is_none());
    }

    #[test]
    fn ok_reply_resolves_to_payload() {
        let reply = ReplyEnvelope::ok(&sample_request(), json!({"echo": "done"}));
        let value = reply.into_result().unwrap();
        assert_eq!(value["echo"], "done");
    }

    #[test]
    fn handler_error_reply_maps_to_handler_error() {
        let reply = ReplyEnvelope::err(&sample_request(), CODE_HANDLER_ERROR, "docker down");
        match reply.into_result() {
            Err(BridgeError::Handler { method, message }) => {
                assert_eq!(method, "vm-stopService");
                assert_eq!(message, "docker down");
            }
            other => panic!("expected Handler error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_method_reply_maps_to_unknown_method() {
        let reply = ReplyEnvelope::err(&sample_request(), CODE_UNKNOWN_METHOD, "no such method");
        match reply.into_result() {
            Err(BridgeError::UnknownMethod { method }) => {
                assert_eq!(method, "vm-stopService");
            }
            other => panic!("expected UnknownMethod error, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_body_is_malformed() {
        let err = Envelope::from_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, BridgeError::MalformedMessage { .. }));
    }

    #[test]
    fn reply_round_trip_preserves_error() {
        let reply = Envelope::Reply(ReplyEnvelope::err(
            &sample_request(),
            CODE_HANDLER_ERROR,
            "boom",
        ));
        let decoded = Envelope::from_bytes(&reply.to_bytes().unwrap()).unwrap();
        match decoded {
            Envelope::Reply(r) => {
                let e = r.error.unwrap();
                assert_eq!(e.code, CODE_HANDLER_ERROR);
                assert_eq!(e.message, "boom");
            }
            _ => panic!("expected Reply variant"),
        }
    }
}
