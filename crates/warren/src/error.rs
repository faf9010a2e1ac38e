use crate::snowflake::Snowflake;

/// Errors that can occur in the bridge messaging layer.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("broker connection failed: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("call {method} ({correlation_id}) timed out")]
    Timeout {
        method: String,
        correlation_id: Snowflake,
    },

    #[error("no handler registered for method {method}")]
    UnknownMethod { method: String },

    #[error("handler for {method} failed: {message}")]
    Handler { method: String, message: String },

    #[error("duplicate handler registration for method {method}")]
    DuplicateMethod { method: String },

    #[error("malformed message: {reason}")]
    MalformedMessage {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("bridge is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    ClockDriftExceeded(#[from] crate::snowflake::SnowflakeError),
}

impl BridgeError {
    /// Connection failure with an underlying transport error.
    pub fn connection(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        BridgeError::Connection {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Connection failure without a transport-level cause.
    pub fn disconnected(reason: impl Into<String>) -> Self {
        BridgeError::Connection {
            reason: reason.into(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = BridgeError::UnknownMethod {
            method: "vm-rebootService".into(),
        };
        assert_eq!(
            err.to_string(),
            "no handler registered for method vm-rebootService"
        );

        let err = BridgeError::Handler {
            method: "vm-stopService".into(),
            message: "docker unavailable".into(),
        };
        assert_eq!(
            err.to_string(),
            "handler for vm-stopService failed: docker unavailable"
        );

        let err = BridgeError::MalformedMessage {
            reason: "bad payload".into(),
            source: None,
        };
        assert_eq!(err.to_string(), "malformed message: bad payload");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BridgeError>();
    }
}
