//! Per-role method registry.
//!
//! Each process role builds one registry at startup: a closed table of
//! method descriptors, constructed explicitly and passed into the bridge.
//! The dispatch key on the wire stays a string for interoperability, but
//! registration is fail-fast so the set of known methods is fixed before
//! the consume loop starts.

use crate::envelope::{ReplyEnvelope, RequestEnvelope, CODE_HANDLER_ERROR, CODE_UNKNOWN_METHOD};
use crate::error::BridgeError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Failure raised by a method handler, carried back as an error reply.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// One named method a node serves.
///
/// Handlers receive only the deserialized payload and the node's execution
/// context `C`; they must not reach into global mutable state.
#[async_trait]
pub trait Method<C>: Send + Sync {
    /// Wire name of the method, e.g. `vm-stopService`.
    fn name(&self) -> &'static str;

    async fn call(&self, payload: Value, ctx: Arc<C>) -> Result<Value, HandlerError>;
}

type FnHandler<C> =
    Box<dyn Fn(Value, Arc<C>) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

struct FnMethod<C> {
    name: &'static str,
    handler: FnHandler<C>,
}

#[async_trait]
impl<C: Send + Sync + 'static> Method<C> for FnMethod<C> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn call(&self, payload: Value, ctx: Arc<C>) -> Result<Value, HandlerError> {
        (self.handler)(payload, ctx).await
    }
}

/// Table mapping method names to handlers for one process role.
pub struct MethodRegistry<C> {
    methods: HashMap<&'static str, Arc<dyn Method<C>>>,
}

impl<C: Send + Sync + 'static> MethodRegistry<C> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }

    /// Register a method. Exactly one handler per name; a duplicate is a
    /// startup-time error, never a silent overwrite.
    pub fn register(&mut self, method: Arc<dyn Method<C>>) -> Result<(), BridgeError> {
        let name = method.name();
        if self.methods.contains_key(name) {
            return Err(BridgeError::DuplicateMethod {
                method: name.to_string(),
            });
        }
        self.methods.insert(name, method);
        Ok(())
    }

    /// Register a closure as a method handler.
    pub fn register_fn<F, Fut>(&mut self, name: &'static str, f: F) -> Result<(), BridgeError>
    where
        F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(Arc::new(FnMethod {
            name,
            handler: Box::new(move |payload, ctx| Box::pin(f(payload, ctx))),
        }))
    }

    /// Names of all registered methods, for startup logging.
    pub fn method_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.methods.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Dispatch a request to its handler and build the reply envelope.
    ///
    /// An absent handler and a handler failure both become structured
    /// error replies; neither crosses the process boundary as a crash.
    pub async fn dispatch(&self, request: &RequestEnvelope, ctx: Arc<C>) -> ReplyEnvelope {
        let Some(method) = self.methods.get(request.method.as_str()) else {
            tracing::warn!(
                method = %request.method,
                correlation_id = %request.correlation_id,
                "no handler registered for inbound method"
            );
            return ReplyEnvelope::err(
                request,
                CODE_UNKNOWN_METHOD,
                format!("no handler registered for method {}", request.method),
            );
        };

        match method.call(request.payload.clone(), ctx).await {
            Ok(payload) => ReplyEnvelope::ok(request, payload),
            Err(e) => {
                tracing::warn!(
                    method = %request.method,
                    correlation_id = %request.correlation_id,
                    error = %e,
                    "handler failed"
                );
                ReplyEnvelope::err(request, CODE_HANDLER_ERROR, e.message)
            }
        }
    }
}

impl<C: Send + Sync + 'static> Default for MethodRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
