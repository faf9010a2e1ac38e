//! VM-agent role: execution context and method handlers.
//!
//! A VM agent controls containerized game-server workloads on one host.
//! Its execution context wraps the container-control client behind the
//! [`ServiceControl`] trait and serializes mutating commands per service
//! id, since the bridge itself gives no cross-call ordering guarantee.

use crate::guard::TargetLocks;
use crate::registry::{HandlerError, Method, MethodRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Wire method names served by every VM agent.
pub const VM_STOP_SERVICE: &str = "vm-stopService";
pub const VM_START_SERVICE: &str = "vm-startService";

/// Failure inside the container-control client.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ControlError {
    pub message: String,
}

impl ControlError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Container-control client a VM agent drives.
///
/// Failures must surface as `Err`, never as a panic; the handler turns
/// them into error replies and the agent keeps serving.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn stop_service(&self, service_id: &str) -> Result<(), ControlError>;
    async fn start_service(&self, service_id: &str) -> Result<(), ControlError>;
}

/// Execution context injected into every VM-agent handler.
pub struct VmContext {
    control: Arc<dyn ServiceControl>,
    locks: TargetLocks,
}

impl VmContext {
    pub fn new(control: Arc<dyn ServiceControl>) -> Self {
        Self {
            control,
            locks: TargetLocks::new(),
        }
    }
}

/// Parameters for the stop/start service commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCommandParams {
    pub vm_id: String,
    pub service_id: String,
}

/// Small structured echo returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEcho {
    pub echo: String,
}

fn parse_params(payload: Value) -> Result<ServiceCommandParams, HandlerError> {
    serde_json::from_value(payload)
        .map_err(|e| HandlerError::with_source("invalid service command params", e))
}

struct StopService;

#[async_trait]
impl Method<VmContext> for StopService {
    fn name(&self) -> &'static str {
        VM_STOP_SERVICE
    }

    async fn call(&self, payload: Value, ctx: Arc<VmContext>) -> Result<Value, HandlerError> {
        let params = parse_params(payload)?;
        // Start/stop of the same service never interleave.
        let _guard = ctx.locks.lock(&params.service_id).await;
        ctx.control
            .stop_service(&params.service_id)
            .await
            .map_err(|e| HandlerError::with_source("failed to stop service", e))?;

        let echo = ServiceEcho {
            echo: format!("Service {} has been stopped", params.service_id),
        };
        serde_json::to_value(echo).map_err(|e| HandlerError::with_source("encode echo", e))
    }
}

struct StartService;

#[async_trait]
impl Method<VmContext> for StartService {
    fn name(&self) -> &'static str {
        VM_START_SERVICE
    }

    async fn call(&self, payload: Value, ctx: Arc<VmContext>) -> Result<Value, HandlerError> {
        let params = parse_params(payload)?;
        let _guard = ctx.locks.lock(&params.service_id).await;
        ctx.control
            .start_service(&params.service_id)
            .await
            .map_err(|e| HandlerError::with_source("failed to start service", e))?;

        let echo = ServiceEcho {
            echo: format!("Service {} has been started", params.service_id),
        };
        serde_json::to_value(echo).map_err(|e| HandlerError::with_source("encode echo", e))
    }
}

/// Build the method registry every VM agent starts with.
pub fn vm_registry() -> Result<MethodRegistry<VmContext>, crate::error::BridgeError> {
    let mut registry = MethodRegistry::new();
    registry.register(Arc::new(StopService))?;
    registry.register(Arc::new(StartService))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{RequestEnvelope, CODE_HANDLER_ERROR};
    use crate::snowflake::Snowflake;
    use crate::testing::StubControl;
    use serde_json::json;

    fn request(method: &str) -> RequestEnvelope {
        RequestEnvelope {
            method: method.into(),
            correlation_id: Snowflake(1),
            reply_to: None,
            payload: json!({"vmId": "v1", "serviceId": "svc1"}),
        }
    }

    #[tokio::test]
    async fn stop_service_echoes_and_calls_control() {
        let control = StubControl::new();
        let registry = vm_registry().unwrap();
        let ctx = Arc::new(VmContext::new(control.clone()));

        let reply = registry.dispatch(&request(VM_STOP_SERVICE), ctx).await;
        assert!(reply.error.is_none());
        assert_eq!(
            reply.payload,
            json!({"echo": "Service svc1 has been stopped"})
        );
        assert_eq!(*control.stopped.lock(), vec!["svc1".to_string()]);
    }

    #[tokio::test]
    async fn start_service_echoes() {
        let control = StubControl::new();
        let registry = vm_registry().unwrap();
        let ctx = Arc::new(VmContext::new(control.clone()));

        let reply = registry.dispatch(&request(VM_START_SERVICE), ctx).await;
        assert_eq!(
            reply.payload,
            json!({"echo": "Service svc1 has been started"})
        );
    }

    #[tokio::test]
    async fn control_failure_becomes_error_reply() {
        let control = StubControl::new();
        control.set_failure("docker daemon unreachable");
        let registry = vm_registry().unwrap();
        let ctx = Arc::new(VmContext::new(control.clone()));

        let reply = registry.dispatch(&request(VM_STOP_SERVICE), ctx).await;
        let err = reply.error.expect("expected error reply");
        assert_eq!(err.code, CODE_HANDLER_ERROR);
        assert!(err.message.contains("failed to stop service"));
        assert!(control.stopped.lock().is_empty());
    }

    #[tokio::test]
    async fn bad_params_become_error_reply() {
        let control = StubControl::new();
        let registry = vm_registry().unwrap();
        let ctx = Arc::new(VmContext::new(control));

        let mut req = request(VM_STOP_SERVICE);
        req.payload = json!({"wrong": true});
        let reply = registry.dispatch(&req, ctx).await;
        let err = reply.error.expect("expected error reply");
        assert_eq!(err.code, CODE_HANDLER_ERROR);
        assert!(err.message.contains("invalid service command params"));
    }
}
