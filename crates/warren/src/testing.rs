//! In-memory test net for unit and integration testing.
//!
//! Spins up several bridge nodes in one process against a shared
//! [`MemoryBroker`], so whole request/reply scenarios run without a
//! RabbitMQ server. Each node keeps a handle to its own transport, which
//! can be flipped offline to exercise degraded-state behavior.

use std::sync::Arc;
use std::time::Duration;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::registry::MethodRegistry;
use crate::transport::memory::{MemoryBroker, MemoryTransport};
use crate::types::{NodeIdentity, NodeRole};
use crate::vm::{vm_registry, ControlError, ServiceControl, VmContext};
use async_trait::async_trait;
use parking_lot::Mutex;

/// A set of in-process bridge nodes sharing one in-memory broker.
pub struct TestNet {
    broker: Arc<MemoryBroker>,
    config: Arc<BridgeConfig>,
}

/// One node spawned on a [`TestNet`]: the bridge plus its transport handle.
pub struct TestNode<C> {
    pub bridge: Arc<Bridge<C>>,
    pub transport: Arc<MemoryTransport>,
}

impl TestNet {
    pub fn new() -> Self {
        Self::with_shard_count(4)
    }

    pub fn with_shard_count(shard_count: u32) -> Self {
        let config = BridgeConfig {
            url: "amqp://in-memory".to_string(),
            shard_count,
            default_call_timeout: Duration::from_millis(500),
            sweep_interval: Duration::from_millis(20),
            ..Default::default()
        };
        Self {
            broker: MemoryBroker::new(),
            config: Arc::new(config),
        }
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    pub fn config(&self) -> Arc<BridgeConfig> {
        Arc::clone(&self.config)
    }

    /// Spawn a node: declare its queues and start consuming.
    pub async fn node<C: Send + Sync + 'static>(
        &self,
        identity: NodeIdentity,
        registry: MethodRegistry<C>,
        context: C,
    ) -> Result<TestNode<C>, BridgeError> {
        let transport = Arc::new(MemoryTransport::new(Arc::clone(&self.broker)));
        let bridge = Arc::new(Bridge::new(
            identity,
            Arc::clone(&self.config),
            Arc::clone(&transport) as Arc<dyn crate::transport::Transport>,
            registry,
            context,
        )?);
        bridge.init().await?;
        bridge.receive_messages().await?;
        Ok(TestNode { bridge, transport })
    }

    /// Gateway node with no served methods.
    pub async fn gateway(&self) -> Result<TestNode<()>, BridgeError> {
        self.node(
            NodeIdentity::new(NodeRole::Gateway, "api"),
            MethodRegistry::new(),
            (),
        )
        .await
    }

    /// VM-agent node serving the standard vm methods.
    pub async fn vm_agent(
        &self,
        vm_id: &str,
        control: Arc<dyn ServiceControl>,
    ) -> Result<TestNode<VmContext>, BridgeError> {
        self.node(
            NodeIdentity::new(NodeRole::VmAgent, vm_id),
            vm_registry()?,
            VmContext::new(control),
        )
        .await
    }
}

impl Default for TestNet {
    fn default() -> Self {
        Self::new()
    }
}

/// Recording [`ServiceControl`] stub; can be told to fail.
pub struct StubControl {
    pub stopped: Mutex<Vec<String>>,
    pub started: Mutex<Vec<String>>,
    pub fail_with: Mutex<Option<String>>,
}

impl StubControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stopped: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        })
    }

    pub fn set_failure(&self, message: impl Into<String>) {
        *self.fail_with.lock() = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *self.fail_with.lock() = None;
    }

    fn check_fail(&self) -> Result<(), ControlError> {
        match self.fail_with.lock().as_deref() {
            Some(message) => Err(ControlError::msg(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ServiceControl for StubControl {
    async fn stop_service(&self, service_id: &str) -> Result<(), ControlError> {
        self.check_fail()?;
        self.stopped.lock().push(service_id.to_string());
        Ok(())
    }

    async fn start_service(&self, service_id: &str) -> Result<(), ControlError> {
        self.check_fail()?;
        self.started.lock().push(service_id.to_string());
        Ok(())
    }
}
