//! Request/reply bridge over a message broker.
//!
//! Connects independently deployed process roles (an API gateway, bot
//! shard processes, and VM agents controlling containerized game
//! servers) through typed method calls over RabbitMQ. The bridge turns a
//! logical target into a queue name, fire-and-forget broker delivery into
//! an awaitable call, and dispatches inbound requests through a per-role
//! method registry.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warren::prelude::*;
//!
//! let config = Arc::new(BridgeConfig::from_env()?);
//! let transport = Arc::new(AmqpTransport::connect(Arc::clone(&config)).await?);
//! let bridge = Bridge::new(
//!     NodeIdentity::new(NodeRole::Gateway, "api"),
//!     config,
//!     transport,
//!     MethodRegistry::new(),
//!     (),
//! )?;
//! bridge.init().await?;
//! bridge.receive_messages().await?;
//!
//! let echo: ServiceEcho = bridge
//!     .call(
//!         &Target::vm_agent("v1"),
//!         warren::vm::VM_STOP_SERVICE,
//!         &ServiceCommandParams { vm_id: "v1".into(), service_id: "svc1".into() },
//!         std::time::Duration::from_secs(5),
//!     )
//!     .await?;
//! ```

pub mod bridge;
pub mod config;
pub mod envelope;
pub mod error;
pub mod guard;
pub mod hash;
pub mod metrics;
pub mod pending;
pub mod registry;
pub mod routing;
pub mod snowflake;
pub mod testing;
pub mod transport;
pub mod types;
pub mod vm;

/// Prelude module for convenient glob imports.
pub mod prelude {
    pub use crate::bridge::Bridge;
    pub use crate::config::BridgeConfig;
    pub use crate::error::BridgeError;
    pub use crate::registry::{HandlerError, Method, MethodRegistry};
    pub use crate::transport::amqp::AmqpTransport;
    pub use crate::transport::Transport;
    pub use crate::types::{NodeIdentity, NodeRole, QueueName, Target};
    pub use crate::vm::{ServiceCommandParams, ServiceControl, ServiceEcho, VmContext};
}
