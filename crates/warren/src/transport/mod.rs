//! Broker transport seam.
//!
//! The bridge talks to the broker only through [`Transport`]; the AMQP
//! backend is the production implementation and the memory backend runs
//! whole multi-node scenarios in-process for tests.

pub mod amqp;
pub mod memory;

use crate::error::BridgeError;
use crate::types::QueueName;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Transport primitives the bridge needs from a broker session.
///
/// Delivery is at-least-once; `publish` is fire-and-forget from the
/// caller's perspective. Implementations own reconnection: a subscription
/// survives connection loss without caller intervention.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Idempotently declare a durable queue so messages survive a consumer
    /// restart. Safe to call repeatedly, including after reconnect.
    async fn declare_queue(&self, queue: &QueueName) -> Result<(), BridgeError>;

    /// Publish one message body to a queue. Fails fast with
    /// `BridgeError::Connection` while the session is down.
    async fn publish(&self, queue: &QueueName, body: Vec<u8>) -> Result<(), BridgeError>;

    /// Start consuming a queue. Delivered bodies arrive on the returned
    /// channel; the subscription is re-established after reconnects until
    /// the receiver is dropped.
    async fn subscribe(&self, queue: &QueueName) -> Result<mpsc::Receiver<Vec<u8>>, BridgeError>;
}
