//! In-process broker for tests and demos.
//!
//! One [`MemoryBroker`] stands in for the RabbitMQ server; every node in
//! a test gets its own [`MemoryTransport`] handle onto the shared broker.
//! Declared queues buffer published messages until a consumer attaches,
//! messages to undeclared queues go to an inspectable dead-letter store,
//! and a transport can be flipped offline to exercise degraded-state
//! behavior.

use super::Transport;
use crate::error::BridgeError;
use crate::types::QueueName;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 1024;

struct QueueSlot {
    tx: mpsc::Sender<Vec<u8>>,
    /// Taken by the first (only) subscriber.
    rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

/// Shared in-process stand-in for the broker server.
#[derive(Default)]
pub struct MemoryBroker {
    queues: DashMap<String, Arc<QueueSlot>>,
    dead_letters: Mutex<Vec<(QueueName, Vec<u8>)>>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Messages published to queues nobody declared.
    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().len()
    }

    /// Drain the dead-letter store for inspection.
    pub fn take_dead_letters(&self) -> Vec<(QueueName, Vec<u8>)> {
        std::mem::take(&mut self.dead_letters.lock())
    }
}

/// One node's handle onto a shared [`MemoryBroker`].
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
    connected: AtomicBool,
}

impl MemoryTransport {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            connected: AtomicBool::new(true),
        }
    }

    /// Simulate losing the broker session: all operations fail fast until
    /// `set_connected(true)`.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<(), BridgeError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BridgeError::disconnected("memory transport is offline"))
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn declare_queue(&self, queue: &QueueName) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        self.broker
            .queues
            .entry(queue.as_ref().to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
                Arc::new(QueueSlot {
                    tx,
                    rx: Mutex::new(Some(rx)),
                })
            });
        Ok(())
    }

    async fn publish(&self, queue: &QueueName, body: Vec<u8>) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        let slot = match self.broker.queues.get(queue.as_ref()) {
            Some(slot) => Arc::clone(&slot),
            None => {
                // Undeclared target: dead-letter it, observable but not an
                // error for the fire-and-forget publisher.
                tracing::warn!(queue = %queue, "dead-lettering message to undeclared queue");
                self.broker
                    .dead_letters
                    .lock()
                    .push((queue.clone(), body));
                return Ok(());
            }
        };
        slot.tx
            .send(body)
            .await
            .map_err(|_| BridgeError::disconnected(format!("queue {queue} is gone")))
    }

    async fn subscribe(&self, queue: &QueueName) -> Result<mpsc::Receiver<Vec<u8>>, BridgeError> {
        self.ensure_connected()?;
        self.declare_queue(queue).await?;
        let slot = self
            .broker
            .queues
            .get(queue.as_ref())
            .map(|s| Arc::clone(&s))
            .expect("queue declared above");
        let rx = slot.rx.lock().take();
        rx.ok_or_else(|| BridgeError::InvalidConfig {
            reason: format!("queue {queue} already has a consumer"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_before_subscribe_is_buffered() {
        let broker = MemoryBroker::new();
        let t = MemoryTransport::new(Arc::clone(&broker));
        let q = QueueName::new("vm-v1");

        t.declare_queue(&q).await.unwrap();
        t.publish(&q, b"first".to_vec()).await.unwrap();

        let mut rx = t.subscribe(&q).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn undeclared_queue_is_dead_lettered() {
        let broker = MemoryBroker::new();
        let t = MemoryTransport::new(Arc::clone(&broker));

        t.publish(&QueueName::new("vm-ghost"), b"lost".to_vec())
            .await
            .unwrap();
        assert_eq!(broker.dead_letter_count(), 1);
        let letters = broker.take_dead_letters();
        assert_eq!(letters[0].0, QueueName::new("vm-ghost"));
    }

    #[tokio::test]
    async fn offline_transport_fails_fast() {
        let broker = MemoryBroker::new();
        let t = MemoryTransport::new(broker);
        let q = QueueName::new("gateway");
        t.declare_queue(&q).await.unwrap();

        t.set_connected(false);
        let err = t.publish(&q, b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Connection { .. }));

        t.set_connected(true);
        t.publish(&q, b"x".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn two_handles_share_one_broker() {
        let broker = MemoryBroker::new();
        let a = MemoryTransport::new(Arc::clone(&broker));
        let b = MemoryTransport::new(broker);
        let q = QueueName::new("bot-shard-0");

        let mut rx = a.subscribe(&q).await.unwrap();
        b.publish(&q, b"hello".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn second_consumer_is_rejected() {
        let broker = MemoryBroker::new();
        let t = MemoryTransport::new(broker);
        let q = QueueName::new("vm-v1");

        let _rx = t.subscribe(&q).await.unwrap();
        assert!(t.subscribe(&q).await.is_err());
    }
}
