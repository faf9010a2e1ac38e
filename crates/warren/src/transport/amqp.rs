//! RabbitMQ transport backed by lapin.
//!
//! Owns the broker session: initial connect with capped exponential
//! backoff, durable queue declaration, publish, and consumer pumps that
//! transparently reconnect and re-subscribe after a session loss. Publish
//! fails fast while the session is down; pending calls keep racing their
//! own deadlines across the gap.

use super::Transport;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::types::QueueName;
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

struct Session {
    /// Kept alive for the channel's lifetime; dropping it closes the session.
    _connection: Connection,
    channel: Channel,
}

struct Inner {
    config: Arc<BridgeConfig>,
    session: RwLock<Option<Session>>,
    /// Queues to re-declare on every reconnect.
    declared: Mutex<HashSet<String>>,
    /// Single-flight gate so concurrent pumps trigger one reconnect.
    reconnect_gate: tokio::sync::Mutex<()>,
}

/// Lapin-backed [`Transport`].
pub struct AmqpTransport {
    inner: Arc<Inner>,
}

impl AmqpTransport {
    /// Connect to the broker, retrying with exponential backoff up to
    /// `connect_max_retries` attempts.
    pub async fn connect(config: Arc<BridgeConfig>) -> Result<Self, BridgeError> {
        config.validate()?;
        let mut backoff = config.reconnect_initial_backoff;
        let mut last_error: Option<lapin::Error> = None;

        for attempt in 1..=config.connect_max_retries {
            match Inner::establish(&config).await {
                Ok(session) => {
                    tracing::info!(url = %config.url, attempt, "connected to broker");
                    return Ok(Self {
                        inner: Arc::new(Inner {
                            config,
                            session: RwLock::new(Some(session)),
                            declared: Mutex::new(HashSet::new()),
                            reconnect_gate: tokio::sync::Mutex::new(()),
                        }),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        url = %config.url,
                        attempt,
                        error = %e,
                        "broker connection attempt failed"
                    );
                    last_error = Some(e);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(config.reconnect_max_backoff);
                }
            }
        }

        Err(match last_error {
            Some(e) => BridgeError::connection(
                format!(
                    "broker unreachable after {} attempts",
                    config.connect_max_retries
                ),
                e,
            ),
            None => BridgeError::disconnected("broker unreachable"),
        })
    }
}

impl Inner {
    async fn establish(config: &BridgeConfig) -> Result<Session, lapin::Error> {
        let connection =
            Connection::connect(&config.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await?;
        Ok(Session {
            _connection: connection,
            channel,
        })
    }

    /// Current channel, failing fast when the session is down.
    async fn channel(&self) -> Result<Channel, BridgeError> {
        let session = self.session.read().await;
        match session.as_ref() {
            Some(s) if s.channel.status().connected() => Ok(s.channel.clone()),
            _ => Err(BridgeError::disconnected("broker session is down")),
        }
    }

    fn queue_arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        if let Some(dlx) = &self.config.dead_letter_exchange {
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dlx.as_str().into()),
            );
        }
        args
    }

    async fn declare_on(&self, channel: &Channel, queue: &str) -> Result<(), lapin::Error> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                self.queue_arguments(),
            )
            .await?;
        Ok(())
    }

    /// Re-establish the session and re-declare every known queue. Blocks
    /// until the broker is back; only one caller does the work, the rest
    /// wait on the gate.
    async fn reconnect(&self) {
        let _gate = self.reconnect_gate.lock().await;
        if self.channel().await.is_ok() {
            return;
        }
        self.session.write().await.take();

        let mut backoff = self.config.reconnect_initial_backoff;
        loop {
            match Self::establish(&self.config).await {
                Ok(session) => {
                    let queues: Vec<String> = self.declared.lock().iter().cloned().collect();
                    let mut declared_ok = true;
                    for queue in &queues {
                        if let Err(e) = self.declare_on(&session.channel, queue).await {
                            tracing::warn!(queue, error = %e, "re-declare failed after reconnect");
                            declared_ok = false;
                            break;
                        }
                    }
                    if declared_ok {
                        *self.session.write().await = Some(session);
                        tracing::info!(url = %self.config.url, "broker session re-established");
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.config.url, error = %e, "reconnect attempt failed");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.reconnect_max_backoff);
        }
    }

    /// Consumer pump: forwards deliveries into `tx`, reconnecting and
    /// re-subscribing until the receiver is dropped.
    async fn pump(self: Arc<Self>, queue: QueueName, tx: mpsc::Sender<Vec<u8>>) {
        loop {
            let channel = match self.channel().await {
                Ok(c) => c,
                Err(_) => {
                    self.reconnect().await;
                    continue;
                }
            };

            let consumer = channel
                .basic_consume(
                    queue.as_ref(),
                    &format!("warren-{queue}"),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await;
            let mut consumer = match consumer {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "basic_consume failed");
                    self.reconnect().await;
                    continue;
                }
            };

            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        // Ack only once the consume loop holds the message;
                        // an unacked delivery is redelivered after a crash.
                        if tx.send(delivery.data).await.is_err() {
                            // Subscriber gone; the unacked delivery goes
                            // back to the queue.
                            return;
                        }
                        if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                            tracing::warn!(queue = %queue, error = %e, "ack failed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(queue = %queue, error = %e, "consumer delivery error");
                        break;
                    }
                }
            }

            if tx.is_closed() {
                return;
            }
            tracing::warn!(queue = %queue, "consumer stream ended, reconnecting");
            self.reconnect().await;
            // Give the broker a beat before re-subscribing.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    async fn declare_queue(&self, queue: &QueueName) -> Result<(), BridgeError> {
        let channel = self.inner.channel().await?;
        self.inner
            .declare_on(&channel, queue.as_ref())
            .await
            .map_err(|e| BridgeError::connection(format!("failed to declare queue {queue}"), e))?;
        self.inner.declared.lock().insert(queue.as_ref().to_string());
        Ok(())
    }

    async fn publish(&self, queue: &QueueName, body: Vec<u8>) -> Result<(), BridgeError> {
        let channel = self.inner.channel().await?;
        channel
            .basic_publish(
                "",
                queue.as_ref(),
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2), // persistent
            )
            .await
            .map_err(|e| BridgeError::connection(format!("failed to publish to {queue}"), e))?;
        Ok(())
    }

    async fn subscribe(&self, queue: &QueueName) -> Result<mpsc::Receiver<Vec<u8>>, BridgeError> {
        self.declare_queue(queue).await?;
        let (tx, rx) = mpsc::channel(self.inner.config.inbound_buffer);
        tokio::spawn(Arc::clone(&self.inner).pump(queue.clone(), tx));
        Ok(rx)
    }
}
