//! Node-local bridge facade.
//!
//! One [`Bridge`] per process composes the transport, the target address
//! resolver, the method registry and the pending-request map. Collaborators
//! (command modules, API routes) only ever touch the bridge: `init()` to
//! declare queues, `receive_messages()` to start consuming, `call()` to
//! reach a remote node.

use crate::config::BridgeConfig;
use crate::envelope::{Envelope, ReplyEnvelope, RequestEnvelope, CODE_HANDLER_ERROR};
use crate::error::BridgeError;
use crate::metrics::BridgeMetrics;
use crate::pending::PendingRequests;
use crate::registry::MethodRegistry;
use crate::routing;
use crate::snowflake::SnowflakeGenerator;
use crate::transport::Transport;
use crate::types::{NodeIdentity, QueueName, Target};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Per-process bridge node.
///
/// `C` is the role-specific execution context injected into every handler
/// invocation; it is constructed once and shared read-mostly.
pub struct Bridge<C> {
    identity: NodeIdentity,
    config: Arc<BridgeConfig>,
    transport: Arc<dyn Transport>,
    registry: Arc<MethodRegistry<C>>,
    context: Arc<C>,
    pending: Arc<PendingRequests>,
    ids: SnowflakeGenerator,
    metrics: Arc<BridgeMetrics>,
    cancel: CancellationToken,
    consuming: AtomicBool,
}

impl<C: Send + Sync + 'static> Bridge<C> {
    pub fn new(
        identity: NodeIdentity,
        config: Arc<BridgeConfig>,
        transport: Arc<dyn Transport>,
        registry: MethodRegistry<C>,
        context: C,
    ) -> Result<Self, BridgeError> {
        Self::with_metrics(
            identity,
            config,
            transport,
            registry,
            context,
            Arc::new(BridgeMetrics::unregistered()),
        )
    }

    pub fn with_metrics(
        identity: NodeIdentity,
        config: Arc<BridgeConfig>,
        transport: Arc<dyn Transport>,
        registry: MethodRegistry<C>,
        context: C,
        metrics: Arc<BridgeMetrics>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let ids = SnowflakeGenerator::for_identity(&identity);
        Ok(Self {
            identity,
            config,
            transport,
            registry: Arc::new(registry),
            context: Arc::new(context),
            pending: Arc::new(PendingRequests::new(Arc::clone(&metrics))),
            ids,
            metrics,
            cancel: CancellationToken::new(),
            consuming: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    /// Calls currently awaiting a reply on this node.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Declare this node's reply queue and role-owned inbound queues.
    ///
    /// Declaration is durable and idempotent, so calling again (e.g. after
    /// a reconnect) never fails.
    pub async fn init(&self) -> Result<(), BridgeError> {
        self.transport
            .declare_queue(&self.identity.reply_queue())
            .await?;
        for queue in routing::owned_queues(&self.identity) {
            self.transport.declare_queue(&queue).await?;
        }
        tracing::info!(
            identity = %self.identity,
            methods = ?self.registry.method_names(),
            "bridge initialised"
        );
        Ok(())
    }

    /// Start the consume loops and the pending-request sweeper.
    ///
    /// Inbound requests are dispatched through the method registry, each
    /// on its own task, and the reply published back to the envelope's
    /// `replyTo`; inbound replies resolve the matching pending call.
    pub async fn receive_messages(&self) -> Result<(), BridgeError> {
        if self.consuming.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut queues = vec![self.identity.reply_queue()];
        queues.extend(routing::owned_queues(&self.identity));

        // Subscribe everything before spawning anything, so a failure
        // here leaves no stray loop behind and the caller can retry.
        let mut subscriptions = Vec::with_capacity(queues.len());
        for queue in queues {
            match self.transport.subscribe(&queue).await {
                Ok(rx) => subscriptions.push((queue, rx)),
                Err(e) => {
                    self.consuming.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }
        for (queue, rx) in subscriptions {
            tokio::spawn(consume_loop(
                queue,
                rx,
                Arc::clone(&self.registry),
                Arc::clone(&self.context),
                Arc::clone(&self.pending),
                Arc::clone(&self.transport),
                Arc::clone(&self.metrics),
                self.cancel.clone(),
            ));
        }

        let pending = Arc::clone(&self.pending);
        let cancel = self.cancel.clone();
        let sweep_interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        pending.sweep();
                    }
                }
            }
        });
        Ok(())
    }

    /// Call a named method on a remote target and await its reply.
    ///
    /// The request and reply payloads are serde round trips; the call can
    /// reject with `Timeout`, `Handler`, `UnknownMethod` or `Connection`.
    #[instrument(skip(self, request), fields(identity = %self.identity, target = %target))]
    pub async fn call<Req, Res>(
        &self,
        target: &Target,
        method: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Res, BridgeError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let payload = serde_json::to_value(request).map_err(|e| BridgeError::MalformedMessage {
            reason: format!("failed to serialize request payload: {e}"),
            source: Some(Box::new(e)),
        })?;
        let value = self.call_raw(target, method, payload, timeout).await?;
        serde_json::from_value(value).map_err(|e| BridgeError::MalformedMessage {
            reason: format!("failed to deserialize reply payload: {e}"),
            source: Some(Box::new(e)),
        })
    }

    /// [`call`](Self::call) with the configured `default_call_timeout`.
    pub async fn call_default<Req, Res>(
        &self,
        target: &Target,
        method: &str,
        request: &Req,
    ) -> Result<Res, BridgeError>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        self.call(target, method, request, self.config.default_call_timeout)
            .await
    }

    /// Untyped variant of [`call`](Self::call).
    pub async fn call_raw(
        &self,
        target: &Target,
        method: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::ShuttingDown);
        }

        let correlation_id = self.ids.next()?;
        let queue = routing::resolve(target, self.config.shard_count);
        let envelope = Envelope::Request(RequestEnvelope {
            method: method.to_string(),
            correlation_id,
            reply_to: Some(self.identity.reply_queue()),
            payload,
        });
        let bytes = envelope.to_bytes()?;

        // Register before publishing so a fast reply can never arrive
        // ahead of its pending entry.
        let rx = self.pending.register(correlation_id, method, timeout);
        self.metrics.calls.inc();

        if let Err(e) = self.transport.publish(&queue, bytes).await {
            self.pending.take(correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_closed)) => Err(BridgeError::MalformedMessage {
                reason: "reply channel closed without a result".to_string(),
                source: None,
            }),
            Err(_elapsed) => {
                // The sweep may not have run yet; remove the entry now so
                // a later reply is discarded rather than resolved.
                if self.pending.take(correlation_id).is_some() {
                    self.metrics.timeouts.inc();
                }
                Err(BridgeError::Timeout {
                    method: method.to_string(),
                    correlation_id,
                })
            }
        }
    }

    /// Fire-and-forget notification: no correlation entry, no reply.
    pub async fn notify(
        &self,
        target: &Target,
        method: &str,
        payload: Value,
    ) -> Result<(), BridgeError> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::ShuttingDown);
        }
        let envelope = Envelope::Request(RequestEnvelope {
            method: method.to_string(),
            correlation_id: self.ids.next()?,
            reply_to: None,
            payload,
        });
        let queue = routing::resolve(target, self.config.shard_count);
        self.transport.publish(&queue, envelope.to_bytes()?).await
    }

    /// Stop the consume loops and the sweeper. In-flight calls fail with
    /// their own deadlines; new calls fail with `ShuttingDown`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn consume_loop<C: Send + Sync + 'static>(
    queue: QueueName,
    mut rx: mpsc::Receiver<Vec<u8>>,
    registry: Arc<MethodRegistry<C>>,
    context: Arc<C>,
    pending: Arc<PendingRequests>,
    transport: Arc<dyn Transport>,
    metrics: Arc<BridgeMetrics>,
    cancel: CancellationToken,
) {
    loop {
        let bytes = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(bytes) => bytes,
                None => {
                    tracing::warn!(queue = %queue, "consume channel closed");
                    break;
                }
            },
        };

        let envelope = match Envelope::from_bytes(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                // A malformed body must not take the loop down.
                tracing::warn!(queue = %queue, error = %e, "dropping undecodable message");
                continue;
            }
        };

        match envelope {
            Envelope::Reply(reply) => pending.resolve(reply),
            Envelope::Request(request) => {
                // One task per request: handlers run concurrently and a
                // panic poisons only its own task.
                tokio::spawn(handle_request(
                    request,
                    Arc::clone(&registry),
                    Arc::clone(&context),
                    Arc::clone(&transport),
                    Arc::clone(&metrics),
                ));
            }
        }
    }
}

async fn handle_request<C: Send + Sync + 'static>(
    request: RequestEnvelope,
    registry: Arc<MethodRegistry<C>>,
    context: Arc<C>,
    transport: Arc<dyn Transport>,
    metrics: Arc<BridgeMetrics>,
) {
    let dispatch = registry.dispatch(&request, context);
    let reply = match AssertUnwindSafe(dispatch).catch_unwind().await {
        Ok(reply) => reply,
        Err(_panic) => {
            tracing::error!(
                method = %request.method,
                correlation_id = %request.correlation_id,
                "handler panicked"
            );
            ReplyEnvelope::err(
                &request,
                CODE_HANDLER_ERROR,
                format!("handler for {} panicked", request.method),
            )
        }
    };
    if reply.error.is_some() {
        metrics.handler_errors.inc();
    }

    let Some(reply_to) = request.reply_to else {
        // Notification: outcome is local only.
        return;
    };
    let bytes = match Envelope::Reply(reply).to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(reply_to = %reply_to, error = %e, "failed to encode reply");
            return;
        }
    };
    if let Err(e) = transport.publish(&reply_to, bytes).await {
        tracing::warn!(
            reply_to = %reply_to,
            correlation_id = %request.correlation_id,
            error = %e,
            "failed to publish reply"
        );
    }
}
