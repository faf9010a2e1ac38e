use prometheus::{IntCounter, IntGauge, Opts, Registry};

/// Bridge-level prometheus metrics.
pub struct BridgeMetrics {
    /// Calls currently awaiting a reply.
    pub pending_requests: IntGauge,
    /// Calls issued through the dispatcher.
    pub calls: IntCounter,
    /// Calls rejected with a timeout.
    pub timeouts: IntCounter,
    /// Error replies produced by local handlers.
    pub handler_errors: IntCounter,
    /// Replies that arrived after their pending entry was gone.
    pub late_replies: IntCounter,
}

impl BridgeMetrics {
    /// Create metrics and register them with the given prometheus registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let pending_requests = IntGauge::with_opts(Opts::new(
            "bridge_pending_requests",
            "Calls currently awaiting a reply",
        ))?;
        let calls = IntCounter::with_opts(Opts::new(
            "bridge_calls_total",
            "Calls issued through the dispatcher",
        ))?;
        let timeouts = IntCounter::with_opts(Opts::new(
            "bridge_timeouts_total",
            "Calls rejected with a timeout",
        ))?;
        let handler_errors = IntCounter::with_opts(Opts::new(
            "bridge_handler_errors_total",
            "Error replies produced by local handlers",
        ))?;
        let late_replies = IntCounter::with_opts(Opts::new(
            "bridge_late_replies_total",
            "Replies discarded because their pending entry was gone",
        ))?;

        registry.register(Box::new(pending_requests.clone()))?;
        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(timeouts.clone()))?;
        registry.register(Box::new(handler_errors.clone()))?;
        registry.register(Box::new(late_replies.clone()))?;

        Ok(Self {
            pending_requests,
            calls,
            timeouts,
            handler_errors,
            late_replies,
        })
    }

    /// Create metrics without registering (for testing).
    pub fn unregistered() -> Self {
        Self {
            pending_requests: IntGauge::new("bridge_pending_requests", "pending")
                .expect("valid metric name"),
            calls: IntCounter::new("bridge_calls_total", "calls").expect("valid metric name"),
            timeouts: IntCounter::new("bridge_timeouts_total", "timeouts")
                .expect("valid metric name"),
            handler_errors: IntCounter::new("bridge_handler_errors_total", "handler errors")
                .expect("valid metric name"),
            late_replies: IntCounter::new("bridge_late_replies_total", "late replies")
                .expect("valid metric name"),
        }
    }
}
