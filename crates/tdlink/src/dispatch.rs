use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tdlink_protocol::Envelope;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::correlation::CorrelationTable;
use crate::error::TransportError;
use crate::subscription::SubscriptionRegistry;
use crate::transport::Transport;

/// Pause after a receive error other than `Closed`, so a broken transport
/// does not spin the thread.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Where one inbound message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Carried a token and a call was waiting for it.
    Resolved,
    /// Carried a token nobody waits for any more.
    Orphaned,
    /// Uncorrelated update offered to subscribers.
    Dispatched { delivered: usize },
    /// No kind and no token, or undecodable.
    Dropped,
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    replies_resolved: AtomicU64,
    replies_orphaned: AtomicU64,
    updates_dispatched: AtomicU64,
    deliveries: AtomicU64,
    dropped_deliveries: AtomicU64,
    decode_errors: AtomicU64,
    unroutable: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub received: u64,
    pub replies_resolved: u64,
    pub replies_orphaned: u64,
    pub updates_dispatched: u64,
    pub deliveries: u64,
    pub dropped_deliveries: u64,
    pub decode_errors: u64,
    pub unroutable: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            received: self.received.load(Ordering::Relaxed),
            replies_resolved: self.replies_resolved.load(Ordering::Relaxed),
            replies_orphaned: self.replies_orphaned.load(Ordering::Relaxed),
            updates_dispatched: self.updates_dispatched.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped_deliveries: self.dropped_deliveries.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// The single reader of a transport.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    correlation: Arc<CorrelationTable>,
    registry: Arc<SubscriptionRegistry>,
    stats: Arc<DispatchStats>,
    receive_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        correlation: Arc<CorrelationTable>,
        registry: Arc<SubscriptionRegistry>,
        stats: Arc<DispatchStats>,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            correlation,
            registry,
            stats,
            receive_timeout,
        }
    }

    /// Run the loop on a blocking thread until stopped or the transport closes.
    /// Panics outside a Tokio runtime; [`crate::Client::start`] checks first.
    pub fn start(self) -> DispatchHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::task::spawn_blocking(move || self.run(&token));
        DispatchHandle { cancel, join }
    }

    fn run(&self, cancel: &CancellationToken) {
        info!(
            receive_timeout_ms = self.receive_timeout.as_millis() as u64,
            "dispatch loop started"
        );
        while !cancel.is_cancelled() {
            let raw = match self.transport.receive(self.receive_timeout) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(TransportError::Closed) => {
                    info!("transport closed");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "receive failed");
                    std::thread::sleep(RECEIVE_ERROR_BACKOFF);
                    continue;
                }
            };
            self.route(raw);
        }
        let closed = self.registry.close_all();
        info!(closed_queues = closed, "dispatch loop stopped");
    }

    /// Decode one message and hand it to its waiter or to the subscribers.
    ///
    /// Blocks when a subscriber queue is full under `DeliveryPolicy::Block`,
    /// so it must run off the async runtime.
    pub fn route(&self, raw: Vec<u8>) -> Route {
        DispatchStats::bump(&self.stats.received, 1);

        let envelope = match Envelope::try_decode(raw) {
            Ok(envelope) => envelope,
            Err(failure) => {
                warn!(error = %failure, "dropping undecodable engine message");
                DispatchStats::bump(&self.stats.decode_errors, 1);
                failure.into_envelope()
            }
        };

        if let Some(token) = envelope.correlation_token().map(str::to_owned) {
            // A correlated reply is never broadcast, even if its waiter is gone.
            return if self.correlation.resolve(&token, envelope) {
                DispatchStats::bump(&self.stats.replies_resolved, 1);
                Route::Resolved
            } else {
                warn!(token = %token, "late or unknown reply dropped");
                DispatchStats::bump(&self.stats.replies_orphaned, 1);
                Route::Orphaned
            };
        }

        if envelope.kind().is_none() {
            debug!("message without kind or token dropped");
            DispatchStats::bump(&self.stats.unroutable, 1);
            return Route::Dropped;
        }

        let fan_out = self.registry.dispatch(envelope);
        DispatchStats::bump(&self.stats.updates_dispatched, 1);
        DispatchStats::bump(&self.stats.deliveries, fan_out.delivered as u64);
        DispatchStats::bump(&self.stats.dropped_deliveries, fan_out.dropped as u64);
        Route::Dispatched {
            delivered: fan_out.delivered,
        }
    }
}

/// Handle to a running dispatch loop.
pub struct DispatchHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl DispatchHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the loop and wait for it to exit; it notices within one receive
    /// timeout.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for the loop to exit on its own (transport closed).
    pub async fn join(self) {
        if let Err(err) = self.join.await {
            error!(error = %err, "dispatch loop panicked");
        }
    }
}
