use tdlink_protocol::{Envelope, TypedUpdate};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::config::DeliveryPolicy;

/// Result of offering one envelope to one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Filtered,
    /// Queue full under [`DeliveryPolicy::DropNewest`].
    Dropped,
    /// Receiver gone; the subscription is pruned.
    Closed,
    Undecodable,
}

type Deliver = Box<dyn Fn(&Envelope, DeliveryPolicy) -> Delivery + Send>;

struct Subscription {
    kind: String,
    deliver: Deliver,
}

#[derive(Default)]
struct Inner {
    subscriptions: Vec<Subscription>,
    raw: Option<mpsc::Sender<Envelope>>,
    /// Set by `close_all`; later registrations get an already-ended stream.
    closed: bool,
}

/// Counts from a single [`SubscriptionRegistry::dispatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
    pub raw: bool,
}

/// Standing registrations for spontaneous engine messages.
///
/// `subscribe*` and `install_raw` are called from async code; `dispatch`
/// runs on the dispatch thread and takes the lock with `blocking_lock`, so
/// it must not be called from inside the runtime.
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
    policy: DeliveryPolicy,
}

fn push<T>(tx: &mpsc::Sender<T>, value: T, policy: DeliveryPolicy) -> Delivery {
    match policy {
        DeliveryPolicy::Block => match tx.blocking_send(value) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Closed,
        },
        DeliveryPolicy::DropNewest => match tx.try_send(value) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        },
    }
}

impl SubscriptionRegistry {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            policy,
        }
    }

    /// Subscribe to `T::KIND` updates accepted by `predicate`.
    ///
    /// The predicate sees the typed value, not the generic mapping.
    pub async fn subscribe<T, F>(&self, predicate: F, capacity: usize) -> mpsc::Receiver<T>
    where
        T: TypedUpdate,
        F: Fn(&T) -> bool + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let deliver: Deliver = Box::new(move |envelope, policy| {
            if tx.is_closed() {
                return Delivery::Closed;
            }
            let value: T = match envelope.decode_as() {
                Ok(value) => value,
                Err(err) => {
                    warn!(kind = T::KIND, error = %err, "failed to decode typed update");
                    return Delivery::Undecodable;
                }
            };
            if !predicate(&value) {
                return Delivery::Filtered;
            }
            push(&tx, value, policy)
        });
        self.insert(T::KIND, deliver).await;
        rx
    }

    /// Subscribe to a kind with no typed struct; the predicate sees the envelope.
    pub async fn subscribe_kind<F>(
        &self,
        kind: &str,
        predicate: F,
        capacity: usize,
    ) -> mpsc::Receiver<Envelope>
    where
        F: Fn(&Envelope) -> bool + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let deliver: Deliver = Box::new(move |envelope, policy| {
            if tx.is_closed() {
                return Delivery::Closed;
            }
            if !predicate(envelope) {
                return Delivery::Filtered;
            }
            push(&tx, envelope.clone(), policy)
        });
        self.insert(kind, deliver).await;
        rx
    }

    async fn insert(&self, kind: &str, deliver: Deliver) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            // Dropping `deliver` drops the sender it owns.
            debug!(kind, "registry closed, subscription ends immediately");
            return;
        }
        inner.subscriptions.push(Subscription {
            kind: kind.to_string(),
            deliver,
        });
        debug!(kind, total = inner.subscriptions.len(), "subscription added");
    }

    /// Install the unfiltered queue that receives every uncorrelated update.
    /// Replaces any queue installed earlier.
    pub async fn install_raw(&self, capacity: usize) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut inner = self.inner.lock().await;
        if inner.closed {
            debug!("registry closed, raw queue ends immediately");
            return rx;
        }
        if inner.raw.replace(tx).is_some() {
            debug!("replaced raw update queue");
        }
        rx
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.subscriptions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Offer an uncorrelated envelope to the raw queue, then to every matching
    /// subscription.
    pub fn dispatch(&self, envelope: Envelope) -> FanOut {
        let mut fan_out = FanOut::default();
        let Some(kind) = envelope.kind().map(str::to_owned) else {
            return fan_out;
        };

        let mut inner = self.inner.blocking_lock();
        let policy = self.policy;

        if let Some(raw) = inner.raw.as_ref() {
            match push(raw, envelope.clone(), policy) {
                Delivery::Delivered => fan_out.raw = true,
                Delivery::Dropped => {
                    fan_out.dropped += 1;
                    warn!(kind = %kind, "raw update queue full, update dropped");
                }
                _ => {
                    debug!("raw update queue closed");
                    inner.raw = None;
                }
            }
        }

        inner.subscriptions.retain(|sub| {
            if sub.kind != kind {
                return true;
            }
            match (sub.deliver)(&envelope, policy) {
                Delivery::Delivered => {
                    fan_out.delivered += 1;
                    true
                }
                Delivery::Dropped => {
                    fan_out.dropped += 1;
                    warn!(kind = %kind, "subscriber queue full, update dropped");
                    true
                }
                Delivery::Filtered | Delivery::Undecodable => true,
                Delivery::Closed => {
                    debug!(kind = %kind, "pruning closed subscription");
                    false
                }
            }
        });

        fan_out
    }

    /// Drop every queue so receivers see the end of the stream, including
    /// queues registered afterwards. Called by the dispatch loop on exit;
    /// blocking like [`SubscriptionRegistry::dispatch`].
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.blocking_lock();
        let closed = inner.subscriptions.len() + usize::from(inner.raw.is_some());
        inner.subscriptions.clear();
        inner.raw = None;
        inner.closed = true;
        closed
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(DeliveryPolicy::default())
    }
}
