use serde::Deserialize;
use std::time::Duration;

/// What the dispatch loop does when a subscriber's queue is full.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Wait for room. A subscriber that stops draining stalls every other
    /// subscriber and reply routing until it catches up.
    #[default]
    Block,
    /// Drop the new value and count it.
    DropNewest,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a correlated call waits for its reply.
    pub call_timeout_ms: u64,
    /// Receive timeout per dispatch iteration; also the shutdown granularity.
    pub receive_timeout_ms: u64,
    /// Default capacity for the raw update queue.
    pub raw_updates_capacity: usize,
    pub delivery_policy: DeliveryPolicy,
}

impl ClientConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms.max(1))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            receive_timeout_ms: 1_000,
            raw_updates_capacity: 1_000,
            delivery_policy: DeliveryPolicy::Block,
        }
    }
}
