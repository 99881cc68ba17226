use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tdlink_protocol::Envelope;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::{ClientError, ClientResult};

/// Receiving end of a one-shot reply slot.
pub type ReplySlot = oneshot::Receiver<Envelope>;

/// Waiting calls keyed by correlation token.
///
/// A token is present exactly while a call is waiting on it. Each slot
/// receives at most one envelope: resolving takes the sender out of the map.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    waiters: DashMap<String, oneshot::Sender<Envelope>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `token`.
    pub fn register(&self, token: &str) -> ClientResult<ReplySlot> {
        match self.waiters.entry(token.to_string()) {
            Entry::Occupied(_) => {
                error!(token, "correlation token already registered");
                Err(ClientError::DuplicateToken(token.to_string()))
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(tx);
                debug!(token, "registered reply slot");
                Ok(rx)
            }
        }
    }

    /// Deliver `envelope` to the waiter for `token`.
    ///
    /// Returns false when nobody is waiting, which means the caller already
    /// gave up; the envelope is dropped.
    pub fn resolve(&self, token: &str, envelope: Envelope) -> bool {
        // The shard lock is released before the send.
        let Some((_, tx)) = self.waiters.remove(token) else {
            debug!(token, "no waiter for reply");
            return false;
        };
        if tx.send(envelope).is_err() {
            debug!(token, "waiter went away before its reply arrived");
            return false;
        }
        debug!(token, "reply delivered");
        true
    }

    /// Forget `token`. Safe to call whether or not it was resolved.
    pub fn remove(&self, token: &str) -> bool {
        self.waiters.remove(token).is_some()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.waiters.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Sorted tokens of the calls still waiting (for diagnostics).
    pub fn pending_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.waiters.iter().map(|r| r.key().clone()).collect();
        tokens.sort_unstable();
        tokens
    }
}

/// Removes a token from the table when dropped, whichever way the call ends.
pub(crate) struct PendingGuard<'a> {
    table: &'a CorrelationTable,
    token: &'a str,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(table: &'a CorrelationTable, token: &'a str) -> Self {
        Self { table, token }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.token);
    }
}
