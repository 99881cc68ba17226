use std::sync::{Arc, RwLock, mpsc};

use serde_json::Value;
use tdlink_protocol::{EXTRA_KEY, Envelope};
use tokio::sync::mpsc as async_mpsc;

use super::{ChannelTransport, ExecuteFn, SharedExecutor};
use crate::error::TransportError;

/// In-process loopback: the returned [`ChannelTransport`] goes to the
/// client, the [`EngineHandle`] plays the engine.
///
/// Dropping the handle closes the client's receive side, which stops its
/// dispatch loop.
pub fn memory() -> (ChannelTransport, EngineHandle) {
    let (out_tx, out_rx) = async_mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::channel();
    let executor: SharedExecutor = Arc::new(RwLock::new(None));

    let transport = ChannelTransport::new(out_tx, in_rx).with_executor(Arc::clone(&executor));
    let engine = EngineHandle {
        requests: out_rx,
        inbound: in_tx,
        executor,
    };
    (transport, engine)
}

/// Engine side of [`memory`].
pub struct EngineHandle {
    requests: async_mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: mpsc::Sender<Vec<u8>>,
    executor: SharedExecutor,
}

impl EngineHandle {
    /// Next request the client submitted. `None` once the client side is gone.
    pub async fn next_request(&mut self) -> Option<Envelope> {
        self.requests.recv().await.map(Envelope::decode)
    }

    /// Queue a message for the client's dispatch loop.
    pub fn push(&self, raw: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        self.inbound
            .send(raw.into())
            .map_err(|_| TransportError::Closed)
    }

    pub fn push_json(&self, value: &Value) -> Result<(), TransportError> {
        self.push(value.to_string())
    }

    /// Answer `request`, echoing its `"@extra"` onto `reply`.
    pub fn reply(&self, request: &Envelope, mut reply: Value) -> Result<(), TransportError> {
        if let (Some(token), Some(fields)) = (request.correlation_token(), reply.as_object_mut()) {
            fields.insert(EXTRA_KEY.to_string(), Value::from(token));
        }
        self.push_json(&reply)
    }

    /// Install the handler answering the client's synchronous `execute` calls.
    pub fn on_execute<F>(&self, handler: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        let handler: ExecuteFn = Box::new(handler);
        match self.executor.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }
}
