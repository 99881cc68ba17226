//! Byte-level access to the engine.

pub mod memory;
pub mod socket;

use std::sync::{Arc, Mutex, RwLock, mpsc};
use std::time::Duration;

use tokio::sync::mpsc as async_mpsc;

use crate::error::TransportError;

pub use memory::{EngineHandle, memory};
pub use socket::connect;

/// The engine's primitives, one JSON object per call.
///
/// `submit` must be safe for concurrent callers. `receive` is only ever
/// called by the dispatch loop and may block for up to `timeout`.
pub trait Transport: Send + Sync + 'static {
    fn submit(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Next inbound message, or `Ok(None)` when `timeout` elapses first.
    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Synchronous request with an immediate answer, for the few calls the
    /// engine allows outside the message stream.
    fn execute(&self, payload: &[u8]) -> Result<Option<Vec<u8>>, TransportError>;
}

pub type ExecuteFn = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

pub(crate) type SharedExecutor = Arc<RwLock<Option<ExecuteFn>>>;

/// Client side of a channel pair: outbound into an async queue, inbound from
/// a blocking queue the dispatch thread waits on.
pub struct ChannelTransport {
    outbound: async_mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::Receiver<Vec<u8>>>,
    executor: Option<SharedExecutor>,
    execute_unsupported: &'static str,
}

impl ChannelTransport {
    pub(crate) fn new(
        outbound: async_mpsc::UnboundedSender<Vec<u8>>,
        inbound: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            outbound,
            inbound: Mutex::new(inbound),
            executor: None,
            execute_unsupported: "execute is not available on this transport",
        }
    }

    pub(crate) fn with_executor(mut self, executor: SharedExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub(crate) fn execute_unsupported(mut self, reason: &'static str) -> Self {
        self.execute_unsupported = reason;
        self
    }
}

impl Transport for ChannelTransport {
    fn submit(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.outbound
            .send(payload.to_vec())
            .map_err(|_| TransportError::Closed)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let inbound = self.inbound.lock().map_err(|_| TransportError::Closed)?;
        match inbound.recv_timeout(timeout) {
            Ok(raw) => Ok(Some(raw)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn execute(&self, payload: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(executor) = &self.executor else {
            return Err(TransportError::Unsupported(self.execute_unsupported));
        };
        let handler = executor.read().map_err(|_| TransportError::Closed)?;
        match handler.as_ref() {
            Some(handler) => Ok(handler(payload)),
            None => Err(TransportError::Unsupported("no execute handler installed")),
        }
    }
}
