use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tdlink_protocol::request::sync;
use tdlink_protocol::{EngineError, Envelope, Request, TypedUpdate};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::correlation::{CorrelationTable, PendingGuard};
use crate::dispatch::{DispatchHandle, DispatchSnapshot, DispatchStats, Dispatcher};
use crate::error::{ClientError, ClientResult, TransportError};
use crate::subscription::SubscriptionRegistry;
use crate::token;
use crate::transport::Transport;

#[derive(Deserialize)]
struct LogVerbosityLevel {
    verbosity_level: i32,
}

/// One connection to the engine.
///
/// Owns its correlation table and subscription registry; several clients can
/// live in one process without sharing state.
pub struct Client {
    transport: Arc<dyn Transport>,
    correlation: Arc<CorrelationTable>,
    registry: Arc<SubscriptionRegistry>,
    stats: Arc<DispatchStats>,
    config: ClientConfig,
    started: AtomicBool,
}

impl Client {
    pub fn new(transport: impl Transport, config: ClientConfig) -> Self {
        Self::from_shared(Arc::new(transport), config)
    }

    pub fn from_shared(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            correlation: Arc::new(CorrelationTable::new()),
            registry: Arc::new(SubscriptionRegistry::new(config.delivery_policy)),
            stats: Arc::new(DispatchStats::default()),
            config,
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start the dispatch loop. Register subscriptions before calling this
    /// if early updates must not be missed.
    ///
    /// The loop runs on the blocking pool of the current Tokio runtime, so
    /// this must be called inside one; otherwise it returns
    /// [`ClientError::NoRuntime`] and the client can still be started later.
    pub fn start(&self) -> ClientResult<DispatchHandle> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ClientError::NoRuntime);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyStarted);
        }
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.correlation),
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
            self.config.receive_timeout(),
        );
        Ok(dispatcher.start())
    }

    /// Submit `request` and wait for the reply carrying its token.
    pub async fn send_and_catch(&self, request: Request) -> ClientResult<Envelope> {
        self.send_and_catch_within(request, self.config.call_timeout())
            .await
    }

    /// [`Client::send_and_catch`] with an explicit timeout.
    pub async fn send_and_catch_within(
        &self,
        mut request: Request,
        timeout: Duration,
    ) -> ClientResult<Envelope> {
        let token = token::generate();
        request.set_extra(&token);

        let slot = self.correlation.register(&token)?;
        // Removes the token on every exit path, including this future being dropped.
        let _pending = PendingGuard::new(&self.correlation, &token);

        self.transport.submit(&request.to_bytes())?;
        debug!(token = %token, kind = request.kind().unwrap_or_default(), "request submitted");

        let envelope = match tokio::time::timeout(timeout, slot).await {
            Ok(Ok(envelope)) => envelope,
            // The table only drops a sender by delivering into it, so this is teardown.
            Ok(Err(_)) => return Err(TransportError::Closed.into()),
            Err(_) => {
                warn!(
                    token = %token,
                    kind = request.kind().unwrap_or_default(),
                    timeout_ms = timeout.as_millis() as u64,
                    "no reply before timeout"
                );
                return Err(ClientError::Timeout {
                    token: token.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        if let Some(err) = EngineError::from_envelope(&envelope) {
            debug!(code = err.code, message = %err.message, "engine returned an error");
            return Err(err.into());
        }
        Ok(envelope)
    }

    /// Round trip decoded into `R`.
    pub async fn call<R: DeserializeOwned>(&self, request: Request) -> ClientResult<R> {
        let envelope = self.send_and_catch(request).await?;
        Ok(envelope.decode_as()?)
    }

    /// Submit without waiting. Any reply arrives as an ordinary update.
    pub fn send(&self, request: &Request) -> ClientResult<()> {
        self.transport.submit(&request.to_bytes())?;
        Ok(())
    }

    /// Submit a JSON value, which must be an object.
    pub async fn send_and_catch_value(&self, value: Value) -> ClientResult<Envelope> {
        let request = Request::from_value(value)
            .ok_or_else(|| ClientError::InvalidRequest("request must be a JSON object".into()))?;
        self.send_and_catch(request).await
    }

    /// Synchronous call for the few requests the engine answers immediately.
    pub fn execute(&self, request: &Request) -> ClientResult<Envelope> {
        let raw = self
            .transport
            .execute(&request.to_bytes())?
            .ok_or(ClientError::EmptyResponse)?;
        let envelope = Envelope::try_decode(raw)?;
        if let Some(err) = EngineError::from_envelope(&envelope) {
            return Err(err.into());
        }
        Ok(envelope)
    }

    pub fn set_log_verbosity_level(&self, level: i32) -> ClientResult<()> {
        self.execute(&sync::set_log_verbosity_level(level))?;
        Ok(())
    }

    pub fn get_log_verbosity_level(&self) -> ClientResult<i32> {
        let level: LogVerbosityLevel = self
            .execute(&sync::get_log_verbosity_level())?
            .decode_as()?;
        Ok(level.verbosity_level)
    }

    /// Queue receiving every update that is not a correlated reply.
    pub async fn raw_updates(&self, capacity: usize) -> mpsc::Receiver<Envelope> {
        self.registry.install_raw(capacity).await
    }

    /// [`Client::raw_updates`] with the configured capacity.
    pub async fn default_raw_updates(&self) -> mpsc::Receiver<Envelope> {
        self.raw_updates(self.config.raw_updates_capacity).await
    }

    /// Typed updates of `T::KIND` accepted by `predicate`.
    pub async fn subscribe<T, F>(&self, predicate: F, capacity: usize) -> mpsc::Receiver<T>
    where
        T: TypedUpdate,
        F: Fn(&T) -> bool + Send + 'static,
    {
        self.registry.subscribe(predicate, capacity).await
    }

    /// Untyped updates of `kind` accepted by `predicate`.
    pub async fn subscribe_kind<F>(
        &self,
        kind: &str,
        predicate: F,
        capacity: usize,
    ) -> mpsc::Receiver<Envelope>
    where
        F: Fn(&Envelope) -> bool + Send + 'static,
    {
        self.registry.subscribe_kind(kind, predicate, capacity).await
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }

    pub fn pending_calls(&self) -> usize {
        self.correlation.len()
    }

    pub fn is_pending(&self, token: &str) -> bool {
        self.correlation.contains(token)
    }
}
