//! Client-side dispatcher for a JSON messaging engine.
//!
//! One dispatch loop owns the receive side of a [`Transport`]. Replies carrying
//! an `"@extra"` token are routed back to the call that issued the request;
//! every other message is fanned out to the raw update queue and to typed
//! subscriptions.

pub mod client;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod subscription;
pub mod token;
pub mod transport;

pub use client::Client;
pub use config::{ClientConfig, DeliveryPolicy};
pub use dispatch::{DispatchHandle, DispatchSnapshot};
pub use error::{ClientError, ClientResult, TransportError};
pub use tdlink_protocol::{EngineError, Envelope, Request, TypedUpdate};
pub use transport::Transport;
