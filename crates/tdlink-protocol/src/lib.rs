pub mod envelope;
pub mod error;
pub mod paths;
pub mod request;
pub mod update;

pub use envelope::{DecodeFailure, Envelope};
pub use error::EngineError;
pub use request::Request;
pub use update::TypedUpdate;

/// Message kind discriminator carried by every engine object.
pub const TYPE_KEY: &str = "@type";

/// Caller-chosen correlation token, echoed verbatim on the matching reply.
pub const EXTRA_KEY: &str = "@extra";

/// Kind of the engine's generic failure reply.
pub const ERROR_TYPE: &str = "error";

/// Upper bound for a single JSON line on the bridge socket.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;
