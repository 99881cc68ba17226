use serde::{Deserialize, Serialize};

use crate::{ERROR_TYPE, Envelope};

/// Failure reply produced by the engine: `{"@type":"error","code":..,"message":..}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

impl EngineError {
    /// Returns the error carried by `envelope` if its kind is the engine's error marker.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        if envelope.kind() != Some(ERROR_TYPE) {
            return None;
        }
        let code = envelope
            .get("code")
            .and_then(|v| v.as_i64())
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or_default();
        let message = envelope
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Some(Self { code, message })
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine error {}: {}", self.code, self.message)
    }
}
