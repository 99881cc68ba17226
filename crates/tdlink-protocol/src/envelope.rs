use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{EXTRA_KEY, TYPE_KEY};

/// One inbound engine message: the decoded field mapping plus the bytes it came from.
///
/// The raw bytes are kept so typed consumers can decode straight from them
/// instead of re-serialising the generic mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    raw: Vec<u8>,
    fields: Map<String, Value>,
}

/// A blob that did not decode into a JSON object.
#[derive(Debug, Error)]
#[error("malformed envelope ({len} bytes): {source}")]
pub struct DecodeFailure {
    raw: Vec<u8>,
    len: usize,
    #[source]
    source: serde_json::Error,
}

impl DecodeFailure {
    /// Falls back to an envelope with no fields, so it matches no waiter and no subscriber.
    pub fn into_envelope(self) -> Envelope {
        Envelope {
            raw: self.raw,
            fields: Map::new(),
        }
    }
}

impl Envelope {
    /// Decode a blob, returning the failure (with the bytes) if it is not a JSON object.
    pub fn try_decode(raw: Vec<u8>) -> Result<Self, DecodeFailure> {
        match serde_json::from_slice::<Map<String, Value>>(&raw) {
            Ok(fields) => Ok(Self { raw, fields }),
            Err(source) => Err(DecodeFailure {
                len: raw.len(),
                raw,
                source,
            }),
        }
    }

    /// Lenient decode: malformed input yields an empty envelope and a warning.
    pub fn decode(raw: Vec<u8>) -> Self {
        match Self::try_decode(raw) {
            Ok(envelope) => envelope,
            Err(failure) => {
                tracing::warn!(error = %failure, "dropping undecodable engine message");
                failure.into_envelope()
            }
        }
    }

    /// Build an envelope from a field mapping, serialising the raw form.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        // A string-keyed map of JSON values always serialises.
        let raw = serde_json::to_vec(&fields).unwrap_or_default();
        Self { raw, fields }
    }

    /// The `"@type"` discriminator, if present and a string.
    pub fn kind(&self) -> Option<&str> {
        self.fields.get(TYPE_KEY).and_then(Value::as_str)
    }

    /// The `"@extra"` correlation token, if present and a string.
    pub fn correlation_token(&self) -> Option<&str> {
        self.fields.get(EXTRA_KEY).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reconstruct a typed value from the raw bytes.
    pub fn decode_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.raw)
    }

    pub fn into_parts(self) -> (Vec<u8>, Map<String, Value>) {
        (self.raw, self.fields)
    }
}
