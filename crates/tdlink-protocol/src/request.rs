use serde::Serialize;
use serde_json::{Map, Value};

use crate::{EXTRA_KEY, TYPE_KEY};

/// Outgoing engine request: a JSON object with an `"@type"` naming the method.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Request(Map<String, Value>);

impl Request {
    pub fn new(kind: &str) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_KEY.to_string(), Value::from(kind));
        Self(fields)
    }

    /// Wrap an arbitrary JSON value. Returns `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> Option<&str> {
        self.0.get(TYPE_KEY).and_then(Value::as_str)
    }

    /// Tag the request with a correlation token, replacing any existing one.
    pub fn set_extra(&mut self, token: &str) {
        self.0.insert(EXTRA_KEY.to_string(), Value::from(token));
    }

    pub fn extra(&self) -> Option<&str> {
        self.0.get(EXTRA_KEY).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // A string-keyed map of JSON values always serialises.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }
}

impl From<Map<String, Value>> for Request {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Engine calls that may be issued through the synchronous `execute` primitive.
pub mod sync {
    use super::Request;

    pub fn set_log_verbosity_level(level: i32) -> Request {
        Request::new("setLogVerbosityLevel").with("new_verbosity_level", level)
    }

    pub fn get_log_verbosity_level() -> Request {
        Request::new("getLogVerbosityLevel")
    }

    pub fn get_text_entities(text: &str) -> Request {
        Request::new("getTextEntities").with("text", text)
    }
}
