use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A spontaneous engine message with a fixed `"@type"`.
///
/// Subscriptions are keyed by `KIND`; the payload is decoded straight from
/// the envelope's raw bytes.
pub trait TypedUpdate: DeserializeOwned + Send + 'static {
    const KIND: &'static str;
}

/// The authorization state changed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateAuthorizationState {
    pub authorization_state: Value,
}

impl UpdateAuthorizationState {
    /// Kind of the nested state object, e.g. `authorizationStateReady`.
    pub fn state_kind(&self) -> Option<&str> {
        self.authorization_state
            .get(crate::TYPE_KEY)
            .and_then(Value::as_str)
    }
}

impl TypedUpdate for UpdateAuthorizationState {
    const KIND: &'static str = "updateAuthorizationState";
}

/// The connection state to the engine's backend changed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateConnectionState {
    pub state: Value,
}

impl UpdateConnectionState {
    pub fn state_kind(&self) -> Option<&str> {
        self.state.get(crate::TYPE_KEY).and_then(Value::as_str)
    }
}

impl TypedUpdate for UpdateConnectionState {
    const KIND: &'static str = "updateConnectionState";
}

/// An engine option changed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateOption {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl TypedUpdate for UpdateOption {
    const KIND: &'static str = "updateOption";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    #[serde(default)]
    pub is_outgoing: bool,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub content: Value,
}

/// A new message was received or sent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateNewMessage {
    pub message: Message,
}

impl TypedUpdate for UpdateNewMessage {
    const KIND: &'static str = "updateNewMessage";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct File {
    pub id: i32,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub expected_size: i64,
    #[serde(default)]
    pub local: Value,
    #[serde(default)]
    pub remote: Value,
}

/// Download or upload progress for a file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpdateFile {
    pub file: File,
}

impl TypedUpdate for UpdateFile {
    const KIND: &'static str = "updateFile";
}
