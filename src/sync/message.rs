use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::document::Edit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Add,
    Patch,
    Detach,
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Add => "add",
            MessageType::Patch => "patch",
            MessageType::Detach => "detach",
            MessageType::Unknown => "unknown",
        }
    }

    /// Case-insensitive; anything unrecognised is `Unknown`.
    pub fn from_wire(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "add" => MessageType::Add,
            "patch" => MessageType::Patch,
            "detach" => MessageType::Detach,
            _ => MessageType::Unknown,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(MessageType::from_wire(&raw))
    }
}

/// Envelope exchanged with the sync server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchMessage<D> {
    pub msg_type: MessageType,
    pub id: String,
    pub client_id: String,
    #[serde(default = "Vec::new")]
    pub edits: Vec<Edit<D>>,
}

impl<D> PatchMessage<D> {
    pub fn new(
        msg_type: MessageType,
        id: impl Into<String>,
        client_id: impl Into<String>,
        edits: Vec<Edit<D>>,
    ) -> Self {
        Self {
            msg_type,
            id: id.into(),
            client_id: client_id.into(),
            edits,
        }
    }

    pub fn add(id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self::new(MessageType::Add, id, client_id, Vec::new())
    }

    pub fn patch(id: impl Into<String>, client_id: impl Into<String>, edits: Vec<Edit<D>>) -> Self {
        Self::new(MessageType::Patch, id, client_id, edits)
    }

    pub fn detach(id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self::new(MessageType::Detach, id, client_id, Vec::new())
    }
}
