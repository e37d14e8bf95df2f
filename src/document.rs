use serde::{Deserialize, Serialize};

/// A document tracked by one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDocument<C> {
    pub id: String,
    pub client_id: String,
    pub content: C,
}

impl<C> ClientDocument<C> {
    pub fn new(id: impl Into<String>, client_id: impl Into<String>, content: C) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            content,
        }
    }

    /// Same document identity with new content.
    pub fn with_content(&self, content: C) -> Self {
        Self {
            id: self.id.clone(),
            client_id: self.client_id.clone(),
            content,
        }
    }
}

/// Last synchronized state of a document, the base every diff is computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadow<C> {
    pub document_id: String,
    pub client_id: String,
    /// Monotonic; +1 per sent edit and per applied inbound edit.
    pub version: u64,
    pub content: C,
}

impl<C: Default> Shadow<C> {
    /// Version 0 with empty content. The first diff therefore carries the whole document.
    pub fn initial(document: &ClientDocument<C>) -> Self {
        Self {
            document_id: document.id.clone(),
            client_id: document.client_id.clone(),
            version: 0,
            content: C::default(),
        }
    }
}

/// An ordered list of diffs computed against shadow `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit<D> {
    pub version: u64,
    /// SHA-256 (hex) of the source shadow content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default = "Vec::new")]
    pub diffs: Vec<D>,
}

impl<D> Edit<D> {
    pub fn new(version: u64, diffs: Vec<D>) -> Self {
        Self {
            version,
            checksum: None,
            diffs,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }
}

/// Per-document position in the send/receive state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentState {
    #[default]
    Clean,
    PendingSend,
    AwaitingAck,
    ApplyingPatch,
}

impl DocumentState {
    pub fn can_transition_to(self, next: DocumentState) -> bool {
        use DocumentState::*;
        matches!(
            (self, next),
            (Clean, PendingSend)
                | (PendingSend, AwaitingAck)
                | (PendingSend, Clean)
                | (AwaitingAck, Clean)
                | (Clean, ApplyingPatch)
                | (ApplyingPatch, Clean)
        )
    }
}
