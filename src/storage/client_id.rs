use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ClientIdFile {
    #[serde(default)]
    client_id: String,
}

/// File-backed client id, stable across process restarts.
#[derive(Debug, Clone)]
pub struct ClientIdStore {
    path: PathBuf,
}

impl ClientIdStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored id, or `None` when the file is missing or holds an empty id.
    pub fn load(&self) -> Result<Option<String>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: ClientIdFile = serde_json::from_slice(&bytes)?;
        Ok(Some(file.client_id).filter(|id| !id.trim().is_empty()))
    }

    pub fn save(&self, client_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = ClientIdFile {
            client_id: client_id.to_string(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Load the stored id, generating and persisting a new UUID when there is none.
    pub fn load_or_create(&self) -> Result<String> {
        if let Some(id) = self.load()? {
            return Ok(id);
        }
        let id = generate_client_id();
        self.save(&id)?;
        tracing::info!(path = %self.path.display(), client_id = %id, "generated new client id");
        Ok(id)
    }
}

pub fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}
