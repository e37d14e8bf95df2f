//! TOML configuration for hosts.
//!
//! ```toml
//! [server]
//! host = "10.0.2.2"
//! port = 8080
//! path = "/sync"
//!
//! [client]
//! transport = "websocket"
//! wire_format = "json"
//! client_id_store = "~/.diffsync/client.json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::transport::{Endpoint, EndpointConfig, TransportKind, WireFormat};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub server: EndpointConfig,
    pub client: ClientSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub transport: TransportKind,
    pub wire_format: WireFormat,
    pub client_id_store: Option<PathBuf>,
}

impl SyncConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
            .map_err(|e| SyncError::config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| SyncError::config(format!("invalid config: {e}")))
    }

    /// Validated server endpoint for the configured transport.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let requires_path = self.client.transport == TransportKind::Websocket;
        self.server.build(requires_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_full_file() {
        let config = SyncConfig::from_toml(
            r#"
            [server]
            host = "10.0.2.2"
            port = 8080
            path = "sync"
            subprotocols = "diffsync"

            [client]
            transport = "tcp"
            wire_format = "cbor"
            client_id_store = "/tmp/id.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.client.transport, TransportKind::Tcp);
        assert_eq!(config.client.wire_format, WireFormat::Cbor);
        let endpoint = config.endpoint().unwrap();
        assert_eq!(endpoint.authority(), "10.0.2.2:8080");
        assert_eq!(endpoint.path.as_deref(), Some("/sync"));
        assert_eq!(endpoint.subprotocols.as_deref(), Some("diffsync"));
    }

    #[test]
    fn defaults_to_websocket_json() {
        let config = SyncConfig::from_toml("[server]\nhost = \"localhost\"\nport = 80\n").unwrap();
        assert_eq!(config.client.transport, TransportKind::Websocket);
        assert_eq!(config.client.wire_format, WireFormat::Json);
        // websocket needs a path
        assert!(matches!(config.endpoint(), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn missing_port_fails_validation() {
        let config = SyncConfig::from_toml("[server]\nhost = \"localhost\"\npath = \"/s\"\n").unwrap();
        assert!(matches!(config.endpoint(), Err(SyncError::Configuration(m)) if m.contains("port")));
    }

    #[test]
    fn unknown_transport_is_rejected() {
        assert!(matches!(
            SyncConfig::from_toml("[client]\ntransport = \"carrier-pigeon\"\n"),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn load_reports_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("diffsync.toml");
        std::fs::write(&path, "[server\nbroken").unwrap();
        let err = SyncConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("diffsync.toml"));
    }
}
