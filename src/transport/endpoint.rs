use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SyncError};

/// A validated server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: Option<String>,
    /// `wss` instead of `ws` for WebSocket transports.
    pub secure: bool,
    pub subprotocols: Option<String>,
}

impl Endpoint {
    pub fn builder(host: impl Into<String>) -> EndpointConfig {
        EndpointConfig {
            host: Some(host.into()),
            ..Default::default()
        }
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn websocket_url(&self) -> Result<Url> {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = self.path.as_deref().unwrap_or("/");
        let raw = format!("{}://{}:{}{}", scheme, self.host, self.port, path);
        Url::parse(&raw).map_err(|e| SyncError::config(format!("invalid endpoint url {raw:?}: {e}")))
    }

    /// Fails when `require_path` is set and the endpoint carries no path.
    pub fn ensure_path(&self, require_path: bool) -> Result<()> {
        if require_path && self.path.is_none() {
            return Err(SyncError::config("server path is required for this transport"));
        }
        Ok(())
    }
}

/// Raw, possibly incomplete endpoint fields as they come from a config file,
/// the command line or a builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub path: Option<String>,
    pub secure: bool,
    pub subprotocols: Option<String>,
}

impl EndpointConfig {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: i64) -> Self {
        self.port = Some(port);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn subprotocols(mut self, subprotocols: impl Into<String>) -> Self {
        self.subprotocols = Some(subprotocols.into());
        self
    }

    /// Fill unset fields from `other`.
    pub fn or(self, other: EndpointConfig) -> Self {
        Self {
            host: self.host.or(other.host),
            port: self.port.or(other.port),
            path: self.path.or(other.path),
            secure: self.secure || other.secure,
            subprotocols: self.subprotocols.or(other.subprotocols),
        }
    }

    /// Validate every field. Missing host or port, a port outside 1..=65535, or a
    /// missing path when `require_path` is set are configuration errors.
    pub fn build(&self, require_path: bool) -> Result<Endpoint> {
        let host = self
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| SyncError::config("server host may not be empty"))?;

        let raw_port = self
            .port
            .ok_or_else(|| SyncError::config("server port may not be empty"))?;
        let port = u16::try_from(raw_port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| SyncError::config(format!("server port {raw_port} is not a valid port")))?;

        let path = match self.path.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(p) if p.starts_with('/') => Some(p.to_string()),
            Some(p) => Some(format!("/{p}")),
        };

        let endpoint = Endpoint {
            host: host.to_string(),
            port,
            path,
            secure: self.secure,
            subprotocols: self.subprotocols.clone().filter(|s| !s.trim().is_empty()),
        };
        endpoint.ensure_path(require_path)?;
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_complete_endpoint() {
        let endpoint = Endpoint::builder("10.0.2.2")
            .port(8080)
            .path("sync")
            .build(true)
            .unwrap();
        assert_eq!(endpoint.authority(), "10.0.2.2:8080");
        assert_eq!(endpoint.path.as_deref(), Some("/sync"));
        assert_eq!(
            endpoint.websocket_url().unwrap().as_str(),
            "ws://10.0.2.2:8080/sync"
        );
    }

    #[test]
    fn secure_endpoint_uses_wss() {
        let endpoint = Endpoint::builder("example.com")
            .port(443)
            .path("/sync")
            .secure(true)
            .build(true)
            .unwrap();
        assert_eq!(endpoint.websocket_url().unwrap().scheme(), "wss");
    }

    #[test]
    fn missing_port_is_configuration_error() {
        let err = Endpoint::builder("localhost").path("/sync").build(true).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(msg) if msg.contains("port")));
    }

    #[test]
    fn invalid_ports_are_rejected() {
        for port in [0, -1, 70_000] {
            let err = Endpoint::builder("localhost").port(port).build(false).unwrap_err();
            assert!(matches!(err, SyncError::Configuration(_)), "port {port}");
        }
    }

    #[test]
    fn missing_host_is_configuration_error() {
        let err = EndpointConfig::default().port(80).build(false).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(msg) if msg.contains("host")));
    }

    #[test]
    fn path_only_required_when_asked() {
        let config = Endpoint::builder("localhost").port(7777);
        assert!(config.build(false).is_ok());
        assert!(matches!(
            config.build(true),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn overrides_fill_missing_fields() {
        let file = EndpointConfig::default().host("file-host").port(1).path("/p");
        let cli = EndpointConfig::default().port(2);
        let merged = cli.or(file);
        assert_eq!(merged.host.as_deref(), Some("file-host"));
        assert_eq!(merged.port, Some(2));
        assert_eq!(merged.path.as_deref(), Some("/p"));
    }
}
