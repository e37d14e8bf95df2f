//! Connection plumbing between the engine and a sync server.
//!
//! A [`Transport`] knows how to open one raw, framed connection. The
//! [`TransportSession`] owns that connection, encodes outgoing messages and feeds
//! decoded inbound messages to an [`InboundHandler`].

pub mod codec;
pub mod endpoint;
pub mod memory;
pub mod session;
pub mod tcp;
pub mod websocket;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, SyncError};
use crate::sync::PatchMessage;

pub use codec::WireFormat;
pub use endpoint::{Endpoint, EndpointConfig};
pub use memory::{MemoryAcceptor, MemoryPeer, MemoryTransport};
pub use session::{ConnectHandle, InboundHandler, TransportSession};
pub use tcp::TcpTransport;
pub use websocket::WebSocketTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Both halves of an open connection. Dropping `outbound` closes the connection;
/// `inbound` ends when the peer goes away.
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<WireFrame>,
    pub inbound: mpsc::UnboundedReceiver<WireFrame>,
    /// Task writing `outbound` to the wire. Finishes once the queue is drained after
    /// `outbound` is dropped. `None` when frames are delivered in place.
    pub writer: Option<JoinHandle<()>>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Whether endpoints for this transport must carry a path segment.
    fn requires_path(&self) -> bool {
        false
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<Connection>;
}

/// Outbound half of a session as seen by the engine.
pub trait PatchSender<D>: Send + Sync {
    /// Hand a message to the transport. Returns once it is buffered; there is no
    /// delivery acknowledgment.
    fn send(&self, message: &PatchMessage<D>) -> Result<()>;

    /// Identifies the live connection; a reconnect yields a different value.
    /// `None` while offline.
    fn connection(&self) -> Option<u64>;

    fn is_connected(&self) -> bool {
        self.connection().is_some()
    }
}

/// Which built-in network transport a host wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    #[serde(alias = "ws")]
    Websocket,
    Tcp,
}

impl TransportKind {
    pub fn build(self) -> Arc<dyn Transport> {
        match self {
            TransportKind::Websocket => Arc::new(WebSocketTransport::new()),
            TransportKind::Tcp => Arc::new(TcpTransport::new()),
        }
    }
}

impl FromStr for TransportKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(TransportKind::Websocket),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(SyncError::Configuration(format!(
                "unknown transport {other:?}"
            ))),
        }
    }
}
