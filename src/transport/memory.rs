//! In-process transport. Each `open` hands the far end of a fresh channel pair to a
//! [`MemoryAcceptor`], which plays the server role in tests and embedded setups.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use super::codec::{self, WireFormat};
use super::{Connection, Endpoint, Transport, WireFrame};
use crate::error::{Result, SyncError};
use crate::sync::PatchMessage;

pub struct MemoryTransport {
    acceptor: mpsc::UnboundedSender<MemoryPeer>,
}

pub struct MemoryAcceptor {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// Server side of one in-memory connection. Dropping it closes the connection.
pub struct MemoryPeer {
    pub endpoint: Endpoint,
    from_client: mpsc::UnboundedReceiver<WireFrame>,
    to_client: mpsc::UnboundedSender<WireFrame>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, MemoryAcceptor) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { acceptor: tx }, MemoryAcceptor { incoming: rx })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<Connection> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let peer = MemoryPeer {
            endpoint: endpoint.clone(),
            from_client: out_rx,
            to_client: in_tx,
        };
        self.acceptor.send(peer).map_err(|_| {
            SyncError::Connection(format!("connection refused by {}", endpoint.authority()))
        })?;

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
            writer: None,
        })
    }
}

impl MemoryAcceptor {
    /// Next connection opened through the paired transport. `None` once the
    /// transport is gone.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }
}

impl MemoryPeer {
    /// `None` once the client closed its side.
    pub async fn recv_frame(&mut self) -> Option<WireFrame> {
        self.from_client.recv().await
    }

    pub async fn recv_message<D: DeserializeOwned>(&mut self) -> Option<Result<PatchMessage<D>>> {
        let frame = self.recv_frame().await?;
        Some(codec::decode(&frame))
    }

    pub fn send_frame(&self, frame: WireFrame) -> Result<()> {
        self.to_client
            .send(frame)
            .map_err(|_| SyncError::Connection("client side closed".into()))
    }

    pub fn send_message<D: Serialize>(
        &self,
        format: WireFormat,
        message: &PatchMessage<D>,
    ) -> Result<()> {
        self.send_frame(codec::encode(format, message)?)
    }
}
