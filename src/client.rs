//! Host-facing facade: one engine, one session, one endpoint, one client id.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::config::SyncConfig;
use crate::document::ClientDocument;
use crate::error::{Result, SyncError};
use crate::storage::{generate_client_id, ClientIdStore};
use crate::sync::{SubscriptionId, SyncEngine, SyncListener};
use crate::synchronizer::Synchronizer;
use crate::transport::{
    ConnectHandle, ConnectionState, Endpoint, EndpointConfig, InboundHandler, Transport,
    TransportKind, TransportSession, WireFormat,
};

pub struct SyncClient<S: Synchronizer> {
    engine: Arc<SyncEngine<S>>,
    session: Arc<TransportSession<S::Diff>>,
    endpoint: Endpoint,
    client_id: String,
}

impl<S: Synchronizer> SyncClient<S> {
    pub fn builder(synchronizer: S) -> SyncClientBuilder<S> {
        SyncClientBuilder::new(synchronizer)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn engine(&self) -> &Arc<SyncEngine<S>> {
        &self.engine
    }

    /// A document owned by this client.
    pub fn new_document(&self, id: impl Into<String>, content: S::Content) -> ClientDocument<S::Content> {
        ClientDocument::new(id, self.client_id.clone(), content)
    }

    pub fn add_document(&self, document: ClientDocument<S::Content>) -> Result<()> {
        self.engine.add_document(document)
    }

    pub fn diff_and_send(&self, document: &ClientDocument<S::Content>) -> Result<u64> {
        self.engine.diff_and_send(document)
    }

    pub fn document(&self, document_id: &str) -> Result<ClientDocument<S::Content>> {
        self.engine.document(document_id)
    }

    pub fn subscribe(&self, listener: Arc<dyn SyncListener<S::Content>>) -> SubscriptionId {
        self.engine.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.engine.unsubscribe(id)
    }

    /// Connect in the background. Await the handle to learn the outcome.
    pub fn connect(&self) -> Result<ConnectHandle> {
        let handler: Arc<dyn InboundHandler<S::Diff>> = self.engine.clone();
        self.session.connect(&self.endpoint, handler)
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// Disconnect after everything already sent has reached the wire, or after
    /// `grace` at the latest.
    pub async fn close(&self, grace: Duration) {
        self.session.close(grace).await;
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.watch_state()
    }
}

pub struct SyncClientBuilder<S> {
    synchronizer: S,
    endpoint: EndpointConfig,
    transport: Option<Arc<dyn Transport>>,
    wire_format: WireFormat,
    client_id: Option<String>,
    client_id_store: Option<PathBuf>,
}

impl<S: Synchronizer> SyncClientBuilder<S> {
    pub fn new(synchronizer: S) -> Self {
        Self {
            synchronizer,
            endpoint: EndpointConfig::default(),
            transport: None,
            wire_format: WireFormat::default(),
            client_id: None,
            client_id_store: None,
        }
    }

    /// Take endpoint, transport, wire format and client id store from a config file.
    pub fn config(mut self, config: &SyncConfig) -> Self {
        self.endpoint = config.server.clone();
        self.transport = Some(config.client.transport.build());
        self.wire_format = config.client.wire_format;
        self.client_id_store = config.client.client_id_store.clone();
        self
    }

    pub fn endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.endpoint = self.endpoint.host(host);
        self
    }

    pub fn port(mut self, port: i64) -> Self {
        self.endpoint = self.endpoint.port(port);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.endpoint = self.endpoint.path(path);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.endpoint = self.endpoint.secure(secure);
        self
    }

    pub fn subprotocols(mut self, subprotocols: impl Into<String>) -> Self {
        self.endpoint = self.endpoint.subprotocols(subprotocols);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn transport_kind(self, kind: TransportKind) -> Self {
        self.transport(kind.build())
    }

    pub fn wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_id_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_id_store = Some(path.into());
        self
    }

    /// Validate the endpoint and settle the client id. Never touches the network.
    pub fn build(self) -> Result<SyncClient<S>> {
        let transport = self
            .transport
            .unwrap_or_else(|| TransportKind::default().build());
        let endpoint = self.endpoint.build(transport.requires_path())?;

        let client_id = match (self.client_id, self.client_id_store) {
            (Some(id), _) if id.trim().is_empty() => {
                return Err(SyncError::config("client id may not be empty"));
            }
            (Some(id), _) => id,
            (None, Some(path)) => ClientIdStore::open(path).load_or_create()?,
            (None, None) => generate_client_id(),
        };

        let session = TransportSession::new(transport, self.wire_format);
        let engine = Arc::new(SyncEngine::new(self.synchronizer, session.clone()));

        info!(
            client_id = %client_id,
            transport = session.transport_name(),
            endpoint = %endpoint.authority(),
            "sync client ready"
        );

        Ok(SyncClient {
            engine,
            session,
            endpoint,
            client_id,
        })
    }
}
