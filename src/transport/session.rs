use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::{self, WireFormat};
use super::{Connection, ConnectionState, Endpoint, PatchSender, Transport, WireFrame};
use crate::error::{Result, SyncError};
use crate::sync::PatchMessage;

/// Receiver of everything a session observes. The sync engine implements this;
/// hosts wire the two together explicitly.
pub trait InboundHandler<D>: Send + Sync {
    fn on_message(&self, message: PatchMessage<D>);

    fn on_state(&self, state: ConnectionState);

    fn on_error(&self, error: &SyncError);
}

/// Resolves once a connect attempt succeeds or fails.
#[must_use = "the connect outcome is only observable through the handle or listener events"]
pub struct ConnectHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl ConnectHandle {
    fn ready(result: Result<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    pub async fn wait(self) -> Result<()> {
        self.await
    }
}

impl Future for ConnectHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(SyncError::Connection(
                    "connect task ended before reporting".into(),
                ))
            })
        })
    }
}

struct SessionInner<D> {
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<WireFrame>>,
    handler: Option<Arc<dyn InboundHandler<D>>>,
    task: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    /// Bumped by every connect and disconnect so a stale task cannot clobber newer state.
    generation: u64,
}

/// Owns at most one connection at a time.
///
/// `send` encodes and buffers onto the connection's unbounded outbound queue and
/// returns immediately. There is no reconnect logic; after a drop the owner must call
/// `connect` again.
pub struct TransportSession<D> {
    transport: Arc<dyn Transport>,
    format: WireFormat,
    inner: Mutex<SessionInner<D>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<D> TransportSession<D>
where
    D: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(transport: Arc<dyn Transport>, format: WireFormat) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            transport,
            format,
            inner: Mutex::new(SessionInner {
                state: ConnectionState::Disconnected,
                outbound: None,
                handler: None,
                task: None,
                writer: None,
                generation: 0,
            }),
            state_tx,
        })
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn requires_path(&self) -> bool {
        self.transport.requires_path()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Start connecting in the background.
    ///
    /// Endpoint problems are returned here, before any I/O. Network failures come
    /// back through the handle and `InboundHandler::on_error`. While connecting or
    /// connected this is a no-op.
    pub fn connect(
        self: &Arc<Self>,
        endpoint: &Endpoint,
        handler: Arc<dyn InboundHandler<D>>,
    ) -> Result<ConnectHandle> {
        endpoint.ensure_path(self.transport.requires_path())?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Connection(format!("no async runtime to connect on: {e}")))?;

        let generation = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Disconnected {
                debug!(state = %inner.state, "connect ignored, session already active");
                return Ok(ConnectHandle::ready(Ok(())));
            }
            inner.generation += 1;
            inner.handler = Some(Arc::clone(&handler));
            self.set_state(&mut inner, ConnectionState::Connecting);
            inner.generation
        };
        handler.on_state(ConnectionState::Connecting);

        let (done_tx, done_rx) = oneshot::channel();
        let session = Arc::clone(self);
        let endpoint = endpoint.clone();
        let task = runtime.spawn(async move {
            session.run(generation, endpoint, handler, done_tx).await;
        });

        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.task = Some(task);
        }

        Ok(ConnectHandle { rx: done_rx })
    }

    /// Close the current connection, if any. Frames already queued are still written
    /// in the background; use [`close`](Self::close) to wait for them.
    pub fn disconnect(&self) {
        self.shut_down();
    }

    /// Close the current connection and wait, at most `grace`, until every frame
    /// queued before the call has been written out.
    pub async fn close(&self, grace: Duration) {
        let Some(writer) = self.shut_down() else {
            return;
        };
        match tokio::time::timeout(grace, writer).await {
            Ok(Ok(())) => debug!("outbound queue drained"),
            Ok(Err(err)) => warn!("outbound writer failed: {err}"),
            Err(_) => warn!(?grace, "outbound queue not drained before close"),
        }
    }

    /// Returns the writer of the connection that was closed.
    fn shut_down(&self) -> Option<JoinHandle<()>> {
        let (handler, writer) = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Disconnected {
                return None;
            }
            inner.generation += 1;
            inner.outbound = None;
            if let Some(task) = inner.task.take() {
                task.abort();
            }
            self.set_state(&mut inner, ConnectionState::Disconnected);
            (inner.handler.take(), inner.writer.take())
        };

        info!(transport = self.transport.name(), "disconnected");
        if let Some(handler) = handler {
            handler.on_state(ConnectionState::Disconnected);
        }
        writer
    }

    async fn run(
        self: Arc<Self>,
        generation: u64,
        endpoint: Endpoint,
        handler: Arc<dyn InboundHandler<D>>,
        done: oneshot::Sender<Result<()>>,
    ) {
        info!(
            transport = self.transport.name(),
            endpoint = %endpoint.authority(),
            "connecting"
        );

        let Connection {
            outbound,
            mut inbound,
            writer,
        } = match self.transport.open(&endpoint).await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(endpoint = %endpoint.authority(), "connect failed: {err}");
                if self.finish(generation) {
                    handler.on_error(&err);
                    handler.on_state(ConnectionState::Disconnected);
                }
                let _ = done.send(Err(err));
                return;
            }
        };

        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                // Disconnected while the handshake was in flight
                return;
            }
            inner.outbound = Some(outbound);
            inner.writer = writer;
            self.set_state(&mut inner, ConnectionState::Connected);
        }
        info!(endpoint = %endpoint.authority(), "connected");
        handler.on_state(ConnectionState::Connected);
        let _ = done.send(Ok(()));

        while let Some(frame) = inbound.recv().await {
            match codec::decode::<D>(&frame) {
                Ok(message) => handler.on_message(message),
                Err(err) => warn!("dropping inbound frame: {err}"),
            }
        }

        if self.finish(generation) {
            info!(endpoint = %endpoint.authority(), "connection closed by peer");
            handler.on_state(ConnectionState::Disconnected);
        }
    }

    /// Mark the connection of `generation` as gone. False when it was already replaced.
    fn finish(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation || inner.state == ConnectionState::Disconnected {
            return false;
        }
        inner.outbound = None;
        inner.task = None;
        inner.writer = None;
        inner.handler = None;
        self.set_state(&mut inner, ConnectionState::Disconnected);
        true
    }

    fn set_state(&self, inner: &mut SessionInner<D>, state: ConnectionState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }
}

impl<D> PatchSender<D> for TransportSession<D>
where
    D: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn send(&self, message: &PatchMessage<D>) -> Result<()> {
        let frame = codec::encode(self.format, message)?;
        let inner = self.inner.lock();
        match (&inner.outbound, inner.state) {
            (Some(outbound), ConnectionState::Connected) => outbound
                .send(frame)
                .map_err(|_| SyncError::Connection("connection closed".into())),
            _ => Err(SyncError::NotConnected),
        }
    }

    fn connection(&self) -> Option<u64> {
        let inner = self.inner.lock();
        (inner.state == ConnectionState::Connected).then_some(inner.generation)
    }
}
