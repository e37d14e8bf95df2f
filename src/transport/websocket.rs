use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::{Connection, Endpoint, Transport, WireFrame};
use crate::error::{Result, SyncError};

/// `ws://` / `wss://` transport. Text frames carry JSON, binary frames CBOR.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn requires_path(&self) -> bool {
        true
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<Connection> {
        let url = endpoint.websocket_url()?;
        let mut request = url.as_str().into_client_request().map_err(SyncError::connection)?;
        if let Some(protocols) = &endpoint.subprotocols {
            let value = HeaderValue::from_str(protocols)
                .map_err(|e| SyncError::config(format!("invalid subprotocol list {protocols:?}: {e}")))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SyncError::Connection(format!("{url}: {e}")))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<WireFrame>();

        // local -> remote; ends when the session drops its sender
        let write_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let message = match frame {
                    WireFrame::Text(text) => Message::Text(text.into()),
                    WireFrame::Binary(bytes) => Message::Binary(bytes.into()),
                };
                if ws_tx.send(message).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        // remote -> local
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let frame = match msg {
                    Ok(Message::Text(text)) => WireFrame::Text(text.to_string()),
                    Ok(Message::Binary(bin)) => WireFrame::Binary(bin.to_vec()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("websocket read failed: {e}");
                        break;
                    }
                };
                if in_tx.send(frame).is_err() {
                    break;
                }
            }
        });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
            writer: Some(write_task),
        })
    }
}
