//! Raw TCP transport.
//!
//! Every frame is `[kind: u8][len: u32 BE][payload]`, where kind 0 is UTF-8 JSON
//! text and kind 1 is CBOR.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Connection, Endpoint, Transport, WireFrame};
use crate::error::{Result, SyncError};

const KIND_TEXT: u8 = 0;
const KIND_BINARY: u8 = 1;
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Default, Clone)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<Connection> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| SyncError::Connection(format!("{}: {e}", endpoint.authority())))?;
        stream.set_nodelay(true).map_err(SyncError::connection)?;
        let (mut reader, mut writer) = stream.into_split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireFrame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<WireFrame>();

        let write_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    debug!("tcp write failed: {e}");
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => {
                        if in_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("tcp read failed: {e}");
                        break;
                    }
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

pub async fn write_frame<W>(writer: &mut W, frame: &WireFrame) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (kind, payload) = match frame {
        WireFrame::Text(text) => (KIND_TEXT, text.as_bytes()),
        WireFrame::Binary(bytes) => (KIND_BINARY, bytes.as_slice()),
    };
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds limit", payload.len()),
            )
        })?;

    writer.write_u8(kind).await?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Read one frame. `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<WireFrame>>
where
    R: AsyncRead + Unpin,
{
    let kind = match reader.read_u8().await {
        Ok(kind) => kind,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    let len = reader.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;

    match kind {
        KIND_TEXT => String::from_utf8(payload)
            .map(|text| Some(WireFrame::Text(text)))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        KIND_BINARY => Ok(Some(WireFrame::Binary(payload))),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown frame kind {other}"),
        )),
    }
}
