use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::WireFrame;
use crate::error::{Result, SyncError};
use crate::sync::PatchMessage;

/// Encoding for outbound frames. Inbound frames are decoded by their kind:
/// text as JSON, binary as CBOR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    Cbor,
}

impl std::str::FromStr for WireFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "cbor" => Ok(WireFormat::Cbor),
            other => Err(SyncError::Configuration(format!("unknown wire format {other:?}"))),
        }
    }
}

pub fn encode<D: Serialize>(format: WireFormat, message: &PatchMessage<D>) -> Result<WireFrame> {
    match format {
        WireFormat::Json => Ok(WireFrame::Text(serde_json::to_string(message)?)),
        WireFormat::Cbor => serde_cbor::to_vec(message)
            .map(WireFrame::Binary)
            .map_err(|e| SyncError::Protocol(format!("failed to encode CBOR frame: {e}"))),
    }
}

pub fn decode<D: DeserializeOwned>(frame: &WireFrame) -> Result<PatchMessage<D>> {
    match frame {
        WireFrame::Text(text) => serde_json::from_str(text)
            .map_err(|e| SyncError::Protocol(format!("undecodable JSON frame: {e}"))),
        WireFrame::Binary(bytes) => serde_cbor::from_slice(bytes)
            .map_err(|e| SyncError::Protocol(format!("undecodable CBOR frame: {e}"))),
    }
}
