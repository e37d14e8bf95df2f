//! # diffsync - Differential Synchronization Client
//!
//! Keeps local documents in step with a sync server using differential
//! synchronization: every document has a shadow (the last state both sides agreed
//! on) and a version counter, local edits travel as diffs against the shadow, and
//! server patches are applied to the shadow before they reach the document.
//!
//! ## Features
//!
//! - **Text and JSON documents**: character diffs in diff-match-patch shape, or
//!   RFC 6902 JSON Patch
//! - **Pluggable transports**: WebSocket, length-prefixed TCP, in-memory
//! - **JSON or CBOR** on the wire
//! - **Per-document locking**: independent documents never block each other
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use diffsync::{ClientDocument, SyncClient, SyncListener, TextSynchronizer};
//!
//! struct Printer;
//!
//! impl SyncListener<String> for Printer {
//!     fn on_patch_applied(&self, doc: &ClientDocument<String>) -> anyhow::Result<()> {
//!         println!("{} is now {:?}", doc.id, doc.content);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = SyncClient::builder(TextSynchronizer::new())
//!         .host("localhost")
//!         .port(8080)
//!         .path("/sync")
//!         .build()?;
//!
//!     client.subscribe(Arc::new(Printer));
//!     client.connect()?.await?;
//!
//!     let doc = client.new_document("notes", "hello".to_string());
//!     client.add_document(doc.clone())?;
//!     client.diff_and_send(&doc)?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod logging;
pub mod storage;
pub mod sync;
pub mod synchronizer;
pub mod transport;

pub use client::{SyncClient, SyncClientBuilder};
pub use config::SyncConfig;
pub use document::{ClientDocument, DocumentState, Edit, Shadow};
pub use error::{with_retry, ErrorCategory, Result, RetryPolicy, SyncError};
pub use storage::{ClientIdStore, DocumentStore};
pub use sync::{MessageType, PatchMessage, PatchOutcome, SubscriptionId, SyncEngine, SyncListener};
pub use synchronizer::{JsonPatchSynchronizer, Synchronizer, TextSynchronizer};
pub use transport::{ConnectHandle, ConnectionState, Endpoint, EndpointConfig, TransportKind, WireFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
