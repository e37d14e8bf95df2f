//! Differential synchronization of local documents against a server.

pub mod engine;
pub mod listener;
pub mod message;

pub use engine::{PatchOutcome, SyncEngine};
pub use listener::{ListenerRegistry, SubscriptionId, SyncListener};
pub use message::{MessageType, PatchMessage};
