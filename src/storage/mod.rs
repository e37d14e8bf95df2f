pub mod client_id;
pub mod store;

pub use client_id::{generate_client_id, ClientIdStore};
pub use store::{DocumentEntry, DocumentStore, EntryHandle};
