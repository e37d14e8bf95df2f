//! Diff computation and patch application.
//!
//! A [`Synchronizer`] fixes one diff format. Client and server must agree on it;
//! a diff in another format does not decode and is treated as a protocol error.

pub mod json;
pub mod text;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::document::{ClientDocument, Edit, Shadow};
use crate::error::{Result, SyncError};

pub use json::{JsonPatchOp, JsonPatchSynchronizer};
pub use text::{TextDiff, TextOperation, TextSynchronizer};

pub trait Synchronizer: Send + Sync + 'static {
    type Content: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static;
    type Diff: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Short name of the diff format, used in logs.
    fn format(&self) -> &'static str;

    /// Minimal, deterministic diffs turning `from` into `to`. Empty when equal.
    fn compute_diffs(&self, from: &Self::Content, to: &Self::Content) -> Vec<Self::Diff>;

    /// Apply `diffs` in order. Fails with `MalformedEdit` when a diff does not fit `content`.
    fn apply_diffs(&self, content: &Self::Content, diffs: &[Self::Diff]) -> Result<Self::Content>;

    fn checksum(&self, content: &Self::Content) -> String;

    /// Edit from the shadow to the document's current content.
    fn diff(
        &self,
        document: &ClientDocument<Self::Content>,
        shadow: &Shadow<Self::Content>,
    ) -> Edit<Self::Diff> {
        Edit::new(
            shadow.version,
            self.compute_diffs(&shadow.content, &document.content),
        )
        .with_checksum(self.checksum(&shadow.content))
    }

    /// Apply an inbound edit against `shadow`, returning the new content.
    fn apply_edit(
        &self,
        shadow: &Shadow<Self::Content>,
        edit: &Edit<Self::Diff>,
    ) -> Result<Self::Content> {
        if edit.version != shadow.version {
            return Err(SyncError::VersionConflict {
                document_id: shadow.document_id.clone(),
                edit_version: edit.version,
                shadow_version: shadow.version,
            });
        }

        if let Some(expected) = edit.checksum.as_deref() {
            let actual = self.checksum(&shadow.content);
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(SyncError::MalformedEdit(format!(
                    "checksum mismatch for {} at version {}",
                    shadow.document_id, shadow.version
                )));
            }
        }

        self.apply_diffs(&shadow.content, &edit.diffs)
    }

    /// Advance the shadow past one successfully applied or sent edit.
    fn patch_shadow(
        &self,
        shadow: &Shadow<Self::Content>,
        content: Self::Content,
    ) -> Shadow<Self::Content> {
        Shadow {
            document_id: shadow.document_id.clone(),
            client_id: shadow.client_id.clone(),
            version: shadow.version + 1,
            content,
        }
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shadow(version: u64, content: &str) -> Shadow<String> {
        Shadow {
            document_id: "doc1".into(),
            client_id: "c1".into(),
            version,
            content: content.into(),
        }
    }

    #[test]
    fn diff_then_apply_round_trips() {
        let sync = TextSynchronizer::new();
        let base = shadow(4, "the quick brown fox");
        let doc = ClientDocument::new("doc1", "c1", "the slow brown dog".to_string());

        let edit = sync.diff(&doc, &base);
        assert_eq!(edit.version, 4);
        assert_eq!(edit.checksum.as_deref(), Some(sync.checksum(&base.content).as_str()));
        assert_eq!(sync.apply_edit(&base, &edit).unwrap(), doc.content);
    }

    #[test]
    fn diff_of_identical_content_is_empty() {
        let sync = TextSynchronizer::new();
        let base = shadow(2, "same");
        let doc = ClientDocument::new("doc1", "c1", "same".to_string());
        assert!(sync.diff(&doc, &base).is_empty());
    }

    #[test]
    fn same_edit_twice_is_a_version_conflict() {
        let sync = TextSynchronizer::new();
        let base = shadow(1, "hello");
        let doc = ClientDocument::new("doc1", "c1", "hello world".to_string());
        let edit = sync.diff(&doc, &base);

        let content = sync.apply_edit(&base, &edit).unwrap();
        let advanced = sync.patch_shadow(&base, content);
        assert_eq!(advanced.version, 2);

        let err = sync.apply_edit(&advanced, &edit).unwrap_err();
        assert!(matches!(
            err,
            SyncError::VersionConflict {
                edit_version: 1,
                shadow_version: 2,
                ..
            }
        ));
    }

    #[test]
    fn checksum_mismatch_is_malformed() {
        let sync = TextSynchronizer::new();
        let base = shadow(0, "abc");
        let edit = Edit::new(0, vec![]).with_checksum("deadbeef");
        assert!(matches!(
            sync.apply_edit(&base, &edit),
            Err(SyncError::MalformedEdit(_))
        ));
    }
}
