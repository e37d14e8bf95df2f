//! Character-level text diffs in diff-match-patch shape.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff as SimilarDiff};

use super::{sha256_hex, Synchronizer};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TextOperation {
    Unchanged,
    Add,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDiff {
    pub operation: TextOperation,
    pub text: String,
}

impl TextDiff {
    pub fn unchanged(text: impl Into<String>) -> Self {
        Self {
            operation: TextOperation::Unchanged,
            text: text.into(),
        }
    }

    pub fn add(text: impl Into<String>) -> Self {
        Self {
            operation: TextOperation::Add,
            text: text.into(),
        }
    }

    pub fn delete(text: impl Into<String>) -> Self {
        Self {
            operation: TextOperation::Delete,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextSynchronizer;

impl TextSynchronizer {
    pub fn new() -> Self {
        Self
    }
}

impl Synchronizer for TextSynchronizer {
    type Content = String;
    type Diff = TextDiff;

    fn format(&self) -> &'static str {
        "text"
    }

    fn compute_diffs(&self, from: &String, to: &String) -> Vec<TextDiff> {
        if from == to {
            return Vec::new();
        }

        let diff = SimilarDiff::from_chars(from.as_str(), to.as_str());
        let mut diffs: Vec<TextDiff> = Vec::new();

        for change in diff.iter_all_changes() {
            let operation = match change.tag() {
                ChangeTag::Equal => TextOperation::Unchanged,
                ChangeTag::Insert => TextOperation::Add,
                ChangeTag::Delete => TextOperation::Delete,
            };

            // Coalesce runs of the same operation
            match diffs.last_mut() {
                Some(last) if last.operation == operation => last.text.push_str(change.value()),
                _ => diffs.push(TextDiff {
                    operation,
                    text: change.value().to_string(),
                }),
            }
        }

        diffs
    }

    fn apply_diffs(&self, content: &String, diffs: &[TextDiff]) -> Result<String> {
        if diffs.is_empty() {
            return Ok(content.clone());
        }

        let mut out = String::with_capacity(content.len());
        let mut rest = content.as_str();

        for diff in diffs {
            match diff.operation {
                TextOperation::Add => out.push_str(&diff.text),
                TextOperation::Unchanged | TextOperation::Delete => {
                    let Some(tail) = rest.strip_prefix(diff.text.as_str()) else {
                        return Err(SyncError::MalformedEdit(format!(
                            "{:?} of {:?} does not match content at offset {}",
                            diff.operation,
                            diff.text,
                            content.len() - rest.len()
                        )));
                    };
                    if diff.operation == TextOperation::Unchanged {
                        out.push_str(&diff.text);
                    }
                    rest = tail;
                }
            }
        }

        if !rest.is_empty() {
            return Err(SyncError::MalformedEdit(format!(
                "edit leaves {} trailing bytes unaccounted for",
                rest.len()
            )));
        }

        Ok(out)
    }

    fn checksum(&self, content: &String) -> String {
        sha256_hex(content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(from: &str, to: &str) {
        let sync = TextSynchronizer::new();
        let diffs = sync.compute_diffs(&from.to_string(), &to.to_string());
        let applied = sync.apply_diffs(&from.to_string(), &diffs).unwrap();
        assert_eq!(applied, to, "diffs {diffs:?}");
    }

    #[test]
    fn round_trips_common_shapes() {
        round_trip("", "hello");
        round_trip("hello", "");
        round_trip("hello", "hello world");
        round_trip("hello world", "world");
        round_trip("kitten", "sitting");
        round_trip("line one\nline two\n", "line one\nline 2\nline three\n");
        round_trip("naïve café", "naive cafe ☕");
    }

    #[test]
    fn empty_shadow_to_hello_is_a_single_add() {
        let sync = TextSynchronizer::new();
        let diffs = sync.compute_diffs(&String::new(), &"hello".to_string());
        assert_eq!(diffs, vec![TextDiff::add("hello")]);
    }

    #[test]
    fn runs_are_coalesced() {
        let sync = TextSynchronizer::new();
        let diffs = sync.compute_diffs(&"abcdef".to_string(), &"abcXYZdef".to_string());
        assert_eq!(
            diffs,
            vec![
                TextDiff::unchanged("abc"),
                TextDiff::add("XYZ"),
                TextDiff::unchanged("def"),
            ]
        );
    }

    #[test]
    fn diff_is_deterministic() {
        let sync = TextSynchronizer::new();
        let a = "The rain in Spain".to_string();
        let b = "The pain in Maine".to_string();
        assert_eq!(sync.compute_diffs(&a, &b), sync.compute_diffs(&a, &b));
    }

    #[test]
    fn mismatched_delete_is_malformed() {
        let sync = TextSynchronizer::new();
        let diffs = vec![TextDiff::delete("xyz"), TextDiff::add("abc")];
        assert!(matches!(
            sync.apply_diffs(&"hello".to_string(), &diffs),
            Err(SyncError::MalformedEdit(_))
        ));
    }

    #[test]
    fn partial_coverage_is_malformed() {
        let sync = TextSynchronizer::new();
        let diffs = vec![TextDiff::unchanged("hel")];
        assert!(matches!(
            sync.apply_diffs(&"hello".to_string(), &diffs),
            Err(SyncError::MalformedEdit(_))
        ));
    }

    #[test]
    fn wire_shape_matches_diff_match_patch() {
        let json = serde_json::to_string(&TextDiff::add("hi")).unwrap();
        assert_eq!(json, r#"{"operation":"ADD","text":"hi"}"#);
    }
}
