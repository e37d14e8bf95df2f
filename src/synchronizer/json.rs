//! Structural diffs over JSON trees, expressed as a subset of JSON Patch
//! (RFC 6902): `add`, `remove` and `replace` with JSON Pointer paths.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{sha256_hex, Synchronizer};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JsonPatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl JsonPatchOp {
    pub fn path(&self) -> &str {
        match self {
            JsonPatchOp::Add { path, .. }
            | JsonPatchOp::Remove { path }
            | JsonPatchOp::Replace { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPatchSynchronizer;

impl JsonPatchSynchronizer {
    pub fn new() -> Self {
        Self
    }
}

impl Synchronizer for JsonPatchSynchronizer {
    type Content = Value;
    type Diff = JsonPatchOp;

    fn format(&self) -> &'static str {
        "json-patch"
    }

    fn compute_diffs(&self, from: &Value, to: &Value) -> Vec<JsonPatchOp> {
        let mut ops = Vec::new();
        diff_values("", from, to, &mut ops);
        ops
    }

    fn apply_diffs(&self, content: &Value, diffs: &[JsonPatchOp]) -> Result<Value> {
        let mut doc = content.clone();
        for op in diffs {
            apply_op(&mut doc, op)?;
        }
        Ok(doc)
    }

    fn checksum(&self, content: &Value) -> String {
        // Map is ordered by key, so serialization is canonical.
        sha256_hex(content.to_string().as_bytes())
    }
}

fn diff_values(path: &str, from: &Value, to: &Value, ops: &mut Vec<JsonPatchOp>) {
    if from == to {
        return;
    }

    match (from, to) {
        (Value::Object(a), Value::Object(b)) => diff_objects(path, a, b, ops),
        (Value::Array(a), Value::Array(b)) => {
            let common = a.len().min(b.len());
            for i in 0..common {
                diff_values(&child_path(path, &i.to_string()), &a[i], &b[i], ops);
            }
            // Remove from the tail first so earlier indices stay valid
            for i in (common..a.len()).rev() {
                ops.push(JsonPatchOp::Remove {
                    path: child_path(path, &i.to_string()),
                });
            }
            for (i, value) in b.iter().enumerate().skip(common) {
                ops.push(JsonPatchOp::Add {
                    path: child_path(path, &i.to_string()),
                    value: value.clone(),
                });
            }
        }
        _ => ops.push(JsonPatchOp::Replace {
            path: path.to_string(),
            value: to.clone(),
        }),
    }
}

fn diff_objects(path: &str, a: &Map<String, Value>, b: &Map<String, Value>, ops: &mut Vec<JsonPatchOp>) {
    for (key, old) in a {
        let child = child_path(path, key);
        match b.get(key) {
            Some(new) => diff_values(&child, old, new, ops),
            None => ops.push(JsonPatchOp::Remove { path: child }),
        }
    }
    for (key, new) in b {
        if !a.contains_key(key) {
            ops.push(JsonPatchOp::Add {
                path: child_path(path, key),
                value: new.clone(),
            });
        }
    }
}

fn child_path(parent: &str, token: &str) -> String {
    format!("{}/{}", parent, token.replace('~', "~0").replace('/', "~1"))
}

fn parse_pointer(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(SyncError::MalformedEdit(format!(
            "JSON pointer {path:?} must start with '/'"
        )));
    };
    Ok(rest
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn malformed(op: &JsonPatchOp, reason: &str) -> SyncError {
    SyncError::MalformedEdit(format!("{} at {:?}: {}", op_name(op), op.path(), reason))
}

fn op_name(op: &JsonPatchOp) -> &'static str {
    match op {
        JsonPatchOp::Add { .. } => "add",
        JsonPatchOp::Remove { .. } => "remove",
        JsonPatchOp::Replace { .. } => "replace",
    }
}

fn array_index(op: &JsonPatchOp, token: &str, len: usize, allow_end: bool) -> Result<usize> {
    if allow_end && token == "-" {
        return Ok(len);
    }
    let index: usize = token
        .parse()
        .map_err(|_| malformed(op, "array index is not a number"))?;
    let limit = if allow_end { len } else { len.saturating_sub(1) };
    if (allow_end && index > limit) || (!allow_end && (len == 0 || index > limit)) {
        return Err(malformed(op, "array index out of bounds"));
    }
    Ok(index)
}

fn apply_op(doc: &mut Value, op: &JsonPatchOp) -> Result<()> {
    let mut tokens = parse_pointer(op.path())?;

    let Some(last) = tokens.pop() else {
        // Root pointer
        return match op {
            JsonPatchOp::Add { value, .. } | JsonPatchOp::Replace { value, .. } => {
                *doc = value.clone();
                Ok(())
            }
            JsonPatchOp::Remove { .. } => Err(malformed(op, "cannot remove the document root")),
        };
    };

    let mut parent = &mut *doc;
    for token in &tokens {
        parent = match parent {
            Value::Object(map) => map
                .get_mut(token.as_str())
                .ok_or_else(|| malformed(op, "missing parent"))?,
            Value::Array(items) => {
                let index = array_index(op, token, items.len(), false)?;
                &mut items[index]
            }
            _ => return Err(malformed(op, "parent is not a container")),
        };
    }

    match (parent, op) {
        (Value::Object(map), JsonPatchOp::Add { value, .. }) => {
            map.insert(last, value.clone());
        }
        (Value::Object(map), JsonPatchOp::Remove { .. }) => {
            map.remove(last.as_str())
                .ok_or_else(|| malformed(op, "member does not exist"))?;
        }
        (Value::Object(map), JsonPatchOp::Replace { value, .. }) => {
            let slot = map
                .get_mut(last.as_str())
                .ok_or_else(|| malformed(op, "member does not exist"))?;
            *slot = value.clone();
        }
        (Value::Array(items), JsonPatchOp::Add { value, .. }) => {
            let index = array_index(op, &last, items.len(), true)?;
            items.insert(index, value.clone());
        }
        (Value::Array(items), JsonPatchOp::Remove { .. }) => {
            let index = array_index(op, &last, items.len(), false)?;
            items.remove(index);
        }
        (Value::Array(items), JsonPatchOp::Replace { value, .. }) => {
            let index = array_index(op, &last, items.len(), false)?;
            items[index] = value.clone();
        }
        _ => return Err(malformed(op, "parent is not a container")),
    }

    Ok(())
}
