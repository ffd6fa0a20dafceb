//! Pending updates: materialization against committed data and application.
//!
//! An update is materialized at write time, rooted at the committed data:
//! missing intermediate documents and invalid array positions are rejected
//! there, so commit-time application cannot fail on a well-formed update
//! set. Array writes are rewritten into whole-array updates at the parent
//! path; object writes record the target path directly.

use poldb_error::{Result, StoreError};
use poldb_path::Path;
use poldb_types::{
    apply_patch, parse_array_index, value_at_mut, Array, Object, PatchOp, Value,
};

/// One pending write, recorded in a transaction.
#[derive(Debug, Clone)]
pub(crate) struct Update {
    pub(crate) path: Path,
    pub(crate) value: Value,
    pub(crate) remove: bool,
}

impl Update {
    /// Materialize an update for `op` at `path`, rooted at `data`.
    pub(crate) fn new(data: &Value, op: PatchOp, path: &Path, value: Value) -> Result<Self> {
        debug_assert!(!path.is_empty(), "root updates are built by update_root");
        make_update(data, op, path, 0, value)
    }

    /// A whole-document replacement (the root update).
    pub(crate) fn root(value: Value) -> Self {
        Self {
            path: Path::root(),
            value,
            remove: false,
        }
    }

    /// Apply this update to the committed tree in place.
    pub(crate) fn apply(&self, data: &mut Value) -> Result<()> {
        if self.path.is_empty() {
            *data = self.value.clone();
            return Ok(());
        }

        let parent_len = self.path.len() - 1;
        let parent = value_at_mut(data, &self.path[..parent_len]).map_err(|_| {
            StoreError::internal(format!("update parent vanished: {}", self.path))
        })?;
        let key = &self.path[parent_len];

        match parent {
            Value::Object(obj) => {
                if self.remove {
                    obj.remove(key);
                } else {
                    obj.insert(key.as_arc().clone(), self.value.clone());
                }
                Ok(())
            }
            Value::Array(arr) => {
                let idx = parse_array_index(key, arr.len())
                    .filter(|&i| i < arr.len())
                    .ok_or_else(|| {
                        StoreError::internal(format!("update index vanished: {}", self.path))
                    })?;
                if self.remove {
                    arr.remove(idx);
                } else {
                    arr.set(idx, self.value.clone());
                }
                Ok(())
            }
            _ => Err(StoreError::internal(format!(
                "update parent is a scalar: {}",
                self.path
            ))),
        }
    }

    /// Fold this update into a copy of `base`, where `base` sits at
    /// `prefix_len` segments above this update's path.
    pub(crate) fn apply_relative(&self, base: &Value, prefix_len: usize) -> Value {
        let rel = &self.path[prefix_len..];
        let op = if self.remove {
            PatchOp::Remove
        } else {
            PatchOp::Add
        };
        apply_patch(base, rel, op, &self.value)
    }
}

fn make_update(data: &Value, op: PatchOp, path: &Path, idx: usize, value: Value) -> Result<Update> {
    match data {
        Value::Object(obj) => make_object_update(obj, op, path, idx, value),
        Value::Array(arr) => make_array_update(arr, op, path, idx, value),
        // Navigating into a scalar.
        _ => Err(StoreError::document_missing()),
    }
}

fn make_object_update(
    obj: &Object,
    op: PatchOp,
    path: &Path,
    idx: usize,
    value: Value,
) -> Result<Update> {
    let key = &path[idx];
    if idx == path.len() - 1 {
        if matches!(op, PatchOp::Replace | PatchOp::Remove) && !obj.contains_key(key) {
            return Err(StoreError::document_missing());
        }
        return Ok(Update {
            path: path.clone(),
            value,
            remove: op == PatchOp::Remove,
        });
    }

    match obj.get(key) {
        Some(child) => make_update(child, op, path, idx + 1, value),
        None => Err(StoreError::document_missing()),
    }
}

fn make_array_update(
    arr: &Array,
    op: PatchOp,
    path: &Path,
    idx: usize,
    value: Value,
) -> Result<Update> {
    let key = &path[idx];
    let terminal = idx == path.len() - 1;

    if !terminal {
        if &**key == "-" {
            return Err(StoreError::invalid_patch(format!(
                "{path}: invalid patch path"
            )));
        }
        let pos = parse_array_index(key, arr.len())
            .filter(|&p| p < arr.len())
            .ok_or_else(StoreError::document_missing)?;
        return make_update(&arr.as_slice()[pos], op, path, idx + 1, value);
    }

    // Append position: `-` or the index one past the end.
    if &**key == "-" || parse_array_index(key, arr.len()) == Some(arr.len()) {
        if op != PatchOp::Add {
            return Err(StoreError::invalid_patch(format!(
                "{path}: invalid patch path"
            )));
        }
        let mut copy = Array::with_capacity(arr.len() + 1);
        for item in arr.iter() {
            copy.push(item.clone());
        }
        copy.push(value);
        return Ok(Update {
            path: Path::from(&path[..path.len() - 1]),
            value: Value::Array(copy),
            remove: false,
        });
    }

    let pos = parse_array_index(key, arr.len())
        .filter(|&p| p < arr.len())
        .ok_or_else(StoreError::document_missing)?;

    let mut copy = Array::with_capacity(arr.len() + 1);
    for item in arr.iter() {
        copy.push(item.clone());
    }
    match op {
        PatchOp::Add => copy.insert(pos, value),
        PatchOp::Replace => copy.set(pos, value),
        PatchOp::Remove => {
            copy.remove(pos);
        }
    }
    Ok(Update {
        path: Path::from(&path[..path.len() - 1]),
        value: Value::Array(copy),
        remove: false,
    })
}
