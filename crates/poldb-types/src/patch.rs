//! Patch operations and copy-building patch application.
//!
//! [`apply_patch`] builds a patched copy of a base value without touching
//! the original. The engines use it when folding pending transaction
//! updates into a materialized snapshot; the committed stores have their
//! own in-place apply paths. [`validate_patch_target`] enforces the shared
//! write-time rules (intermediates must exist, array positions must be in
//! range, `-` is an Add-only append marker) so both engines surface the
//! same errors.

use poldb_error::{Result, StoreError};
use poldb_path::InternedStr;

use crate::value::{Object, Value};

/// A write operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    /// Insert a value; creates object keys, inserts into arrays.
    Add,
    /// Replace an existing value.
    Replace,
    /// Remove an existing value.
    Remove,
}

/// Parse an array index key.
///
/// `-` addresses one past the end (the append position for adds); decimal
/// digits address an element. No bounds check is applied here — callers
/// decide whether `len` itself is in range.
#[must_use]
pub fn parse_array_index(key: &str, len: usize) -> Option<usize> {
    if key == "-" {
        return Some(len);
    }
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<usize>().ok()
}

/// Check that a patch at `path` can apply to `base`.
///
/// The rules both engines enforce at write time:
///
/// - intermediate segments must resolve (no creation on the way down);
/// - navigating into a scalar is `NotFound`;
/// - `Replace`/`Remove` on a missing object key is `NotFound`;
/// - array positions: `-` or the length itself are Add-only append
///   positions (`InvalidPatch` otherwise); past-the-end is `NotFound`.
pub fn validate_patch_target(base: &Value, path: &[InternedStr], op: PatchOp) -> Result<()> {
    let Some((key, rest)) = path.split_first() else {
        return Ok(());
    };
    let terminal = rest.is_empty();

    match base {
        Value::Object(obj) => match obj.get(key) {
            Some(_) if terminal => Ok(()),
            Some(child) => validate_patch_target(child, rest, op),
            None if terminal && op == PatchOp::Add => Ok(()),
            None => Err(StoreError::document_missing()),
        },
        Value::Array(arr) => {
            if key.as_str() == "-" {
                return if terminal && op == PatchOp::Add {
                    Ok(())
                } else {
                    Err(StoreError::invalid_patch(format!(
                        "{}: invalid patch path",
                        poldb_path::Path::from(path)
                    )))
                };
            }
            let Some(pos) = parse_array_index(key, arr.len()) else {
                return Err(StoreError::document_missing());
            };
            if terminal {
                if pos == arr.len() {
                    return if op == PatchOp::Add {
                        Ok(())
                    } else {
                        Err(StoreError::invalid_patch(format!(
                            "{}: invalid patch path",
                            poldb_path::Path::from(path)
                        )))
                    };
                }
                if pos < arr.len() {
                    return Ok(());
                }
                return Err(StoreError::document_missing());
            }
            match arr.get(pos) {
                Some(child) => validate_patch_target(child, rest, op),
                None => Err(StoreError::document_missing()),
            }
        }
        _ => Err(StoreError::document_missing()),
    }
}

/// Build a copy of `base` with the patch applied at `path`.
///
/// Paths that do not resolve leave the affected subtree unchanged; the
/// caller is expected to have validated the patch against the data it was
/// recorded on.
#[must_use]
pub fn apply_patch(base: &Value, path: &[InternedStr], op: PatchOp, value: &Value) -> Value {
    let Some((key, rest)) = path.split_first() else {
        return match op {
            PatchOp::Remove => Value::Null,
            PatchOp::Add | PatchOp::Replace => value.clone(),
        };
    };

    match base {
        Value::Object(obj) => Value::Object(apply_to_object(obj, key, rest, op, value)),
        Value::Array(arr) => apply_to_array(arr, key, rest, op, value),
        // Cannot navigate into a scalar; keep it unchanged.
        other => other.clone(),
    }
}

fn apply_to_object(
    obj: &Object,
    key: &InternedStr,
    rest: &[InternedStr],
    op: PatchOp,
    value: &Value,
) -> Object {
    let mut result = Object::with_capacity(obj.len() + 1);
    for (k, v) in obj.iter() {
        result.insert(k.clone(), v.clone());
    }

    if rest.is_empty() {
        match op {
            PatchOp::Add | PatchOp::Replace => {
                result.insert(key.as_arc().clone(), value.clone());
            }
            PatchOp::Remove => {
                result.remove(key);
            }
        }
        return result;
    }

    if let Some(existing) = obj.get(key) {
        result.insert(key.as_arc().clone(), apply_patch(existing, rest, op, value));
    } else if op == PatchOp::Add {
        // Create the intermediate object on the way down.
        let empty = Value::Object(Object::new());
        result.insert(key.as_arc().clone(), apply_patch(&empty, rest, op, value));
    }

    result
}

fn apply_to_array(
    arr: &crate::value::Array,
    key: &InternedStr,
    rest: &[InternedStr],
    op: PatchOp,
    value: &Value,
) -> Value {
    let Some(idx) = parse_array_index(key, arr.len()) else {
        return Value::Array(arr.clone());
    };

    let mut result = arr.clone();
    if rest.is_empty() {
        match op {
            PatchOp::Add => {
                let at = idx.min(result.len());
                result.insert(at, value.clone());
            }
            PatchOp::Replace => {
                if idx < result.len() {
                    result.set(idx, value.clone());
                }
            }
            PatchOp::Remove => {
                if idx < result.len() {
                    result.remove(idx);
                }
            }
        }
    } else if idx < result.len() {
        let patched = apply_patch(&result.as_slice()[idx], rest, op, value);
        result.set(idx, patched);
    }

    Value::Array(result)
}
