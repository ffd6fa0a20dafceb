//! Deep pointer walks into a [`Value`].

use poldb_error::{Result, StoreError};
use poldb_path::InternedStr;

use crate::patch::parse_array_index;
use crate::value::Value;

/// Resolve `path` against `value`, returning a reference to the target.
///
/// Missing keys, out-of-range indices, and traversal through scalars all
/// surface as `NotFound`.
pub fn value_at<'a>(value: &'a Value, path: &[InternedStr]) -> Result<&'a Value> {
    let mut current = value;
    for seg in path {
        current = match current {
            Value::Object(obj) => obj
                .get(seg)
                .ok_or_else(StoreError::document_missing)?,
            Value::Array(arr) => {
                let idx = parse_array_index(seg, arr.len())
                    .ok_or_else(StoreError::document_missing)?;
                arr.get(idx).ok_or_else(StoreError::document_missing)?
            }
            _ => return Err(StoreError::document_missing()),
        };
    }
    Ok(current)
}

/// Mutable variant of [`value_at`].
pub fn value_at_mut<'a>(value: &'a mut Value, path: &[InternedStr]) -> Result<&'a mut Value> {
    let mut current = value;
    for seg in path {
        current = match current {
            Value::Object(obj) => obj
                .get_mut(seg)
                .ok_or_else(StoreError::document_missing)?,
            Value::Array(arr) => {
                let idx = parse_array_index(seg, arr.len())
                    .ok_or_else(StoreError::document_missing)?;
                arr.get_mut(idx).ok_or_else(StoreError::document_missing)?
            }
            _ => return Err(StoreError::document_missing()),
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::from_json;
    use poldb_path::Path;
    use serde_json::json;

    fn path(s: &str) -> Path {
        Path::parse(s).expect("test path parses")
    }

    #[test]
    fn resolves_nested_paths() {
        let v = from_json(json!({"a": {"b": [10, 20, {"c": true}]}}));
        assert_eq!(value_at(&v, &path("/a/b/1")).unwrap(), &Value::Int(20));
        assert_eq!(
            value_at(&v, &path("/a/b/2/c")).unwrap(),
            &Value::Bool(true)
        );
        assert_eq!(value_at(&v, &path("/")).unwrap(), &v);
    }

    #[test]
    fn missing_key_is_not_found() {
        let v = from_json(json!({"a": 1}));
        let err = value_at(&v, &path("/b")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn traversal_through_scalar_is_not_found() {
        let v = from_json(json!({"a": 1}));
        assert!(value_at(&v, &path("/a/b")).unwrap_err().is_not_found());
    }

    #[test]
    fn bad_array_index_is_not_found() {
        let v = from_json(json!({"xs": [1]}));
        assert!(value_at(&v, &path("/xs/5")).unwrap_err().is_not_found());
        assert!(value_at(&v, &path("/xs/x")).unwrap_err().is_not_found());
        // The append token is one past the end: unreadable.
        assert!(value_at(&v, &path("/xs/-")).unwrap_err().is_not_found());
    }

    #[test]
    fn mutable_walk_allows_in_place_edit() {
        let mut v = from_json(json!({"a": {"b": 1}}));
        *value_at_mut(&mut v, &path("/a/b")).unwrap() = Value::Int(2);
        assert_eq!(v, from_json(json!({"a": {"b": 2}})));
    }
}
