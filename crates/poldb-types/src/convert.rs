//! Conversion from external heterogeneous data into internal values.
//!
//! This is the only place heterogeneous input (`serde_json::Value`) is
//! discharged into the internal [`Value`] model; the engines never see it.
//!
//! Beyond correctness the converter cares about allocation shape:
//!
//! - arrays of length `n` are built into a single pre-sized backing region;
//! - large objects (and arrays of record-shaped objects) enable a
//!   per-conversion key cache so that repeated keys across siblings share
//!   one allocation — the common "array of records with the same keys"
//!   input. Below [`STRING_CACHE_THRESHOLD`] the cache overhead outweighs
//!   the savings and is skipped;
//! - the cache map itself is pooled process-wide, cleared on release and
//!   discarded if it grew past [`CACHE_RETAIN_MAX`] entries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::pool::Pool;
use crate::value::{Array, Map, Object, Value};

/// Entry-count bound above which the per-conversion key cache is enabled.
pub const STRING_CACHE_THRESHOLD: usize = 20;

/// Caches that grew beyond this many keys are dropped instead of pooled.
pub const CACHE_RETAIN_MAX: usize = 256;

type KeyCache = HashMap<String, Arc<str>>;

static KEY_CACHE_POOL: Pool<KeyCache> = Pool::new(8);

/// Convert heterogeneous JSON data into an internal [`Value`].
#[must_use]
pub fn from_json(json: serde_json::Value) -> Value {
    if wants_key_cache(&json) {
        let mut cache = Some(KEY_CACHE_POOL.acquire_with(|| KeyCache::with_capacity(32)));
        let value = convert(json, &mut cache);
        if let Some(mut cache) = cache {
            if cache.len() <= CACHE_RETAIN_MAX {
                cache.clear();
                KEY_CACHE_POOL.release(cache);
            }
        }
        value
    } else {
        convert(json, &mut None)
    }
}

/// Whether the input shape profits from key dedup: a wide object, or a long
/// array (of records, typically).
fn wants_key_cache(json: &serde_json::Value) -> bool {
    match json {
        serde_json::Value::Object(m) => m.len() > STRING_CACHE_THRESHOLD,
        serde_json::Value::Array(a) => a.len() > STRING_CACHE_THRESHOLD,
        _ => false,
    }
}

fn convert(json: serde_json::Value, cache: &mut Option<KeyCache>) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => convert_number(&n),
        serde_json::Value::String(s) => Value::String(Arc::from(s)),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(convert(item, cache));
            }
            // Converted JSON has no abstract leaves; composites are ground
            // without a traversal.
            Value::Array(Array::from_parts(out, true))
        }
        serde_json::Value::Object(entries) => {
            let mut out = Map::with_capacity(entries.len());
            for (key, val) in entries {
                let key = convert_key(key, cache);
                out.insert(key, convert(val, cache));
            }
            Value::Object(Object::from_parts(out, true))
        }
    }
}

fn convert_key(key: String, cache: &mut Option<KeyCache>) -> Arc<str> {
    match cache {
        None => Arc::from(key),
        Some(cache) => {
            if let Some(shared) = cache.get(key.as_str()) {
                return Arc::clone(shared);
            }
            let shared: Arc<str> = Arc::from(key.as_str());
            cache.insert(key, Arc::clone(&shared));
            shared
        }
    }
}

fn convert_number(n: &serde_json::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else {
        // u64 beyond i64::MAX, or a float.
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

/// Fast path for a homogeneous string-valued map. Skips heterogeneous
/// dispatch entirely; the result is ground by construction.
#[must_use]
pub fn from_string_map(m: HashMap<String, String>) -> Value {
    let mut out = Map::with_capacity(m.len());
    for (k, v) in m {
        out.insert(Arc::from(k), Value::String(Arc::from(v)));
    }
    Value::Object(Object::from_parts(out, true))
}

/// Fast path for a homogeneous integer-valued map.
#[must_use]
pub fn from_int_map(m: HashMap<String, i64>) -> Value {
    let mut out = Map::with_capacity(m.len());
    for (k, v) in m {
        out.insert(Arc::from(k), Value::Int(v));
    }
    Value::Object(Object::from_parts(out, true))
}

/// Fast path for a homogeneous boolean-valued map.
#[must_use]
pub fn from_bool_map(m: HashMap<String, bool>) -> Value {
    let mut out = Map::with_capacity(m.len());
    for (k, v) in m {
        out.insert(Arc::from(k), Value::Bool(v));
    }
    Value::Object(Object::from_parts(out, true))
}
