//! The internal document value: a JSON-like tagged union.
//!
//! Numbers keep their integer-vs-float distinction but compare and hash by
//! canonical decimal text, so `Int(1)` and `Float(1.0)` are one value as far
//! as structural equality is concerned. Composite values carry a precomputed
//! ground flag so "is every leaf concrete" never requires a traversal.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use xxhash_rust::xxh3::{xxh3_64, Xxh3};

/// Unordered string-keyed entries of an [`Object`].
pub type Map = HashMap<Arc<str>, Value>;

/// A dynamically-typed document value.
#[derive(Clone, Debug)]
pub enum Value {
    /// JSON null.
    Null,
    /// A boolean.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit IEEE 754 floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(Arc<str>),
    /// An unordered string-keyed mapping.
    Object(Object),
    /// An ordered sequence.
    Array(Array),
}

/// An unordered mapping from string keys to values.
#[derive(Clone, Debug)]
pub struct Object {
    entries: Map,
    ground: bool,
}

/// An ordered sequence of values.
#[derive(Clone, Debug)]
pub struct Array {
    items: Vec<Value>,
    ground: bool,
}

impl Object {
    /// An empty object.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Map::new(),
            ground: true,
        }
    }

    /// An empty object with pre-sized storage.
    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Map::with_capacity(n),
            ground: true,
        }
    }

    /// Build from already-converted entries, trusting the caller's ground flag.
    pub(crate) fn from_parts(entries: Map, ground: bool) -> Self {
        Self { entries, ground }
    }

    /// Build from an entry iterator, propagating groundness from children.
    pub fn from_entries(entries: impl IntoIterator<Item = (Arc<str>, Value)>) -> Self {
        let mut obj = Self::new();
        for (k, v) in entries {
            obj.insert(k, v);
        }
        obj
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, key: Arc<str>, value: Value) {
        self.ground = self.ground && value.is_ground();
        self.entries.insert(key, value);
    }

    /// Remove an entry, returning its value if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Arc<str>> {
        self.entries.keys()
    }

    /// Whether every leaf below this object is concrete.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.ground
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<(Arc<str>, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (Arc<str>, Value)>>(iter: I) -> Self {
        Self::from_entries(iter)
    }
}

impl Array {
    /// An empty array.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            ground: true,
        }
    }

    /// An empty array with pre-sized storage. Producing an array of known
    /// length goes through one backing allocation, never one per element.
    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            items: Vec::with_capacity(n),
            ground: true,
        }
    }

    pub(crate) fn from_parts(items: Vec<Value>, ground: bool) -> Self {
        Self { items, ground }
    }

    /// Build from already-converted items, propagating groundness.
    #[must_use]
    pub fn from_items(items: Vec<Value>) -> Self {
        let ground = items.iter().all(Value::is_ground);
        Self { items, ground }
    }

    pub fn push(&mut self, value: Value) {
        self.ground = self.ground && value.is_ground();
        self.items.push(value);
    }

    /// Insert at `idx`, shifting later elements.
    pub fn insert(&mut self, idx: usize, value: Value) {
        self.ground = self.ground && value.is_ground();
        self.items.insert(idx, value);
    }

    /// Remove the element at `idx`.
    pub fn remove(&mut self, idx: usize) -> Value {
        self.items.remove(idx)
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.items.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Value> {
        self.items.get_mut(idx)
    }

    pub fn set(&mut self, idx: usize, value: Value) {
        self.ground = self.ground && value.is_ground();
        self.items[idx] = value;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Value] {
        &self.items
    }

    /// Whether every leaf below this array is concrete.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.ground
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_items(iter.into_iter().collect())
    }
}

impl Value {
    /// Returns true for null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether every leaf is concrete. Scalars always are; composites carry
    /// the flag precomputed at construction.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        match self {
            Self::Object(o) => o.is_ground(),
            Self::Array(a) => a.is_ground(),
            _ => true,
        }
    }

    /// Short type name for error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::String(_) => "string",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_array(&self) -> Option<&Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Array> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// A shared-string value.
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::String(s.into())
    }

    /// Strictly-typed scalar equality: same variant, same bits. Composite
    /// values never compare equal under this relation; it exists so the
    /// transaction layer can detect rewrite-same-scalar no-ops cheaply.
    #[must_use]
    pub fn strict_scalar_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }

    /// Structure-stable 64-bit hash.
    ///
    /// Equal values (by [`PartialEq`]) produce equal hashes; numbers hash
    /// their canonical decimal string so `Int(1)` and `Float(1.0)` agree.
    /// Object entry order does not affect the result.
    #[must_use]
    pub fn stable_hash(&self) -> u64 {
        match self {
            Self::Null => xxh3_64(b"\x00null"),
            Self::Bool(true) => xxh3_64(b"\x01true"),
            Self::Bool(false) => xxh3_64(b"\x01false"),
            Self::Int(i) => hash_number(&canonical_int(*i)),
            Self::Float(f) => hash_number(&canonical_float(*f)),
            Self::String(s) => {
                let mut h = Xxh3::new();
                h.update(b"\x03");
                h.update(s.as_bytes());
                h.digest()
            }
            Self::Array(arr) => {
                let mut h = Xxh3::new();
                h.update(b"\x04");
                for item in arr.iter() {
                    h.update(&item.stable_hash().to_le_bytes());
                }
                h.digest()
            }
            Self::Object(obj) => {
                // Order-independent: combine per-entry hashes commutatively.
                let mut acc: u64 = 0x05;
                for (k, v) in obj.iter() {
                    let mut h = Xxh3::new();
                    h.update(k.as_bytes());
                    h.update(b"\x1f");
                    h.update(&v.stable_hash().to_le_bytes());
                    acc = acc.wrapping_add(h.digest());
                }
                acc
            }
        }
    }

    /// Convert to a `serde_json::Value`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => {
                serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Self::String(s) => serde_json::Value::String(s.to_string()),
            Self::Object(o) => serde_json::Value::Object(
                o.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Self::Array(a) => serde_json::Value::Array(a.iter().map(Value::to_json).collect()),
        }
    }
}

/// Canonical decimal text of an integer.
fn canonical_int(i: i64) -> String {
    i.to_string()
}

/// Canonical decimal text of a float (shortest round-trip form).
fn canonical_float(f: f64) -> String {
    f.to_string()
}

fn hash_number(canonical: &str) -> u64 {
    let mut h = Xxh3::new();
    h.update(b"\x02");
    h.update(canonical.as_bytes());
    h.digest()
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => {
                a.to_bits() == b.to_bits() || canonical_float(*a) == canonical_float(*b)
            }
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                canonical_int(*a) == canonical_float(*b)
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a.as_slice() == b.as_slice(),
            (Self::Object(a), Self::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| bv == v))
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Arc::from(s))
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Self::Object(o)
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Self::Array(a)
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq};
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for item in a.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(o) => {
                let mut map = serializer.serialize_map(Some(o.len()))?;
                for (k, v) in o.iter() {
                    map.serialize_entry(&**k, v)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(crate::convert::from_json(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(entries: &[(&str, Value)]) -> Value {
        Value::Object(Object::from_entries(
            entries.iter().map(|(k, v)| (Arc::from(*k), v.clone())),
        ))
    }

    #[test]
    fn null_properties() {
        let v = Value::Null;
        assert!(v.is_null());
        assert!(v.is_ground());
        assert_eq!(v.type_name(), "null");
    }

    #[test]
    fn scalar_accessors() {
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Float(1.5).as_float(), Some(1.5));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::Null.as_int(), None);
    }

    #[test]
    fn numbers_compare_by_canonical_text() {
        assert_eq!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Float(1.0), Value::Int(1));
        assert_ne!(Value::Int(1), Value::Float(1.5));
        assert_ne!(Value::Int(0), Value::Float(-0.0)); // "-0" vs "0"
    }

    #[test]
    fn strict_scalar_eq_is_typed() {
        assert!(Value::Int(1).strict_scalar_eq(&Value::Int(1)));
        assert!(!Value::Int(1).strict_scalar_eq(&Value::Float(1.0)));
        assert!(Value::from("a").strict_scalar_eq(&Value::from("a")));
        assert!(!obj(&[]).strict_scalar_eq(&obj(&[])));
    }

    #[test]
    fn object_equality_is_unordered() {
        let a = obj(&[("x", Value::Int(1)), ("y", Value::Int(2))]);
        let b = obj(&[("y", Value::Int(2)), ("x", Value::Int(1))]);
        assert_eq!(a, b);
        assert_ne!(a, obj(&[("x", Value::Int(1))]));
    }

    #[test]
    fn array_equality_is_ordered() {
        let a = Value::Array(Array::from_items(vec![Value::Int(1), Value::Int(2)]));
        let b = Value::Array(Array::from_items(vec![Value::Int(2), Value::Int(1)]));
        assert_ne!(a, b);
    }

    #[test]
    fn equal_values_hash_equal() {
        assert_eq!(
            Value::Int(1).stable_hash(),
            Value::Float(1.0).stable_hash()
        );

        let a = obj(&[("x", Value::Int(1)), ("y", Value::from("s"))]);
        let b = obj(&[("y", Value::from("s")), ("x", Value::Float(1.0))]);
        assert_eq!(a, b);
        assert_eq!(a.stable_hash(), b.stable_hash());
    }

    #[test]
    fn distinct_values_hash_distinct() {
        // Not guaranteed in general, but these must not collide by
        // construction mistakes (e.g. missing type tags).
        assert_ne!(Value::Null.stable_hash(), Value::from("null").stable_hash());
        assert_ne!(Value::Bool(true).stable_hash(), Value::from("true").stable_hash());
        assert_ne!(Value::Int(1).stable_hash(), Value::from("1").stable_hash());
    }

    #[test]
    fn ground_propagates() {
        let mut arr = Array::new();
        assert!(arr.is_ground());
        arr.push(Value::Int(1));
        arr.push(obj(&[("k", Value::Null)]));
        assert!(arr.is_ground());
    }

    #[test]
    fn display_is_json() {
        let v = obj(&[("a", Value::Int(1))]);
        assert_eq!(v.to_string(), r#"{"a":1}"#);
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn serde_round_trip() {
        let v = obj(&[
            ("i", Value::Int(3)),
            ("f", Value::Float(2.5)),
            ("s", Value::from("txt")),
            (
                "a",
                Value::Array(Array::from_items(vec![Value::Bool(true), Value::Null])),
            ),
        ]);
        let text = serde_json::to_string(&v).expect("serializes");
        let back: Value = serde_json::from_str(&text).expect("deserializes");
        assert_eq!(back, v);
    }

    mod props {
        use super::*;
        use crate::from_json;
        use proptest::prelude::*;

        fn json_leaf() -> impl Strategy<Value = serde_json::Value> {
            prop_oneof![
                Just(serde_json::Value::Null),
                any::<bool>().prop_map(serde_json::Value::Bool),
                (-1000_i64..1000).prop_map(|i| serde_json::json!(i)),
                (-100.0_f64..100.0).prop_map(|f| serde_json::json!(f)),
                "[a-d]{0,4}".prop_map(|s| serde_json::json!(s)),
            ]
        }

        fn json_value() -> impl Strategy<Value = serde_json::Value> {
            json_leaf().prop_recursive(3, 24, 4, |inner| {
                prop_oneof![
                    prop::collection::vec(inner.clone(), 0..4)
                        .prop_map(serde_json::Value::Array),
                    prop::collection::hash_map("[a-d]{1,2}", inner, 0..4)
                        .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
                ]
            })
        }

        proptest! {
            #[test]
            fn equal_values_have_equal_hashes(j in json_value()) {
                let a = from_json(j.clone());
                let b = from_json(j);
                prop_assert_eq!(&a, &b);
                prop_assert_eq!(a.stable_hash(), b.stable_hash());
            }

            #[test]
            fn int_float_textual_equality_implies_hash_equality(i in -1000_i64..1000) {
                #[allow(clippy::cast_precision_loss)]
                let f = Value::Float(i as f64);
                let n = Value::Int(i);
                if n == f {
                    prop_assert_eq!(n.stable_hash(), f.stable_hash());
                }
            }

            #[test]
            fn json_round_trip_preserves_value(j in json_value()) {
                let v = from_json(j.clone());
                prop_assert_eq!(v.to_json(), j);
            }
        }
    }
}
