//! Bounded process-wide interning for path segments.
//!
//! Interning maps value-equal segment strings to one canonical `Arc<str>` so
//! that segment equality becomes pointer identity on the happy path. The
//! table is deliberately bounded: only segments up to
//! [`MAX_INTERNED_SEGMENT_LEN`] bytes are admitted, longer segments are
//! returned as fresh, unregistered allocations.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

/// Segments longer than this bypass the intern table entirely, keeping its
/// memory bounded. 32 bytes covers the overwhelming majority of real path
/// segments.
pub const MAX_INTERNED_SEGMENT_LEN: usize = 32;

/// An interned (or, for long segments, merely shared) path segment.
///
/// Equality tries pointer identity first and falls back to byte comparison,
/// so two handles for the same interned segment compare in O(1).
#[derive(Clone)]
pub struct InternedStr(Arc<str>);

impl InternedStr {
    /// The segment as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The shared allocation backing this segment.
    #[inline]
    #[must_use]
    pub fn as_arc(&self) -> &Arc<str> {
        &self.0
    }

    /// Whether two handles share one allocation.
    #[inline]
    #[must_use]
    pub fn same_identity(&self, other: &InternedStr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for InternedStr {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl Eq for InternedStr {}

impl PartialOrd for InternedStr {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternedStr {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if Arc::ptr_eq(&self.0, &other.0) {
            std::cmp::Ordering::Equal
        } else {
            self.0.cmp(&other.0)
        }
    }
}

impl Hash for InternedStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Deref for InternedStr {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for InternedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for InternedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InternedStr {
    fn from(s: &str) -> Self {
        intern_segment(s)
    }
}

/// Segments common enough to be canonicalized without touching the table.
/// Matched by value before any locking.
const SEEDED: [&str; 7] = ["", "data", "input", "config", "policies", "system", "bundles"];

static SEEDED_HANDLES: LazyLock<[Arc<str>; 7]> = LazyLock::new(|| SEEDED.map(Arc::from));

static TABLE: LazyLock<RwLock<HashMap<Arc<str>, Arc<str>>>> =
    LazyLock::new(|| RwLock::new(HashMap::with_capacity(64)));

/// Return the canonical handle for a path segment.
///
/// Fast paths, in order:
/// 1. the pre-seeded segment set, matched by value with no locking;
/// 2. all-digit strings of length 1–3 (array indices below 1000), interned
///    on first use;
/// 3. any other segment of at most [`MAX_INTERNED_SEGMENT_LEN`] bytes,
///    interned with a double-checked read-then-write lock;
/// 4. longer segments, returned as-is without registration.
#[must_use]
pub fn intern_segment(s: &str) -> InternedStr {
    if s.len() <= 10 {
        for (i, seed) in SEEDED.iter().enumerate() {
            if *seed == s {
                return InternedStr(Arc::clone(&SEEDED_HANDLES[i]));
            }
        }
        if !s.is_empty() && s.len() <= 3 && s.bytes().all(|b| b.is_ascii_digit()) {
            // Values 0..=999 by construction of the length bound.
            return table_intern(s);
        }
    }

    if s.len() > MAX_INTERNED_SEGMENT_LEN {
        return InternedStr(Arc::from(s));
    }

    table_intern(s)
}

fn table_intern(s: &str) -> InternedStr {
    {
        let table = TABLE.read();
        if let Some(canonical) = table.get(s) {
            return InternedStr(Arc::clone(canonical));
        }
    }

    let mut table = TABLE.write();
    // Double-check: another thread may have interned between the locks.
    if let Some(canonical) = table.get(s) {
        return InternedStr(Arc::clone(canonical));
    }
    let canonical: Arc<str> = Arc::from(s);
    table.insert(Arc::clone(&canonical), Arc::clone(&canonical));
    InternedStr(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_segments_share_identity() {
        for seed in SEEDED {
            let a = intern_segment(seed);
            let b = intern_segment(seed);
            assert!(a.same_identity(&b), "seed {seed:?} not canonical");
        }
    }

    #[test]
    fn numeric_segments_interned() {
        let a = intern_segment("42");
        let b = intern_segment("42");
        assert!(a.same_identity(&b));
        assert_eq!(a.as_str(), "42");

        let a = intern_segment("999");
        let b = intern_segment("999");
        assert!(a.same_identity(&b));
    }

    #[test]
    fn ordinary_segments_interned_up_to_bound() {
        let a = intern_segment("users");
        let b = intern_segment("users");
        assert!(a.same_identity(&b));

        let exactly_32 = "a".repeat(MAX_INTERNED_SEGMENT_LEN);
        let a = intern_segment(&exactly_32);
        let b = intern_segment(&exactly_32);
        assert!(a.same_identity(&b));
    }

    #[test]
    fn long_segments_bypass_table() {
        let long = "x".repeat(MAX_INTERNED_SEGMENT_LEN + 1);
        let a = intern_segment(&long);
        let b = intern_segment(&long);
        assert!(!a.same_identity(&b));
        // Value equality still holds.
        assert_eq!(a, b);
    }

    #[test]
    fn equality_falls_back_to_bytes() {
        let long = "y".repeat(100);
        let a = InternedStr(Arc::from(long.as_str()));
        let b = InternedStr(Arc::from(long.as_str()));
        assert_eq!(a, b);
        assert_ne!(a, InternedStr(Arc::from("z")));
    }

    #[test]
    fn ordering_is_byte_order() {
        assert!(intern_segment("a") < intern_segment("b"));
        assert!(intern_segment("10") < intern_segment("9")); // lexicographic
        assert_eq!(
            intern_segment("data").cmp(&intern_segment("data")),
            std::cmp::Ordering::Equal
        );
    }
}
