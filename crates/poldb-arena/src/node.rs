//! The fixed-size storage node.
//!
//! Layout (24 bytes):
//!
//! - `key`: symbol of the entry key (object children) or the empty symbol;
//! - `vstr`: symbol of the string payload (string nodes only);
//! - `raw`: integer payload, float bit pattern, boolean, or the index of
//!   the head of the child chain for objects/arrays;
//! - `next`: index of the next sibling in the containing chain, `-1` ends;
//! - `vtype`: discriminant.
//!
//! Every field is an atomic: nodes live in shared segments, the writer
//! mutates them in place under the store's writer exclusion, and the
//! scavenger reads discriminants concurrently. Plain relaxed ordering is
//! enough — cross-thread publication happens via the root-index lock, and
//! the scavenger only needs to observe tombstone flags eventually.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};

use crate::symbols::Sym;

/// Node type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum NodeType {
    /// Unallocated or returned to the freelist.
    Free = 0,
    Int = 1,
    Float = 2,
    Bool = 3,
    String = 4,
    /// `raw` holds the child chain head index.
    Object = 5,
    /// `raw` holds the element chain head index.
    Array = 6,
    Null = 7,
    /// Awaiting reclamation by the scavenger.
    Tombstone = 8,
}

impl NodeType {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Int,
            2 => Self::Float,
            3 => Self::Bool,
            4 => Self::String,
            5 => Self::Object,
            6 => Self::Array,
            7 => Self::Null,
            8 => Self::Tombstone,
            _ => Self::Free,
        }
    }
}

/// A single storage unit in the arena.
#[repr(C)]
pub(crate) struct Node {
    key: AtomicU32,
    vstr: AtomicU32,
    raw: AtomicU64,
    next: AtomicI32,
    vtype: AtomicU32,
}

// The fixed-size layout is a contract: segments are sized from it and the
// scavenger walks nodes by index.
const _: () = assert!(std::mem::size_of::<Node>() == 24);

impl Node {
    /// A free node, usable as an array-repeat seed for segment storage.
    #[allow(clippy::declare_interior_mutable_const)]
    pub(crate) const FREE: Node = Node {
        key: AtomicU32::new(0),
        vstr: AtomicU32::new(0),
        raw: AtomicU64::new(0),
        next: AtomicI32::new(-1),
        vtype: AtomicU32::new(NodeType::Free as u32),
    };

    #[inline]
    pub(crate) fn node_type(&self) -> NodeType {
        NodeType::from_raw(self.vtype.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn key(&self) -> Sym {
        Sym::from_raw(self.key.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn set_key(&self, key: Sym) {
        self.key.store(key.raw(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn next(&self) -> i32 {
        self.next.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_next(&self, idx: i32) {
        self.next.store(idx, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn as_int(&self) -> i64 {
        self.raw.load(Ordering::Relaxed) as i64
    }

    #[inline]
    pub(crate) fn as_float(&self) -> f64 {
        f64::from_bits(self.raw.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn as_bool(&self) -> bool {
        self.raw.load(Ordering::Relaxed) == 1
    }

    #[inline]
    pub(crate) fn string_sym(&self) -> Sym {
        Sym::from_raw(self.vstr.load(Ordering::Relaxed))
    }

    /// Child chain head for objects and arrays (`-1` when empty).
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn child_head(&self) -> i32 {
        self.raw.load(Ordering::Relaxed) as u32 as i32
    }

    /// Overwrite the child chain head, keeping the node's type.
    #[inline]
    pub(crate) fn set_child_head(&self, idx: i32) {
        self.raw.store(u64::from(idx as u32), Ordering::Relaxed);
    }

    pub(crate) fn set_int(&self, v: i64) {
        self.raw.store(v as u64, Ordering::Relaxed);
        self.vstr.store(0, Ordering::Relaxed);
        self.vtype.store(NodeType::Int as u32, Ordering::Relaxed);
    }

    pub(crate) fn set_float(&self, v: f64) {
        self.raw.store(v.to_bits(), Ordering::Relaxed);
        self.vstr.store(0, Ordering::Relaxed);
        self.vtype.store(NodeType::Float as u32, Ordering::Relaxed);
    }

    pub(crate) fn set_bool(&self, v: bool) {
        self.raw.store(u64::from(v), Ordering::Relaxed);
        self.vstr.store(0, Ordering::Relaxed);
        self.vtype.store(NodeType::Bool as u32, Ordering::Relaxed);
    }

    pub(crate) fn set_string(&self, sym: Sym) {
        self.vstr.store(sym.raw(), Ordering::Relaxed);
        self.raw.store(0, Ordering::Relaxed);
        self.vtype.store(NodeType::String as u32, Ordering::Relaxed);
    }

    pub(crate) fn set_null(&self) {
        self.raw.store(0, Ordering::Relaxed);
        self.vstr.store(0, Ordering::Relaxed);
        self.vtype.store(NodeType::Null as u32, Ordering::Relaxed);
    }

    pub(crate) fn set_object(&self, child_head: i32) {
        self.raw.store(u64::from(child_head as u32), Ordering::Relaxed);
        self.vstr.store(0, Ordering::Relaxed);
        self.vtype.store(NodeType::Object as u32, Ordering::Relaxed);
    }

    pub(crate) fn set_array(&self, child_head: i32) {
        self.raw.store(u64::from(child_head as u32), Ordering::Relaxed);
        self.vstr.store(0, Ordering::Relaxed);
        self.vtype.store(NodeType::Array as u32, Ordering::Relaxed);
    }

    /// Clear the node for reuse.
    pub(crate) fn reset(&self) {
        self.key.store(0, Ordering::Relaxed);
        self.vstr.store(0, Ordering::Relaxed);
        self.raw.store(0, Ordering::Relaxed);
        self.next.store(-1, Ordering::Relaxed);
        self.vtype.store(NodeType::Free as u32, Ordering::Relaxed);
    }

    /// Flag the node for lazy reclamation.
    pub(crate) fn mark_tombstone(&self) {
        self.vtype.store(NodeType::Tombstone as u32, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn is_tombstone(&self) -> bool {
        self.node_type() == NodeType::Tombstone
    }

    #[inline]
    pub(crate) fn is_composite(&self) -> bool {
        matches!(self.node_type(), NodeType::Object | NodeType::Array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::intern;

    #[test]
    fn node_is_24_bytes() {
        assert_eq!(std::mem::size_of::<Node>(), 24);
    }

    #[test]
    fn scalar_round_trips() {
        let node = Node::FREE;
        node.set_int(-42);
        assert_eq!(node.node_type(), NodeType::Int);
        assert_eq!(node.as_int(), -42);

        node.set_float(2.5);
        assert_eq!(node.node_type(), NodeType::Float);
        assert_eq!(node.as_float(), 2.5);

        node.set_bool(true);
        assert!(node.as_bool());
        node.set_bool(false);
        assert!(!node.as_bool());

        let sym = intern("hello");
        node.set_string(sym);
        assert_eq!(node.node_type(), NodeType::String);
        assert_eq!(node.string_sym(), sym);

        node.set_null();
        assert_eq!(node.node_type(), NodeType::Null);
    }

    #[test]
    fn composite_heads_round_trip_negative_one() {
        let node = Node::FREE;
        node.set_object(-1);
        assert_eq!(node.node_type(), NodeType::Object);
        assert_eq!(node.child_head(), -1);

        node.set_array(12345);
        assert_eq!(node.child_head(), 12345);

        node.set_child_head(-1);
        assert_eq!(node.child_head(), -1);
        assert_eq!(node.node_type(), NodeType::Array);
    }

    #[test]
    fn reset_clears_everything() {
        let node = Node::FREE;
        node.set_key(intern("k"));
        node.set_int(9);
        node.set_next(7);
        node.reset();
        assert_eq!(node.node_type(), NodeType::Free);
        assert_eq!(node.key(), Sym::EMPTY);
        assert_eq!(node.next(), -1);
    }

    #[test]
    fn tombstone_flag() {
        let node = Node::FREE;
        node.set_int(1);
        node.mark_tombstone();
        assert!(node.is_tombstone());
    }
}
