//! Segmented node storage: allocation, freelist, graph operations.
//!
//! Nodes live in lazily-created fixed-size segments addressed by linear
//! `i32` indices. Allocation pops the lock-free freelist first and claims
//! the next linear index otherwise; a mutex is held only while a new
//! segment is created. Only the single writer allocates and frees during
//! transactions; the scavenger additionally frees tombstoned nodes between
//! commits.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::{debug, trace};

use poldb_error::{Result, StoreError};
use poldb_path::InternedStr;
use poldb_types::{parse_array_index, Array, Object, PatchOp, Value};

use crate::node::{Node, NodeType};
use crate::symbols::{intern, resolve, Sym};

/// Nodes per segment (12 KiB of nodes each).
pub(crate) const SEGMENT_SIZE: usize = 512;

/// Hard cap on segment count (~2M nodes). Exhaustion is fatal.
pub(crate) const MAX_SEGMENTS: usize = 4096;

/// Scavenger yields the CPU after this many scanned nodes.
const SCAVENGE_YIELD_INTERVAL: i32 = 1024;

struct Segment {
    nodes: [Node; SEGMENT_SIZE],
}

impl Segment {
    fn new() -> Box<Self> {
        Box::new(Self {
            nodes: [Node::FREE; SEGMENT_SIZE],
        })
    }
}

/// The node store.
pub(crate) struct Arena {
    segments: Box<[OnceLock<Box<Segment>>]>,
    /// Number of created segments.
    seg_count: AtomicU32,
    /// Next never-used linear index.
    node_count: AtomicU32,
    /// Freelist head (`-1` when empty), pushed and popped with CAS.
    free_head: AtomicI32,
    /// Serializes segment creation only.
    grow: Mutex<()>,
}

impl Arena {
    pub(crate) fn new() -> Self {
        let segments: Vec<OnceLock<Box<Segment>>> =
            (0..MAX_SEGMENTS).map(|_| OnceLock::new()).collect();
        Self {
            segments: segments.into_boxed_slice(),
            seg_count: AtomicU32::new(0),
            node_count: AtomicU32::new(0),
            free_head: AtomicI32::new(-1),
            grow: Mutex::new(()),
        }
    }

    /// The node at `idx`, or `None` for `-1`.
    pub(crate) fn node(&self, idx: i32) -> Option<&Node> {
        if idx < 0 {
            return None;
        }
        let idx = idx as usize;
        let segment = self.segments[idx / SEGMENT_SIZE].get()?;
        Some(&segment.nodes[idx % SEGMENT_SIZE])
    }

    /// Allocate a node: freelist first, then the next linear index.
    pub(crate) fn alloc(&self) -> i32 {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            if head < 0 {
                break;
            }
            let node = self.node(head).expect("freelist index resolves");
            let next = node.next();
            if self
                .free_head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                node.reset();
                return head;
            }
        }

        let idx = self.node_count.fetch_add(1, Ordering::AcqRel);
        let seg_idx = idx as usize / SEGMENT_SIZE;
        if seg_idx >= self.seg_count.load(Ordering::Acquire) as usize {
            let _growing = self.grow.lock();
            // Re-check under the lock; another thread may have extended.
            while seg_idx >= self.seg_count.load(Ordering::Acquire) as usize {
                self.extend();
            }
        }

        let idx = i32::try_from(idx).expect("node index fits i32");
        self.node(idx).expect("segment created").reset();
        idx
    }

    /// Create the next segment. Caller holds the growth lock.
    fn extend(&self) {
        let seg_idx = self.seg_count.load(Ordering::Acquire) as usize;
        assert!(seg_idx < MAX_SEGMENTS, "arena: maximum segments exceeded");
        self.segments[seg_idx]
            .set(Segment::new())
            .unwrap_or_else(|_| unreachable!("segment created twice"));
        self.seg_count.fetch_add(1, Ordering::Release);
        debug!(segment = seg_idx, "arena segment created");
    }

    /// Reset a node and push it onto the freelist.
    pub(crate) fn free(&self, idx: i32) {
        let Some(node) = self.node(idx) else {
            return;
        };
        node.reset();
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            node.set_next(head);
            if self
                .free_head
                .compare_exchange_weak(head, idx, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Total linear indices ever claimed.
    pub(crate) fn allocated(&self) -> i32 {
        self.node_count.load(Ordering::Acquire) as i32
    }

    /// Walk the freelist and count entries. Only meaningful while no
    /// writer or scavenger is running; used by tests and stats.
    pub(crate) fn free_count(&self) -> usize {
        let mut count = 0;
        let mut idx = self.free_head.load(Ordering::Acquire);
        while idx >= 0 {
            count += 1;
            idx = self.node(idx).map_or(-1, Node::next);
        }
        count
    }

    // --- loading values into the graph ----------------------------------

    /// Build the child chain for an object; returns the head (`-1` empty).
    fn load_object_children(&self, obj: &Object) -> i32 {
        let mut head = -1;
        let mut last = -1;
        for (key, value) in obj.iter() {
            let idx = self.alloc();
            let node = self.node(idx).expect("allocated node resolves");
            node.set_key(intern(key));
            self.fill_node(node, value);
            node.set_next(-1);
            if head < 0 {
                head = idx;
            }
            if last >= 0 {
                self.node(last).expect("chain link resolves").set_next(idx);
            }
            last = idx;
        }
        head
    }

    /// Build the element chain for an array; returns the head (`-1` empty).
    fn load_array_children(&self, arr: &Array) -> i32 {
        let mut head = -1;
        let mut last = -1;
        for value in arr.iter() {
            let idx = self.alloc();
            let node = self.node(idx).expect("allocated node resolves");
            self.fill_node(node, value);
            node.set_next(-1);
            if head < 0 {
                head = idx;
            }
            if last >= 0 {
                self.node(last).expect("chain link resolves").set_next(idx);
            }
            last = idx;
        }
        head
    }

    /// Load an object into the arena; returns the object node's index.
    pub(crate) fn load_map(&self, obj: &Object) -> i32 {
        let head = self.load_object_children(obj);
        let idx = self.alloc();
        self.node(idx).expect("allocated node resolves").set_object(head);
        idx
    }

    /// Fill a borrowed node with `value`.
    pub(crate) fn fill_node(&self, node: &Node, value: &Value) {
        match value {
            Value::Null => node.set_null(),
            Value::Bool(b) => node.set_bool(*b),
            Value::Int(i) => node.set_int(*i),
            Value::Float(f) => node.set_float(*f),
            Value::String(s) => node.set_string(intern(s)),
            Value::Object(o) => {
                let head = self.load_object_children(o);
                node.set_object(head);
            }
            Value::Array(a) => {
                let head = self.load_array_children(a);
                node.set_array(head);
            }
        }
    }

    // --- materialization -------------------------------------------------

    /// Recursively materialize the value rooted at `idx`.
    pub(crate) fn to_value(&self, idx: i32) -> Value {
        let Some(node) = self.node(idx) else {
            return Value::Null;
        };
        match node.node_type() {
            NodeType::Int => Value::Int(node.as_int()),
            NodeType::Float => Value::Float(node.as_float()),
            NodeType::Bool => Value::Bool(node.as_bool()),
            NodeType::String => Value::String(resolve(node.string_sym())),
            NodeType::Null => Value::Null,
            NodeType::Object => {
                // Most objects stay small; the hint avoids rehash churn.
                let mut obj = Object::with_capacity(32);
                let mut child = node.child_head();
                while child >= 0 {
                    let child_node = self.node(child).expect("chain index resolves");
                    if !child_node.is_tombstone() {
                        obj.insert(resolve(child_node.key()), self.to_value(child));
                    }
                    child = child_node.next();
                }
                Value::Object(obj)
            }
            NodeType::Array => {
                let mut items = Vec::with_capacity(32);
                let mut child = node.child_head();
                while child >= 0 {
                    let child_node = self.node(child).expect("chain index resolves");
                    if !child_node.is_tombstone() {
                        items.push(self.to_value(child));
                    }
                    child = child_node.next();
                }
                Value::Array(Array::from_items(items))
            }
            NodeType::Free | NodeType::Tombstone => Value::Null,
        }
    }

    /// Walk `path` from the node at `start`; tombstones are skipped.
    pub(crate) fn lookup_path(&self, start: i32, path: &[InternedStr]) -> Option<i32> {
        let Some((seg, rest)) = path.split_first() else {
            return Some(start);
        };
        let node = self.node(start)?;
        match node.node_type() {
            NodeType::Object => {
                let key = intern(seg);
                let mut child = node.child_head();
                while child >= 0 {
                    let child_node = self.node(child).expect("chain index resolves");
                    if !child_node.is_tombstone() && child_node.key() == key {
                        return self.lookup_path(child, rest);
                    }
                    child = child_node.next();
                }
                None
            }
            NodeType::Array => {
                if seg.as_str() == "-" {
                    return None;
                }
                let pos = parse_array_index(seg, usize::MAX)?;
                let mut live = 0;
                let mut child = node.child_head();
                while child >= 0 {
                    let child_node = self.node(child).expect("chain index resolves");
                    if !child_node.is_tombstone() {
                        if live == pos {
                            return self.lookup_path(child, rest);
                        }
                        live += 1;
                    }
                    child = child_node.next();
                }
                None
            }
            _ => None,
        }
    }

    /// Check that a patch at `path` can apply to the committed graph rooted
    /// at `root_idx` (`-1` stands for the uninitialized empty-object root).
    /// The rules mirror [`poldb_types::validate_patch_target`].
    pub(crate) fn validate_patch(
        &self,
        root_idx: i32,
        path: &[InternedStr],
        op: PatchOp,
    ) -> Result<()> {
        debug_assert!(!path.is_empty(), "root writes validated by the txn layer");

        if root_idx < 0 {
            // Empty object: only a terminal Add one level down can land.
            return if path.len() == 1 && op == PatchOp::Add {
                Ok(())
            } else {
                Err(StoreError::document_missing())
            };
        }

        let mut idx = root_idx;
        for depth in 0..path.len() {
            let seg = &path[depth];
            let terminal = depth == path.len() - 1;
            let node = self.node(idx).ok_or_else(StoreError::document_missing)?;

            match node.node_type() {
                NodeType::Object => {
                    let key = intern(seg);
                    let mut found = -1;
                    let mut child = node.child_head();
                    while child >= 0 {
                        let child_node = self.node(child).expect("chain index resolves");
                        if !child_node.is_tombstone() && child_node.key() == key {
                            found = child;
                            break;
                        }
                        child = child_node.next();
                    }
                    if found < 0 {
                        return if terminal && op == PatchOp::Add {
                            Ok(())
                        } else {
                            Err(StoreError::document_missing())
                        };
                    }
                    if terminal {
                        return Ok(());
                    }
                    idx = found;
                }
                NodeType::Array => {
                    let live = self.live_len(idx);
                    if seg.as_str() == "-" {
                        return if terminal && op == PatchOp::Add {
                            Ok(())
                        } else {
                            Err(StoreError::invalid_patch(format!(
                                "{}: invalid patch path",
                                poldb_path::Path::from(path)
                            )))
                        };
                    }
                    let Some(pos) = parse_array_index(seg, live) else {
                        return Err(StoreError::document_missing());
                    };
                    if terminal {
                        if pos == live {
                            return if op == PatchOp::Add {
                                Ok(())
                            } else {
                                Err(StoreError::invalid_patch(format!(
                                    "{}: invalid patch path",
                                    poldb_path::Path::from(path)
                                )))
                            };
                        }
                        if pos < live {
                            return Ok(());
                        }
                        return Err(StoreError::document_missing());
                    }
                    if pos >= live {
                        return Err(StoreError::document_missing());
                    }
                    // Step to the pos'th live element.
                    let mut live_seen = 0;
                    let mut child = node.child_head();
                    let mut target = -1;
                    while child >= 0 {
                        let child_node = self.node(child).expect("chain index resolves");
                        if !child_node.is_tombstone() {
                            if live_seen == pos {
                                target = child;
                                break;
                            }
                            live_seen += 1;
                        }
                        child = child_node.next();
                    }
                    if target < 0 {
                        return Err(StoreError::document_missing());
                    }
                    idx = target;
                }
                _ => return Err(StoreError::document_missing()),
            }
        }
        Ok(())
    }

    // --- mutation ---------------------------------------------------------

    /// Set `value` at `path` below the object node `root_idx`, creating
    /// intermediate objects as needed. Replacing a composite frees its old
    /// subtree eagerly.
    pub(crate) fn set_value_at(
        &self,
        root_idx: i32,
        path: &[InternedStr],
        op: PatchOp,
        value: &Value,
    ) -> Result<()> {
        if path.is_empty() {
            return Err(StoreError::internal(
                "root replacement bypasses set_value_at",
            ));
        }
        let root = self
            .node(root_idx)
            .ok_or_else(|| StoreError::internal("root index unset"))?;
        if root.node_type() != NodeType::Object {
            return Err(StoreError::RootMustBeObject);
        }
        self.set_value(root_idx, path, 0, op, value)
    }

    fn set_value(
        &self,
        parent_idx: i32,
        path: &[InternedStr],
        depth: usize,
        op: PatchOp,
        value: &Value,
    ) -> Result<()> {
        let parent = self.node(parent_idx).expect("parent index resolves");
        match parent.node_type() {
            NodeType::Object => self.set_in_object(parent_idx, path, depth, op, value),
            NodeType::Array => self.set_in_array(parent_idx, path, depth, op, value),
            _ => Err(StoreError::document_missing()),
        }
    }

    fn set_in_object(
        &self,
        parent_idx: i32,
        path: &[InternedStr],
        depth: usize,
        op: PatchOp,
        value: &Value,
    ) -> Result<()> {
        let parent = self.node(parent_idx).expect("parent index resolves");
        let key = intern(&path[depth]);
        let terminal = depth == path.len() - 1;

        let mut prev = -1;
        let mut child = parent.child_head();
        while child >= 0 {
            let child_node = self.node(child).expect("chain index resolves");
            if !child_node.is_tombstone() && child_node.key() == key {
                if terminal {
                    self.free_children(child);
                    self.fill_node(child_node, value);
                    return Ok(());
                }
                return self.set_value(child, path, depth + 1, op, value);
            }
            prev = child;
            child = child_node.next();
        }

        // Key absent: create the node (and intermediate objects deeper).
        let new_idx = self.alloc();
        let new_node = self.node(new_idx).expect("allocated node resolves");
        new_node.set_key(key);
        new_node.set_next(-1);
        if terminal {
            self.fill_node(new_node, value);
        } else {
            new_node.set_object(-1);
            self.set_value(new_idx, path, depth + 1, op, value)?;
        }

        if prev < 0 {
            parent.set_child_head(new_idx);
        } else {
            self.node(prev).expect("chain link resolves").set_next(new_idx);
        }
        Ok(())
    }

    fn set_in_array(
        &self,
        parent_idx: i32,
        path: &[InternedStr],
        depth: usize,
        op: PatchOp,
        value: &Value,
    ) -> Result<()> {
        let parent = self.node(parent_idx).expect("parent index resolves");
        let key = &path[depth];
        let terminal = depth == path.len() - 1;

        // Count live elements and find the target position.
        let live_len = self.live_len(parent_idx);
        let pos = parse_array_index(key, live_len).ok_or_else(StoreError::document_missing)?;

        let append = pos == live_len;
        if append {
            if !(terminal && op == PatchOp::Add) {
                return Err(if key.as_str() == "-" {
                    StoreError::invalid_patch(format!(
                        "{}: invalid patch path",
                        poldb_path::Path::from(path)
                    ))
                } else {
                    StoreError::document_missing()
                });
            }
            let new_idx = self.alloc();
            let new_node = self.node(new_idx).expect("allocated node resolves");
            self.fill_node(new_node, value);
            new_node.set_next(-1);
            match self.last_live_or_tail(parent_idx) {
                Some(last) => self.node(last).expect("chain link resolves").set_next(new_idx),
                None => parent.set_child_head(new_idx),
            }
            return Ok(());
        }
        if pos > live_len {
            return Err(StoreError::document_missing());
        }

        // Locate the pos'th live element.
        let mut prev = -1;
        let mut child = parent.child_head();
        let mut live = 0;
        while child >= 0 {
            let child_node = self.node(child).expect("chain index resolves");
            if !child_node.is_tombstone() {
                if live == pos {
                    if !terminal {
                        return self.set_value(child, path, depth + 1, op, value);
                    }
                    if op == PatchOp::Add {
                        // Insert before this element.
                        let new_idx = self.alloc();
                        let new_node = self.node(new_idx).expect("allocated node resolves");
                        self.fill_node(new_node, value);
                        new_node.set_next(child);
                        if prev < 0 {
                            parent.set_child_head(new_idx);
                        } else {
                            self.node(prev)
                                .expect("chain link resolves")
                                .set_next(new_idx);
                        }
                    } else {
                        self.free_children(child);
                        self.fill_node(child_node, value);
                    }
                    return Ok(());
                }
                live += 1;
            }
            prev = child;
            child = child_node.next();
        }
        Err(StoreError::document_missing())
    }

    /// Remove the value at `path` below `root_idx`, unlinking it from its
    /// parent chain and freeing the subtree eagerly.
    pub(crate) fn remove_value_at(&self, root_idx: i32, path: &[InternedStr]) -> Result<()> {
        if path.is_empty() {
            return Err(StoreError::RootCannotBeRemoved);
        }
        self.remove_value(root_idx, path, 0)
    }

    fn remove_value(&self, parent_idx: i32, path: &[InternedStr], depth: usize) -> Result<()> {
        let parent = self
            .node(parent_idx)
            .ok_or_else(StoreError::document_missing)?;
        let terminal = depth == path.len() - 1;

        match parent.node_type() {
            NodeType::Object => {
                let key = intern(&path[depth]);
                let mut prev = -1;
                let mut child = parent.child_head();
                while child >= 0 {
                    let child_node = self.node(child).expect("chain index resolves");
                    if !child_node.is_tombstone() && child_node.key() == key {
                        if terminal {
                            self.unlink_child(parent_idx, child, prev);
                            self.free_subtree(child);
                            return Ok(());
                        }
                        return self.remove_value(child, path, depth + 1);
                    }
                    prev = child;
                    child = child_node.next();
                }
                Err(StoreError::document_missing())
            }
            NodeType::Array => {
                let pos = parse_array_index(&path[depth], self.live_len(parent_idx))
                    .ok_or_else(StoreError::document_missing)?;
                let mut prev = -1;
                let mut child = parent.child_head();
                let mut live = 0;
                while child >= 0 {
                    let child_node = self.node(child).expect("chain index resolves");
                    if !child_node.is_tombstone() {
                        if live == pos {
                            if terminal {
                                self.unlink_child(parent_idx, child, prev);
                                self.free_subtree(child);
                                return Ok(());
                            }
                            return self.remove_value(child, path, depth + 1);
                        }
                        live += 1;
                    }
                    prev = child;
                    child = child_node.next();
                }
                Err(StoreError::document_missing())
            }
            _ => Err(StoreError::document_missing()),
        }
    }

    fn unlink_child(&self, parent_idx: i32, child_idx: i32, prev_idx: i32) {
        let child = self.node(child_idx).expect("chain index resolves");
        if prev_idx < 0 {
            self.node(parent_idx)
                .expect("parent index resolves")
                .set_child_head(child.next());
        } else {
            self.node(prev_idx)
                .expect("chain link resolves")
                .set_next(child.next());
        }
    }

    /// Number of non-tombstone children of a composite node.
    fn live_len(&self, idx: i32) -> usize {
        let Some(node) = self.node(idx) else {
            return 0;
        };
        let mut len = 0;
        let mut child = node.child_head();
        while child >= 0 {
            let child_node = self.node(child).expect("chain index resolves");
            if !child_node.is_tombstone() {
                len += 1;
            }
            child = child_node.next();
        }
        len
    }

    /// Index of the last node in a composite's chain (live or tombstone),
    /// or `None` for an empty chain.
    fn last_live_or_tail(&self, idx: i32) -> Option<i32> {
        let node = self.node(idx)?;
        let mut child = node.child_head();
        if child < 0 {
            return None;
        }
        loop {
            let child_node = self.node(child).expect("chain index resolves");
            let next = child_node.next();
            if next < 0 {
                return Some(child);
            }
            child = next;
        }
    }

    /// Free a node and all descendants, depth-first, post-order.
    pub(crate) fn free_subtree(&self, idx: i32) {
        let Some(node) = self.node(idx) else {
            return;
        };
        if node.is_composite() {
            let mut child = node.child_head();
            while child >= 0 {
                let next = self.node(child).expect("chain index resolves").next();
                self.free_subtree(child);
                child = next;
            }
        }
        self.free(idx);
    }

    /// Free the children of a composite node without freeing the node.
    /// Used when a write replaces a composite's value in place.
    pub(crate) fn free_children(&self, idx: i32) {
        let Some(node) = self.node(idx) else {
            return;
        };
        if node.is_composite() {
            let mut child = node.child_head();
            while child >= 0 {
                let next = self.node(child).expect("chain index resolves").next();
                self.free_subtree(child);
                child = next;
            }
        }
    }

    /// Tombstone a node and all descendants. Used for subtrees an older
    /// reader may still reach through a superseded root index.
    pub(crate) fn tombstone_subtree(&self, idx: i32) {
        let Some(node) = self.node(idx) else {
            return;
        };
        if node.is_composite() {
            let mut child = node.child_head();
            while child >= 0 {
                let next = self.node(child).expect("chain index resolves").next();
                self.tombstone_subtree(child);
                child = next;
            }
        }
        node.mark_tombstone();
    }

    /// Linearly scan allocated indices, freeing tombstoned nodes. Yields
    /// the CPU every [`SCAVENGE_YIELD_INTERVAL`] nodes.
    pub(crate) fn scavenge(&self) {
        let limit = self.allocated();
        let mut freed = 0_u32;
        for idx in 0..limit {
            if let Some(node) = self.node(idx) {
                if node.is_tombstone() {
                    self.free(idx);
                    freed += 1;
                }
            }
            if idx % SCAVENGE_YIELD_INTERVAL == 0 {
                std::thread::yield_now();
            }
        }
        if freed > 0 {
            trace!(freed, scanned = limit, "scavenge pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poldb_path::Path;
    use poldb_types::from_json;
    use serde_json::json;

    fn path(s: &str) -> Path {
        Path::parse(s).expect("test path parses")
    }

    #[test]
    fn alloc_creates_segments_lazily() {
        let arena = Arena::new();
        assert_eq!(arena.allocated(), 0);
        let idx = arena.alloc();
        assert_eq!(idx, 0);
        assert_eq!(arena.seg_count.load(Ordering::Acquire), 1);

        // Crossing a segment boundary creates the next segment.
        for _ in 0..SEGMENT_SIZE {
            arena.alloc();
        }
        assert_eq!(arena.seg_count.load(Ordering::Acquire), 2);
    }

    #[test]
    fn freelist_is_lifo() {
        let arena = Arena::new();
        let a = arena.alloc();
        let b = arena.alloc();
        arena.free(a);
        arena.free(b);
        // Most recently freed comes back first.
        assert_eq!(arena.alloc(), b);
        assert_eq!(arena.alloc(), a);
    }

    #[test]
    fn load_map_round_trips() {
        let arena = Arena::new();
        let doc = from_json(json!({"a": 1, "b": {"c": [true, null, "s"]}, "d": 2.5}));
        let root = arena.load_map(doc.as_object().expect("object"));
        assert_eq!(arena.to_value(root), doc);
    }

    #[test]
    fn empty_composites_load() {
        let arena = Arena::new();
        let doc = from_json(json!({"obj": {}, "arr": []}));
        let root = arena.load_map(doc.as_object().expect("object"));
        assert_eq!(arena.to_value(root), doc);
    }

    #[test]
    fn lookup_descends_objects_and_arrays() {
        let arena = Arena::new();
        let doc = from_json(json!({"users": [{"name": "ann"}, {"name": "bo"}]}));
        let root = arena.load_map(doc.as_object().expect("object"));

        let hit = arena
            .lookup_path(root, &path("/users/1/name"))
            .expect("path resolves");
        assert_eq!(arena.to_value(hit), Value::from("bo"));

        assert!(arena.lookup_path(root, &path("/users/2")).is_none());
        assert!(arena.lookup_path(root, &path("/users/-")).is_none());
        assert!(arena.lookup_path(root, &path("/missing")).is_none());
        assert!(arena.lookup_path(root, &path("/users/0/name/deep")).is_none());
    }

    #[test]
    fn set_value_creates_intermediates() {
        let arena = Arena::new();
        let root = arena.load_map(&poldb_types::Object::new());
        arena
            .set_value_at(root, &path("/a/b/c"), PatchOp::Add, &Value::Int(1))
            .unwrap();
        assert_eq!(
            arena.to_value(root),
            from_json(json!({"a": {"b": {"c": 1}}}))
        );
    }

    #[test]
    fn set_value_replaces_subtree_and_frees() {
        let arena = Arena::new();
        let doc = from_json(json!({"a": {"big": [1, 2, 3, 4]}}));
        let root = arena.load_map(doc.as_object().expect("object"));
        let before_free = arena.free_count();

        arena
            .set_value_at(root, &path("/a"), PatchOp::Replace, &Value::Int(7))
            .unwrap();
        assert_eq!(arena.to_value(root), from_json(json!({"a": 7})));
        // The replaced object chain went back to the freelist.
        assert!(arena.free_count() > before_free);
    }

    #[test]
    fn array_append_and_insert() {
        let arena = Arena::new();
        let doc = from_json(json!({"xs": [1, 3]}));
        let root = arena.load_map(doc.as_object().expect("object"));

        arena
            .set_value_at(root, &path("/xs/-"), PatchOp::Add, &Value::Int(4))
            .unwrap();
        assert_eq!(arena.to_value(root), from_json(json!({"xs": [1, 3, 4]})));

        arena
            .set_value_at(root, &path("/xs/1"), PatchOp::Add, &Value::Int(2))
            .unwrap();
        assert_eq!(
            arena.to_value(root),
            from_json(json!({"xs": [1, 2, 3, 4]}))
        );

        arena
            .set_value_at(root, &path("/xs/0"), PatchOp::Replace, &Value::Int(0))
            .unwrap();
        assert_eq!(
            arena.to_value(root),
            from_json(json!({"xs": [0, 2, 3, 4]}))
        );

        let err = arena
            .set_value_at(root, &path("/xs/9"), PatchOp::Replace, &Value::Int(9))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn remove_unlinks_and_frees() {
        let arena = Arena::new();
        let doc = from_json(json!({"a": {"b": 1, "c": 2}, "d": [10, 20]}));
        let root = arena.load_map(doc.as_object().expect("object"));

        arena.remove_value_at(root, &path("/a/b")).unwrap();
        assert_eq!(
            arena.to_value(root),
            from_json(json!({"a": {"c": 2}, "d": [10, 20]}))
        );

        arena.remove_value_at(root, &path("/d/0")).unwrap();
        assert_eq!(
            arena.to_value(root),
            from_json(json!({"a": {"c": 2}, "d": [20]}))
        );

        let err = arena.remove_value_at(root, &path("/missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn tombstoned_subtree_is_invisible_then_scavenged() {
        let arena = Arena::new();
        let doc = from_json(json!({"a": {"b": [1, 2, 3]}}));
        let root = arena.load_map(doc.as_object().expect("object"));

        let inner = arena.lookup_path(root, &path("/a")).expect("resolves");
        arena.tombstone_subtree(inner);

        // Tombstones are skipped by materialization and lookups.
        assert_eq!(arena.to_value(root), from_json(json!({})));
        assert!(arena.lookup_path(root, &path("/a")).is_none());

        let before = arena.free_count();
        arena.scavenge();
        // a-object + b-key object? a carries: object node, array node, 3 ints.
        assert!(arena.free_count() >= before + 5);
    }

    #[test]
    #[should_panic(expected = "maximum segments exceeded")]
    fn segment_exhaustion_panics() {
        let arena = Arena::new();
        // Force the counter past the cap without allocating 2M nodes.
        arena
            .node_count
            .store((MAX_SEGMENTS * SEGMENT_SIZE) as u32, Ordering::Release);
        arena.seg_count.store(MAX_SEGMENTS as u32, Ordering::Release);
        let _ = arena.alloc();
    }
}
