//! Transaction state: compacted pending updates and read-through.
//!
//! Each write keeps the pending set compacted so that no two updates
//! overlap:
//!
//! - a new update whose path equals an existing update's path replaces it
//!   (or is dropped as a no-op when it rewrites the same scalar);
//! - a new update whose path extends an existing update's path is folded
//!   into that update's value in place;
//! - existing updates whose paths extend the new update's path are masked
//!   (removed) — the new update subsumes them.
//!
//! New updates are prepended, so the vector is ordered most-recent-first.
//! The exact-path index appears once a transaction grows past the adaptive
//! threshold; prefix scans stay linear since an exact-match index cannot
//! answer prefix queries. Prepending keeps the reindex cost at O(n) per
//! write; an append-only vector with per-update sequence numbers would
//! avoid that at the cost of a more involved re-lookup.

use std::collections::HashMap;

use smallvec::SmallVec;

use poldb_error::{Result, StoreError};
use poldb_path::Path;
use poldb_store::{LazyBlob, TxnContext};
use poldb_types::{value_at, PatchOp, Value};

use crate::pools::{
    acquire_path_index, release_path_index, PATH_INDEX_THRESHOLD, SCRATCH_POOL,
    SCRATCH_POOL_THRESHOLD,
};
use crate::update::Update;

/// Collect buffer for masked-update positions: stack-backed for small
/// transactions, pooled for large ones.
enum ScratchBuf {
    Inline(SmallVec<[usize; 8]>),
    Pooled(Vec<usize>),
}

impl ScratchBuf {
    fn for_len(pending: usize) -> Self {
        if pending > SCRATCH_POOL_THRESHOLD {
            let mut buf = SCRATCH_POOL.acquire_with(|| Vec::with_capacity(8));
            buf.clear();
            Self::Pooled(buf)
        } else {
            Self::Inline(SmallVec::new())
        }
    }

    fn push(&mut self, i: usize) {
        match self {
            Self::Inline(v) => v.push(i),
            Self::Pooled(v) => v.push(i),
        }
    }

    fn positions(&self) -> &[usize] {
        match self {
            Self::Inline(v) => v,
            Self::Pooled(v) => v,
        }
    }

    fn release(self) {
        if let Self::Pooled(mut v) = self {
            v.clear();
            SCRATCH_POOL.release(v);
        }
    }
}

/// A pending policy change.
pub(crate) struct PolicyUpdate {
    pub(crate) blob: Option<LazyBlob>,
    pub(crate) remove: bool,
}

/// State of one open transaction.
pub(crate) struct TreeTxn {
    pub(crate) write: bool,
    pub(crate) context: Option<TxnContext>,
    pub(crate) updates: Vec<Update>,
    pub(crate) path_index: Option<HashMap<String, usize>>,
    pub(crate) policies: Vec<(String, PolicyUpdate)>,
}

impl TreeTxn {
    pub(crate) fn new(write: bool, context: Option<TxnContext>) -> Self {
        Self {
            write,
            context,
            updates: Vec::new(),
            path_index: None,
            policies: Vec::new(),
        }
    }

    /// Record a write against the committed data `data`.
    pub(crate) fn write(
        &mut self,
        data: &Value,
        op: PatchOp,
        path: &Path,
        value: Value,
    ) -> Result<()> {
        if !self.write {
            return Err(StoreError::invalid_transaction(
                "data write during read transaction",
            ));
        }

        if path.is_empty() {
            return self.update_root(op, value);
        }

        if self.path_index.is_none() && self.updates.len() >= PATH_INDEX_THRESHOLD {
            self.init_path_index();
        }

        let path_str = path.to_string();

        // Exact-path match: O(1) through the index when present, linear
        // otherwise.
        let exact = if let Some(index) = &self.path_index {
            index.get(&path_str).copied()
        } else {
            self.updates.iter().position(|u| u.path == *path)
        };
        if let Some(i) = exact {
            let existing = &self.updates[i];
            if existing.remove {
                if op != PatchOp::Add {
                    return Err(StoreError::document_missing());
                }
            } else if existing.value.strict_scalar_eq(&value) {
                // Rewriting the same scalar at the same path: nothing to do.
                return Ok(());
            }
            self.remove_update(i);
        }

        // Prefix relationships require a linear pass regardless of the
        // index. Collect masked positions; fold extension writes in place.
        // Small transactions collect on the stack; large ones borrow a
        // pooled buffer.
        let mut masked = ScratchBuf::for_len(self.updates.len());
        let scan = self.scan_prefixes(op, path, &value, &mut masked);
        match scan {
            Err(err) => {
                masked.release();
                return Err(err);
            }
            Ok(true) => {
                masked.release();
                return Ok(());
            }
            Ok(false) => {}
        }
        for &i in masked.positions().iter().rev() {
            self.remove_update(i);
        }
        masked.release();

        // Materialize rooted at the committed data, never the pending view.
        let update = Update::new(data, op, path, value)?;
        if self.updates.capacity() == 0 {
            self.updates.reserve(8);
        }
        self.updates.insert(0, update);

        if let Some(index) = &mut self.path_index {
            // Prepend shifted every existing position up by one.
            for pos in index.values_mut() {
                *pos += 1;
            }
            index.insert(path_str, 0);
        }

        Ok(())
    }

    /// One linear pass over pending updates. Masked positions (updates the
    /// new write subsumes) are pushed into `masked`; returns `true` if the
    /// write was folded into an existing containing update and nothing
    /// further needs to happen.
    fn scan_prefixes(
        &mut self,
        op: PatchOp,
        path: &Path,
        value: &Value,
        masked: &mut ScratchBuf,
    ) -> Result<bool> {
        let mut fold_target: Option<usize> = None;

        for (i, existing) in self.updates.iter().enumerate() {
            if existing.path.has_prefix(path) {
                masked.push(i);
                continue;
            }
            if path.has_prefix(&existing.path) {
                if existing.remove {
                    return Err(StoreError::document_missing());
                }
                fold_target = Some(i);
                break;
            }
        }

        if let Some(i) = fold_target {
            let suffix = path.suffix(self.updates[i].path.len());
            let derived = Update::new(&self.updates[i].value, op, &suffix, value.clone())?;
            let mut folded = self.updates[i].value.clone();
            derived.apply(&mut folded)?;
            self.updates[i].value = folded;
            return Ok(true);
        }

        Ok(false)
    }

    fn update_root(&mut self, op: PatchOp, value: Value) -> Result<()> {
        if op == PatchOp::Remove {
            return Err(StoreError::RootCannotBeRemoved);
        }
        if !matches!(value, Value::Object(_)) {
            return Err(StoreError::RootMustBeObject);
        }

        // The root update subsumes everything recorded so far.
        self.updates.clear();
        self.updates.push(Update::root(value));
        if let Some(index) = &mut self.path_index {
            index.clear();
            index.insert(Path::root().to_string(), 0);
        }
        Ok(())
    }

    fn init_path_index(&mut self) {
        let mut index = acquire_path_index();
        for (i, update) in self.updates.iter().enumerate() {
            index.insert(update.path.to_string(), i);
        }
        self.path_index = Some(index);
    }

    fn remove_update(&mut self, idx: usize) {
        if idx >= self.updates.len() {
            return;
        }
        if let Some(index) = &mut self.path_index {
            index.remove(&self.updates[idx].path.to_string());
        }
        self.updates.remove(idx);
        if let Some(index) = &mut self.path_index {
            for pos in index.values_mut() {
                if *pos > idx {
                    *pos -= 1;
                }
            }
        }
    }

    /// Read through pending updates.
    pub(crate) fn read(&self, data: &Value, path: &Path) -> Result<Value> {
        if !self.write || self.updates.is_empty() {
            return value_at(data, path).cloned();
        }

        let mut merge: Vec<&Update> = Vec::new();

        for update in &self.updates {
            // The update contains the queried path: answer from its value.
            if path.has_prefix(&update.path) {
                if update.remove {
                    return Err(StoreError::document_missing());
                }
                return value_at(&update.value, &path[update.path.len()..]).cloned();
            }
            // The update sits below the queried path: it must be merged.
            if update.path.has_prefix(path) {
                merge.push(update);
            }
        }

        let base = value_at(data, path)?;
        if merge.is_empty() {
            return Ok(base.clone());
        }

        let mut copy = base.clone();
        for update in merge {
            copy = update.apply_relative(&copy, path.len());
        }
        Ok(copy)
    }

    /// Drop the path index back into its pool.
    pub(crate) fn release_index(&mut self) {
        if let Some(index) = self.path_index.take() {
            release_path_index(index);
        }
    }

    // --- policies -------------------------------------------------------

    pub(crate) fn upsert_policy(&mut self, id: &str, data: &[u8]) -> Result<()> {
        self.put_policy_update(
            id,
            PolicyUpdate {
                blob: Some(LazyBlob::new(data)),
                remove: false,
            },
        )
    }

    pub(crate) fn delete_policy(&mut self, id: &str) -> Result<()> {
        self.put_policy_update(
            id,
            PolicyUpdate {
                blob: None,
                remove: true,
            },
        )
    }

    fn put_policy_update(&mut self, id: &str, update: PolicyUpdate) -> Result<()> {
        if !self.write {
            return Err(StoreError::invalid_transaction(
                "policy write during read transaction",
            ));
        }
        if self.policies.is_empty() {
            self.policies.reserve(4);
        }
        match self.policies.iter_mut().find(|(pid, _)| pid == id) {
            Some((_, existing)) => *existing = update,
            None => self.policies.push((id.to_owned(), update)),
        }
        Ok(())
    }

    /// Pending policy update for `id`, if any.
    pub(crate) fn policy_update(&self, id: &str) -> Option<&PolicyUpdate> {
        self.policies
            .iter()
            .find(|(pid, _)| pid == id)
            .map(|(_, u)| u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poldb_types::from_json;
    use serde_json::json;

    fn path(s: &str) -> Path {
        Path::parse(s).expect("test path parses")
    }

    fn write_txn() -> TreeTxn {
        TreeTxn::new(true, None)
    }

    #[test]
    fn read_txn_rejects_writes() {
        let mut txn = TreeTxn::new(false, None);
        let data = from_json(json!({}));
        let err = txn
            .write(&data, PatchOp::Add, &path("/a"), Value::Int(1))
            .unwrap_err();
        assert_eq!(err.kind(), poldb_error::ErrorKind::InvalidTransaction);
    }

    #[test]
    fn same_scalar_write_is_idempotent() {
        let mut txn = write_txn();
        let data = from_json(json!({}));
        txn.write(&data, PatchOp::Add, &path("/x"), Value::Int(1))
            .unwrap();
        txn.write(&data, PatchOp::Add, &path("/x"), Value::Int(1))
            .unwrap();
        assert_eq!(txn.updates.len(), 1);
    }

    #[test]
    fn exact_rewrite_replaces_update() {
        let mut txn = write_txn();
        let data = from_json(json!({}));
        txn.write(&data, PatchOp::Add, &path("/x"), from_json(json!({"y": {"z": 1}})))
            .unwrap();
        txn.write(&data, PatchOp::Add, &path("/x"), from_json(json!({"a": 2})))
            .unwrap();
        assert_eq!(txn.updates.len(), 1);
        let got = txn.read(&data, &path("/x")).unwrap();
        assert_eq!(got, from_json(json!({"a": 2})));
    }

    #[test]
    fn extension_write_folds_into_existing() {
        let mut txn = write_txn();
        let data = from_json(json!({}));
        txn.write(&data, PatchOp::Add, &path("/a"), from_json(json!({"b": 1})))
            .unwrap();
        txn.write(&data, PatchOp::Add, &path("/a/c"), Value::Int(2))
            .unwrap();
        assert_eq!(txn.updates.len(), 1);
        let got = txn.read(&data, &path("/a")).unwrap();
        assert_eq!(got, from_json(json!({"b": 1, "c": 2})));
    }

    #[test]
    fn containing_write_masks_children() {
        let mut txn = write_txn();
        let data = from_json(json!({"a": {"b": 1}}));
        txn.write(&data, PatchOp::Add, &path("/a/b"), Value::Int(2))
            .unwrap();
        txn.write(&data, PatchOp::Add, &path("/a/c"), Value::Int(3))
            .unwrap();
        txn.write(&data, PatchOp::Add, &path("/a"), from_json(json!({})))
            .unwrap();
        assert_eq!(txn.updates.len(), 1);
        assert_eq!(txn.read(&data, &path("/a")).unwrap(), from_json(json!({})));
    }

    #[test]
    fn write_after_pending_remove_requires_add() {
        let mut txn = write_txn();
        let data = from_json(json!({"a": 1}));
        txn.write(&data, PatchOp::Remove, &path("/a"), Value::Null)
            .unwrap();
        let err = txn
            .write(&data, PatchOp::Replace, &path("/a"), Value::Int(2))
            .unwrap_err();
        assert!(err.is_not_found());
        txn.write(&data, PatchOp::Add, &path("/a"), Value::Int(2))
            .unwrap();
        assert_eq!(txn.read(&data, &path("/a")).unwrap(), Value::Int(2));
    }

    #[test]
    fn write_below_pending_remove_is_not_found() {
        let mut txn = write_txn();
        let data = from_json(json!({"a": {"b": 1}}));
        txn.write(&data, PatchOp::Remove, &path("/a"), Value::Null)
            .unwrap();
        let err = txn
            .write(&data, PatchOp::Add, &path("/a/b"), Value::Int(2))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn read_sees_pending_remove_below_prefix() {
        let mut txn = write_txn();
        let data = from_json(json!({"a": {"b": {"c": 1}}}));
        txn.write(&data, PatchOp::Remove, &path("/a/b"), Value::Null)
            .unwrap();
        assert!(txn.read(&data, &path("/a/b/c")).unwrap_err().is_not_found());
        assert!(txn.read(&data, &path("/a/b")).unwrap_err().is_not_found());
        // Sibling merge: /a still exists, with b removed.
        assert_eq!(txn.read(&data, &path("/a")).unwrap(), from_json(json!({})));
    }

    #[test]
    fn adaptive_index_appears_past_threshold() {
        let mut txn = write_txn();
        let data = from_json(json!({}));
        for i in 0..(PATH_INDEX_THRESHOLD + 4) {
            let p = Path::root().child(&format!("k_{i}"));
            txn.write(&data, PatchOp::Add, &p, Value::from(format!("v{i}")))
                .unwrap();
        }
        assert!(txn.path_index.is_some());
        let count = txn.updates.len();

        // Compacting rewrite through the index: count must not grow.
        let p = Path::root().child("k_5");
        txn.write(&data, PatchOp::Add, &p, Value::from("new"))
            .unwrap();
        assert_eq!(txn.updates.len(), count);
        assert_eq!(txn.read(&data, &p).unwrap(), Value::from("new"));

        // Index stays aligned with the vector after the churn.
        let index = txn.path_index.as_ref().unwrap();
        for (path_str, &i) in index {
            assert_eq!(&txn.updates[i].path.to_string(), path_str);
        }
    }

    #[test]
    fn root_update_clears_pending() {
        let mut txn = write_txn();
        let data = from_json(json!({}));
        txn.write(&data, PatchOp::Add, &path("/x"), Value::Int(1))
            .unwrap();
        txn.write(&data, PatchOp::Add, &Path::root(), from_json(json!({"y": 2})))
            .unwrap();
        assert_eq!(txn.updates.len(), 1);
        assert_eq!(
            txn.read(&data, &Path::root()).unwrap(),
            from_json(json!({"y": 2}))
        );
    }

    #[test]
    fn root_guards() {
        let mut txn = write_txn();
        let data = from_json(json!({}));
        let err = txn
            .write(&data, PatchOp::Remove, &Path::root(), Value::Null)
            .unwrap_err();
        assert_eq!(err.kind(), poldb_error::ErrorKind::RootCannotBeRemoved);
        let err = txn
            .write(&data, PatchOp::Replace, &Path::root(), Value::Int(1))
            .unwrap_err();
        assert_eq!(err.kind(), poldb_error::ErrorKind::RootMustBeObject);
    }

    #[test]
    fn read_merges_update_into_committed_base() {
        let mut txn = write_txn();
        let data = from_json(json!({"a": {"b": 1}}));
        txn.write(&data, PatchOp::Add, &path("/a/c"), Value::Int(2))
            .unwrap();
        let got = txn.read(&data, &path("/a")).unwrap();
        assert_eq!(got, from_json(json!({"b": 1, "c": 2})));
        // Untouched sibling reads come straight from committed data.
        assert_eq!(txn.read(&data, &path("/a/b")).unwrap(), Value::Int(1));
    }

    #[test]
    fn policy_updates_latest_wins() {
        let mut txn = write_txn();
        txn.upsert_policy("p.rego", b"one").unwrap();
        txn.upsert_policy("p.rego", b"two").unwrap();
        assert_eq!(txn.policies.len(), 1);
        let upd = txn.policy_update("p.rego").unwrap();
        assert_eq!(&*upd.blob.as_ref().unwrap().get().unwrap(), b"two");

        txn.delete_policy("p.rego").unwrap();
        assert!(txn.policy_update("p.rego").unwrap().remove);
        assert_eq!(txn.policies.len(), 1);
    }
}
