//! Arena transactions: snapshot root, compacted pending updates.
//!
//! The compaction contract is the same as the tree engine's — no two
//! pending updates overlap, newest first. Updates are validated against
//! the committed graph at write time but recorded as raw patches; the
//! in-place apply path materializes them at commit.

use std::collections::HashMap;

use poldb_error::{Result, StoreError};
use poldb_path::Path;
use poldb_store::{LazyBlob, TxnContext};
use poldb_types::{apply_patch, validate_patch_target, value_at, PatchOp, Value};

use crate::arena::Arena;
use crate::symbols::{intern, Sym};

/// Pending-update count at which a transaction builds its exact-path index.
const PATH_INDEX_THRESHOLD: usize = 16;

/// One pending data patch.
#[derive(Debug, Clone)]
pub(crate) struct ArenaUpdate {
    pub(crate) path: Path,
    pub(crate) op: PatchOp,
    pub(crate) value: Value,
    pub(crate) remove: bool,
}

/// One pending policy change.
pub(crate) struct PolicyTxnUpdate {
    pub(crate) id: Sym,
    pub(crate) blob: Option<LazyBlob>,
    pub(crate) remove: bool,
}

/// State of one open arena transaction.
pub(crate) struct ArenaTxn {
    pub(crate) write: bool,
    /// Root index sampled at begin; committed reads walk from here.
    pub(crate) root_idx: i32,
    pub(crate) context: Option<TxnContext>,
    pub(crate) updates: Vec<ArenaUpdate>,
    path_index: Option<HashMap<String, usize>>,
    pub(crate) policies: Vec<PolicyTxnUpdate>,
}

impl ArenaTxn {
    pub(crate) fn new(write: bool, root_idx: i32, context: Option<TxnContext>) -> Self {
        Self {
            write,
            root_idx,
            context,
            updates: Vec::new(),
            path_index: None,
            policies: Vec::new(),
        }
    }

    /// Record a write.
    pub(crate) fn write(
        &mut self,
        arena: &Arena,
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
            let mut index = HashMap::with_capacity(self.updates.len() * 2);
            for (i, update) in self.updates.iter().enumerate() {
                index.insert(update.path.to_string(), i);
            }
            self.path_index = Some(index);
        }

        let path_str = path.to_string();

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
                return Ok(());
            }
            self.remove_update(i);
        }

        // Prefix pass: mask subsumed updates, fold extension writes.
        let mut masked: Vec<usize> = Vec::new();
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
            let suffix = &path[self.updates[i].path.len()..];
            // Extension writes fold into the pending value; the same
            // write-time rules apply to it as to committed data.
            validate_patch_target(&self.updates[i].value, suffix, op)?;
            self.updates[i].value = apply_patch(&self.updates[i].value, suffix, op, &value);
            return Ok(());
        }

        for &i in masked.iter().rev() {
            self.remove_update(i);
        }

        // The new update is rooted at the committed data, never the
        // pending view; misses surface here, at write time.
        arena.validate_patch(self.root_idx, path, op)?;

        if self.updates.capacity() == 0 {
            self.updates.reserve(8);
        }
        self.updates.insert(
            0,
            ArenaUpdate {
                path: path.clone(),
                op,
                value,
                remove: op == PatchOp::Remove,
            },
        );
        if let Some(index) = &mut self.path_index {
            for pos in index.values_mut() {
                *pos += 1;
            }
            index.insert(path_str, 0);
        }
        Ok(())
    }

    fn update_root(&mut self, op: PatchOp, value: Value) -> Result<()> {
        if op == PatchOp::Remove {
            return Err(StoreError::RootCannotBeRemoved);
        }
        if !matches!(value, Value::Object(_)) {
            return Err(StoreError::RootMustBeObject);
        }
        self.updates.clear();
        self.updates.push(ArenaUpdate {
            path: Path::root(),
            op,
            value,
            remove: false,
        });
        if let Some(index) = &mut self.path_index {
            index.clear();
            index.insert(Path::root().to_string(), 0);
        }
        Ok(())
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

    /// Read through pending updates against the snapshot root.
    pub(crate) fn read(&self, arena: &Arena, path: &Path) -> Result<Value> {
        if !self.write || self.updates.is_empty() {
            return self.read_committed(arena, path);
        }

        let mut merge: Vec<&ArenaUpdate> = Vec::new();
        for update in &self.updates {
            if path.has_prefix(&update.path) {
                if update.remove {
                    return Err(StoreError::document_missing());
                }
                return value_at(&update.value, &path[update.path.len()..]).cloned();
            }
            if update.path.has_prefix(path) {
                merge.push(update);
            }
        }

        let base = match self.read_committed(arena, path) {
            Ok(value) => value,
            Err(err) => {
                if merge.is_empty() {
                    return Err(err);
                }
                // Pending updates will create this subtree at commit.
                Value::Object(poldb_types::Object::new())
            }
        };
        if merge.is_empty() {
            return Ok(base);
        }

        let mut copy = base;
        for update in merge {
            let rel = &update.path[path.len()..];
            copy = apply_patch(&copy, rel, update.op, &update.value);
        }
        Ok(copy)
    }

    fn read_committed(&self, arena: &Arena, path: &Path) -> Result<Value> {
        if self.root_idx < 0 {
            // Uninitialized store: the document is an empty object.
            return if path.is_empty() {
                Ok(Value::Object(poldb_types::Object::new()))
            } else {
                Err(StoreError::document_missing())
            };
        }
        let idx = arena
            .lookup_path(self.root_idx, path)
            .ok_or_else(StoreError::document_missing)?;
        Ok(arena.to_value(idx))
    }

    // --- policies --------------------------------------------------------

    pub(crate) fn upsert_policy(&mut self, id: &str, data: &[u8]) -> Result<()> {
        self.put_policy_update(id, Some(LazyBlob::new(data)), false)
    }

    pub(crate) fn delete_policy(&mut self, id: &str) -> Result<()> {
        self.put_policy_update(id, None, true)
    }

    fn put_policy_update(
        &mut self,
        id: &str,
        blob: Option<LazyBlob>,
        remove: bool,
    ) -> Result<()> {
        if !self.write {
            return Err(StoreError::invalid_transaction(
                "policy write during read transaction",
            ));
        }
        let id = intern(id);
        match self.policies.iter_mut().find(|u| u.id == id) {
            Some(existing) => {
                existing.blob = blob;
                existing.remove = remove;
            }
            None => {
                if self.policies.is_empty() {
                    self.policies.reserve(4);
                }
                self.policies.push(PolicyTxnUpdate { id, blob, remove });
            }
        }
        Ok(())
    }

    /// Pending policy update for `id`, if any.
    pub(crate) fn policy_update(&self, id: &str) -> Option<&PolicyTxnUpdate> {
        let id = intern(id);
        self.policies.iter().find(|u| u.id == id)
    }
}
