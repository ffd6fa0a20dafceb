//! The tree engine's store: committed state, transaction registry, triggers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use poldb_error::{Result, StoreError};
use poldb_path::Path;
use poldb_store::{
    next_store_id, DataEvent, LazyBlob, PolicyEvent, Store, TransactionParams, TriggerConfig,
    TriggerEvent, TriggerHandle, TxnId, WriterGate,
};
use poldb_types::{Object, PatchOp, Value};

use crate::txn::TreeTxn;

/// In-process store keeping the committed document as a value tree.
pub struct TreeStore {
    store_id: u64,
    /// Committed document. Readers share; a committing writer briefly
    /// excludes them while folding updates in.
    data: RwLock<Value>,
    /// Committed policies, compressed at rest.
    policies: RwLock<HashMap<String, LazyBlob>>,
    triggers: RwLock<HashMap<u64, TriggerConfig>>,
    /// Open transactions. Each carries its own lock so concurrent readers
    /// do not serialize on the registry.
    txns: Mutex<HashMap<u64, Arc<Mutex<TreeTxn>>>>,
    writer: WriterGate,
    next_xid: AtomicU64,
    next_trigger_id: AtomicU64,
}

impl TreeStore {
    /// An empty store: root is an empty object, no policies.
    #[must_use]
    pub fn new() -> Self {
        Self::with_data(Value::Object(Object::new()))
    }

    /// A store seeded with `data` as the committed document.
    ///
    /// # Panics
    ///
    /// Panics if `data` is not an object (the root invariant).
    #[must_use]
    pub fn with_data(data: Value) -> Self {
        assert!(
            matches!(data, Value::Object(_)),
            "root document must be an object"
        );
        Self {
            store_id: next_store_id(),
            data: RwLock::new(data),
            policies: RwLock::new(HashMap::new()),
            triggers: RwLock::new(HashMap::new()),
            txns: Mutex::new(HashMap::new()),
            writer: WriterGate::new(),
            next_xid: AtomicU64::new(0),
            next_trigger_id: AtomicU64::new(0),
        }
    }

    /// Look up a transaction, enforcing store ownership and staleness.
    fn txn_state(&self, txn: TxnId) -> Result<Arc<Mutex<TreeTxn>>> {
        if txn.store() != self.store_id {
            return Err(StoreError::invalid_transaction(
                "transaction belongs to a different store",
            ));
        }
        self.txns
            .lock()
            .get(&txn.xid())
            .cloned()
            .ok_or_else(|| StoreError::invalid_transaction("stale transaction"))
    }

    /// Remove a transaction from the registry (commit/abort).
    fn take_txn(&self, txn: TxnId) -> Result<Arc<Mutex<TreeTxn>>> {
        if txn.store() != self.store_id {
            return Err(StoreError::invalid_transaction(
                "transaction belongs to a different store",
            ));
        }
        self.txns
            .lock()
            .remove(&txn.xid())
            .ok_or_else(|| StoreError::invalid_transaction("stale transaction"))
    }

    fn require_write(state: &TreeTxn, what: &str) -> Result<()> {
        if state.write {
            Ok(())
        } else {
            Err(StoreError::invalid_transaction(format!(
                "{what} requires a write transaction"
            )))
        }
    }
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for TreeStore {
    fn transaction(&self, params: TransactionParams) -> Result<TxnId> {
        if params.write {
            self.writer.acquire();
        }
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed) + 1;
        let state = TreeTxn::new(params.write, params.context);
        self.txns
            .lock()
            .insert(xid, Arc::new(Mutex::new(state)));
        Ok(TxnId::new(self.store_id, xid))
    }

    fn read(&self, txn: TxnId, path: &Path) -> Result<Value> {
        let state = self.txn_state(txn)?;
        let state = state.lock();
        let data = self.data.read();
        state.read(&data, path)
    }

    fn write(&self, txn: TxnId, op: PatchOp, path: &Path, value: Value) -> Result<()> {
        let state = self.txn_state(txn)?;
        let mut state = state.lock();
        let data = self.data.read();
        state.write(&data, op, path, value)
    }

    fn commit(&self, txn: TxnId) -> Result<()> {
        let state = self.take_txn(txn)?;
        let mut state = state.lock();
        if !state.write {
            return Ok(());
        }

        let has_triggers = !self.triggers.read().is_empty();
        let mut event = TriggerEvent {
            context: state.context.take(),
            ..TriggerEvent::default()
        };

        let apply_result = {
            // Readers are excluded only for the apply step itself.
            let mut data = self.data.write();
            let mut result = Ok(());
            for update in &state.updates {
                if let Err(err) = update.apply(&mut data) {
                    result = Err(err);
                    break;
                }
                if has_triggers {
                    event.data.push(DataEvent {
                        path: update.path.clone(),
                        data: (!update.remove).then(|| update.value.clone()),
                        removed: update.remove,
                    });
                }
            }
            result
        };
        if let Err(err) = apply_result {
            state.release_index();
            self.writer.release();
            return Err(err);
        }

        let policy_updates = std::mem::take(&mut state.policies);
        if !policy_updates.is_empty() {
            let mut policies = self.policies.write();
            for (id, update) in policy_updates {
                if update.remove {
                    policies.remove(&id);
                } else if let Some(blob) = &update.blob {
                    policies.insert(id.clone(), blob.clone());
                }
                if has_triggers {
                    // Inflating the payload is only worth it when a trigger
                    // will actually see it.
                    let data = match (&update.remove, &update.blob) {
                        (false, Some(blob)) => match blob.get() {
                            Ok(bytes) => Some(bytes.to_vec()),
                            Err(err) => {
                                drop(policies);
                                state.release_index();
                                self.writer.release();
                                return Err(err);
                            }
                        },
                        _ => None,
                    };
                    event.policy.push(PolicyEvent {
                        id,
                        data,
                        removed: update.remove,
                    });
                }
            }
        }

        debug!(
            xid = txn.xid(),
            data_updates = state.updates.len(),
            "commit applied"
        );
        state.release_index();

        if has_triggers {
            let triggers = self.triggers.read();
            for trigger in triggers.values() {
                trigger.fire(&event);
            }
        }

        self.writer.release();
        Ok(())
    }

    fn abort(&self, txn: TxnId) {
        let Ok(state) = self.take_txn(txn) else {
            return;
        };
        let mut state = state.lock();
        state.release_index();
        if state.write {
            self.writer.release();
        }
    }

    fn list_policies(&self, txn: TxnId) -> Result<Vec<String>> {
        let state = self.txn_state(txn)?;
        let state = state.lock();
        let policies = self.policies.read();

        let mut ids: Vec<String> = policies
            .keys()
            .filter(|id| state.policy_update(id).is_none())
            .cloned()
            .collect();
        for (id, update) in &state.policies {
            if !update.remove {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    fn get_policy(&self, txn: TxnId, id: &str) -> Result<Vec<u8>> {
        let state = self.txn_state(txn)?;
        let state = state.lock();

        if let Some(update) = state.policy_update(id) {
            if update.remove {
                return Err(StoreError::not_found(format!("policy id {id:?}")));
            }
            if let Some(blob) = &update.blob {
                return Ok(blob.get()?.to_vec());
            }
        }

        let policies = self.policies.read();
        match policies.get(id) {
            // Lazy inflation happens here, cached for subsequent reads.
            Some(blob) => Ok(blob.get()?.to_vec()),
            None => Err(StoreError::not_found(format!("policy id {id:?}"))),
        }
    }

    fn upsert_policy(&self, txn: TxnId, id: &str, data: Vec<u8>) -> Result<()> {
        let state = self.txn_state(txn)?;
        let mut state = state.lock();
        state.upsert_policy(id, &data)
    }

    fn delete_policy(&self, txn: TxnId, id: &str) -> Result<()> {
        let state = self.txn_state(txn)?;
        let mut state = state.lock();
        state.delete_policy(id)
    }

    fn register_trigger(&self, txn: TxnId, config: TriggerConfig) -> Result<TriggerHandle> {
        let state = self.txn_state(txn)?;
        let state = state.lock();
        Self::require_write(&state, "trigger registration")?;

        let id = self.next_trigger_id.fetch_add(1, Ordering::Relaxed);
        self.triggers.write().insert(id, config);
        Ok(TriggerHandle::from_raw(id))
    }

    fn unregister_trigger(&self, txn: TxnId, handle: TriggerHandle) -> Result<()> {
        let state = self.txn_state(txn)?;
        let state = state.lock();
        Self::require_write(&state, "trigger removal")?;

        self.triggers.write().remove(&handle.raw());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poldb_types::from_json;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn path(s: &str) -> Path {
        Path::parse(s).expect("test path parses")
    }

    fn write_txn(store: &TreeStore) -> TxnId {
        store
            .transaction(TransactionParams::write())
            .expect("write txn opens")
    }

    fn read_txn(store: &TreeStore) -> TxnId {
        store
            .transaction(TransactionParams::read())
            .expect("read txn opens")
    }

    #[test]
    fn committed_writes_visible_to_fresh_reads() {
        let store = TreeStore::new();
        let txn = write_txn(&store);
        store
            .write(txn, PatchOp::Add, &path("/a"), from_json(json!({"b": 1})))
            .unwrap();
        store
            .write(txn, PatchOp::Add, &path("/a/c"), Value::Int(2))
            .unwrap();
        store.commit(txn).unwrap();

        let txn = read_txn(&store);
        let got = store.read(txn, &path("/a")).unwrap();
        assert_eq!(got, from_json(json!({"b": 1, "c": 2})));
    }

    #[test]
    fn empty_path_reads_full_document() {
        let store = TreeStore::with_data(from_json(json!({"x": 1})));
        let txn = read_txn(&store);
        assert_eq!(
            store.read(txn, &Path::root()).unwrap(),
            from_json(json!({"x": 1}))
        );
    }

    #[test]
    fn stale_transaction_rejected() {
        let store = TreeStore::new();
        let txn = write_txn(&store);
        store.commit(txn).unwrap();
        let err = store.read(txn, &Path::root()).unwrap_err();
        assert_eq!(err.kind(), poldb_error::ErrorKind::InvalidTransaction);
        let err = store.commit(txn).unwrap_err();
        assert_eq!(err.kind(), poldb_error::ErrorKind::InvalidTransaction);
    }

    #[test]
    fn cross_store_transaction_rejected() {
        let a = TreeStore::new();
        let b = TreeStore::new();
        let txn = read_txn(&a);
        let err = b.read(txn, &Path::root()).unwrap_err();
        assert_eq!(err.kind(), poldb_error::ErrorKind::InvalidTransaction);
        a.abort(txn);
    }

    #[test]
    fn abort_discards_pending_writes() {
        let store = TreeStore::new();
        let txn = write_txn(&store);
        store
            .write(txn, PatchOp::Add, &path("/a"), Value::Int(1))
            .unwrap();
        store.abort(txn);

        let txn = read_txn(&store);
        assert!(store.read(txn, &path("/a")).unwrap_err().is_not_found());

        // The writer gate is free again.
        let txn = write_txn(&store);
        store.abort(txn);
    }

    #[test]
    fn remove_hides_whole_subtree() {
        let store = TreeStore::with_data(from_json(json!({"a": {"b": {"c": 1}}})));
        let txn = write_txn(&store);
        store
            .write(txn, PatchOp::Remove, &path("/a"), Value::Null)
            .unwrap();
        store.commit(txn).unwrap();

        let txn = read_txn(&store);
        assert!(store.read(txn, &path("/a/b/c")).unwrap_err().is_not_found());
        assert!(store.read(txn, &path("/a")).unwrap_err().is_not_found());
    }

    #[test]
    fn policy_round_trip_across_commits() {
        let store = TreeStore::new();

        let txn = write_txn(&store);
        store.upsert_policy(txn, "p.rego", b"B1".to_vec()).unwrap();
        store.commit(txn).unwrap();

        let txn = write_txn(&store);
        store.upsert_policy(txn, "p.rego", b"B2".to_vec()).unwrap();
        store.commit(txn).unwrap();

        let txn = read_txn(&store);
        assert_eq!(store.list_policies(txn).unwrap(), vec!["p.rego".to_owned()]);
        assert_eq!(store.get_policy(txn, "p.rego").unwrap(), b"B2");
    }

    #[test]
    fn pending_policy_visible_in_transaction() {
        let store = TreeStore::new();
        let txn = write_txn(&store);
        store.upsert_policy(txn, "q.rego", b"pkg".to_vec()).unwrap();
        assert_eq!(store.get_policy(txn, "q.rego").unwrap(), b"pkg");

        store.delete_policy(txn, "q.rego").unwrap();
        assert!(store.get_policy(txn, "q.rego").unwrap_err().is_not_found());
        store.abort(txn);
    }

    #[test]
    fn deleted_policy_gone_after_commit() {
        let store = TreeStore::new();
        let txn = write_txn(&store);
        store.upsert_policy(txn, "p", b"x".to_vec()).unwrap();
        store.commit(txn).unwrap();

        let txn = write_txn(&store);
        store.delete_policy(txn, "p").unwrap();
        store.commit(txn).unwrap();

        let txn = read_txn(&store);
        assert!(store.get_policy(txn, "p").unwrap_err().is_not_found());
        assert!(store.list_policies(txn).unwrap().is_empty());
    }

    #[test]
    fn triggers_fire_with_update_events() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        let store = TreeStore::new();

        let txn = write_txn(&store);
        store
            .register_trigger(
                txn,
                TriggerConfig::new(|event| {
                    assert_eq!(event.data.len(), 1);
                    assert_eq!(event.data[0].path.to_string(), "/a");
                    assert!(!event.data[0].removed);
                    assert_eq!(event.policy.len(), 1);
                    assert_eq!(event.policy[0].id, "p.rego");
                    assert_eq!(event.policy[0].data.as_deref(), Some(&b"bytes"[..]));
                    SEEN.fetch_add(1, Ordering::Relaxed);
                }),
            )
            .unwrap();
        store.commit(txn).unwrap();

        let txn = write_txn(&store);
        store
            .write(txn, PatchOp::Add, &path("/a"), Value::Int(1))
            .unwrap();
        store
            .upsert_policy(txn, "p.rego", b"bytes".to_vec())
            .unwrap();
        store.commit(txn).unwrap();

        assert_eq!(SEEN.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn trigger_registration_requires_write_txn() {
        let store = TreeStore::new();
        let txn = read_txn(&store);
        let err = store
            .register_trigger(txn, TriggerConfig::new(|_| {}))
            .unwrap_err();
        assert_eq!(err.kind(), poldb_error::ErrorKind::InvalidTransaction);
        store.abort(txn);
    }

    #[test]
    fn unregistered_trigger_stops_firing() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);
        let store = TreeStore::new();

        let txn = write_txn(&store);
        let handle = store
            .register_trigger(
                txn,
                TriggerConfig::new(|_| {
                    SEEN.fetch_add(1, Ordering::Relaxed);
                }),
            )
            .unwrap();
        store.commit(txn).unwrap();

        let txn = write_txn(&store);
        store
            .write(txn, PatchOp::Add, &path("/a"), Value::Int(1))
            .unwrap();
        store.commit(txn).unwrap();
        assert_eq!(SEEN.load(Ordering::Relaxed), 1);

        let txn = write_txn(&store);
        store.unregister_trigger(txn, handle).unwrap();
        store
            .write(txn, PatchOp::Add, &path("/b"), Value::Int(2))
            .unwrap();
        store.commit(txn).unwrap();
        assert_eq!(SEEN.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn read_commit_is_a_no_op() {
        let store = TreeStore::new();
        let txn = read_txn(&store);
        store.commit(txn).unwrap();
        // Gate was never held.
        let txn = write_txn(&store);
        store.abort(txn);
    }
}
