//! The arena engine's store: root index, policies, triggers, scavenger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use poldb_error::{Result, StoreError};
use poldb_path::Path;
use poldb_store::{
    next_store_id, DataEvent, PolicyEvent, Store, TransactionParams, TriggerConfig, TriggerEvent,
    TriggerHandle, TxnId, WriterGate,
};
use poldb_types::{PatchOp, Value};

use crate::arena::Arena;
use crate::policy::PolicyStore;
use crate::symbols::resolve;
use crate::txn::{ArenaTxn, ArenaUpdate};

/// A full scavenger sweep is requested every this many commits.
const SCAVENGE_COMMIT_INTERVAL: u32 = 10;

enum ScavengeCmd {
    Sweep,
    Stop,
}

struct Scavenger {
    tx: mpsc::Sender<ScavengeCmd>,
    join: Option<JoinHandle<()>>,
}

/// In-process store keeping the document as an arena node graph.
pub struct ArenaStore {
    store_id: u64,
    arena: Arc<Arena>,
    /// Index of the root object node; `-1` until the first data write.
    /// Readers briefly take the shared side to sample it; commit takes the
    /// exclusive side around the apply step.
    root_idx: RwLock<i32>,
    policies: RwLock<PolicyStore>,
    triggers: RwLock<HashMap<u64, TriggerConfig>>,
    txns: Mutex<HashMap<u64, Arc<Mutex<ArenaTxn>>>>,
    writer: WriterGate,
    next_xid: AtomicU64,
    next_trigger_id: AtomicU64,
    commit_count: AtomicU32,
    scavenger: Mutex<Option<Scavenger>>,
}

impl ArenaStore {
    /// An empty store. The root node is allocated lazily on the first data
    /// write, so policy-only workloads never touch the arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store_id: next_store_id(),
            arena: Arc::new(Arena::new()),
            root_idx: RwLock::new(-1),
            policies: RwLock::new(PolicyStore::new()),
            triggers: RwLock::new(HashMap::new()),
            txns: Mutex::new(HashMap::new()),
            writer: WriterGate::new(),
            next_xid: AtomicU64::new(0),
            next_trigger_id: AtomicU64::new(0),
            commit_count: AtomicU32::new(0),
            scavenger: Mutex::new(None),
        }
    }

    /// An empty store with a background scavenger ticking at `interval`.
    #[must_use]
    pub fn with_scavenger(interval: Duration) -> Self {
        let store = Self::new();
        store.start_scavenger(interval);
        store
    }

    /// Start the background scavenger worker. No-op when already running.
    pub fn start_scavenger(&self, interval: Duration) {
        let mut guard = self.scavenger.lock();
        if guard.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel();
        let arena = Arc::clone(&self.arena);
        let join = std::thread::Builder::new()
            .name("poldb-scavenger".to_owned())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Ok(ScavengeCmd::Sweep) | Err(RecvTimeoutError::Timeout) => arena.scavenge(),
                    Ok(ScavengeCmd::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .expect("scavenger thread spawns");
        *guard = Some(Scavenger {
            tx,
            join: Some(join),
        });
    }

    /// Stop the background scavenger worker, waiting for it to exit.
    pub fn stop_scavenger(&self) {
        let Some(mut scavenger) = self.scavenger.lock().take() else {
            return;
        };
        let _ = scavenger.tx.send(ScavengeCmd::Stop);
        if let Some(join) = scavenger.join.take() {
            let _ = join.join();
        }
    }

    /// Run one synchronous scavenger sweep. Sweeps are not coordinated
    /// with each other: use either the background worker or manual sweeps,
    /// not both at once.
    pub fn scavenge(&self) {
        self.arena.scavenge();
    }

    /// Nodes currently on the freelist. Quiescent diagnostics only.
    #[must_use]
    pub fn free_nodes(&self) -> usize {
        self.arena.free_count()
    }

    fn txn_state(&self, txn: TxnId) -> Result<Arc<Mutex<ArenaTxn>>> {
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

    fn take_txn(&self, txn: TxnId) -> Result<Arc<Mutex<ArenaTxn>>> {
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

    fn require_write(state: &ArenaTxn, what: &str) -> Result<()> {
        if state.write {
            Ok(())
        } else {
            Err(StoreError::invalid_transaction(format!(
                "{what} requires a write transaction"
            )))
        }
    }

    /// Apply one pending update to the committed graph. The caller holds
    /// the root lock exclusively.
    fn apply_update(&self, root_idx: &mut i32, update: &ArenaUpdate) -> Result<()> {
        if update.path.is_empty() {
            let Some(obj) = update.value.as_object() else {
                return Err(StoreError::RootMustBeObject);
            };
            let new_root = self.arena.load_map(obj);
            let old_root = *root_idx;
            *root_idx = new_root;
            if old_root >= 0 {
                // An older reader may still hold the displaced root, so
                // the subtree is tombstoned for the scavenger instead of
                // freed in place.
                self.arena.tombstone_subtree(old_root);
            }
            return Ok(());
        }

        if *root_idx < 0 {
            let root = self.arena.load_map(&poldb_types::Object::new());
            *root_idx = root;
        }

        if update.remove {
            self.arena.remove_value_at(*root_idx, &update.path)
        } else {
            self.arena
                .set_value_at(*root_idx, &update.path, update.op, &update.value)
        }
    }

    /// Request a sweep: hand it to the background worker when running,
    /// sweep inline otherwise.
    fn request_scavenge(&self) {
        let guard = self.scavenger.lock();
        match guard.as_ref() {
            Some(scavenger) => {
                let _ = scavenger.tx.send(ScavengeCmd::Sweep);
            }
            None => {
                drop(guard);
                self.arena.scavenge();
            }
        }
    }
}

impl Default for ArenaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ArenaStore {
    fn drop(&mut self) {
        self.stop_scavenger();
    }
}

impl Store for ArenaStore {
    fn transaction(&self, params: TransactionParams) -> Result<TxnId> {
        if params.write {
            self.writer.acquire();
        }
        // Sample a consistent root under the shared side of the lock.
        let root_idx = *self.root_idx.read();
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed) + 1;
        let state = ArenaTxn::new(params.write, root_idx, params.context);
        self.txns
            .lock()
            .insert(xid, Arc::new(Mutex::new(state)));
        Ok(TxnId::new(self.store_id, xid))
    }

    fn read(&self, txn: TxnId, path: &Path) -> Result<Value> {
        let state = self.txn_state(txn)?;
        let state = state.lock();
        state.read(&self.arena, path)
    }

    fn write(&self, txn: TxnId, op: PatchOp, path: &Path, value: Value) -> Result<()> {
        let state = self.txn_state(txn)?;
        let mut state = state.lock();
        state.write(&self.arena, op, path, value)
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

        {
            let mut root_idx = self.root_idx.write();
            for update in &state.updates {
                // A pending update can still miss (e.g. removing a path a
                // concurrent-committed state never had); it is skipped, as
                // is its event.
                if self.apply_update(&mut root_idx, update).is_err() {
                    continue;
                }
                if has_triggers {
                    event.data.push(DataEvent {
                        path: update.path.clone(),
                        data: (!update.remove).then(|| update.value.clone()),
                        removed: update.remove,
                    });
                }
            }
        }

        let policy_updates = std::mem::take(&mut state.policies);
        if !policy_updates.is_empty() {
            let mut policies = self.policies.write();
            for update in policy_updates {
                let id = resolve(update.id).to_string();
                if update.remove {
                    // Deleting a policy the committed store never had is a
                    // no-op at commit time.
                    let _ = policies.delete(&id);
                } else if let Some(blob) = &update.blob {
                    policies.upsert(&id, blob.clone());
                }
                if has_triggers {
                    let data = match (&update.remove, &update.blob) {
                        (false, Some(blob)) => match blob.get() {
                            Ok(bytes) => Some(bytes.to_vec()),
                            Err(err) => {
                                drop(policies);
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
            "arena commit applied"
        );

        if has_triggers {
            let triggers = self.triggers.read();
            for trigger in triggers.values() {
                trigger.fire(&event);
            }
        }

        self.writer.release();

        // Periodic sweep keeps memory stable under write-heavy load.
        let commits = self.commit_count.fetch_add(1, Ordering::Relaxed) + 1;
        if commits % SCAVENGE_COMMIT_INTERVAL == 0 {
            self.request_scavenge();
        }
        Ok(())
    }

    fn abort(&self, txn: TxnId) {
        let Ok(state) = self.take_txn(txn) else {
            return;
        };
        let state = state.lock();
        if state.write {
            self.writer.release();
        }
    }

    fn list_policies(&self, txn: TxnId) -> Result<Vec<String>> {
        let state = self.txn_state(txn)?;
        let state = state.lock();
        let policies = self.policies.read();

        let mut ids: Vec<String> = policies
            .list()
            .into_iter()
            .filter(|id| state.policy_update(id).is_none())
            .collect();
        for update in &state.policies {
            if !update.remove {
                ids.push(resolve(update.id).to_string());
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
        Ok(policies.get(id)?.get()?.to_vec())
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
