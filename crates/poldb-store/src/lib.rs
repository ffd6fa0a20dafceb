//! The store contract: one transactional API over both storage engines.
//!
//! A store keeps a single rooted document plus a namespace of named opaque
//! policy blobs. Callers open a transaction, read and write paths, then
//! commit or abort; commit folds pending updates into the committed state
//! and dispatches registered triggers synchronously.

mod blob;
mod gate;
mod trigger;
mod txn;

pub use blob::LazyBlob;
pub use gate::WriterGate;
pub use trigger::{DataEvent, PolicyEvent, TriggerConfig, TriggerEvent, TriggerHandle};
pub use txn::{next_store_id, TransactionParams, TxnContext, TxnId};

use poldb_error::Result;
use poldb_path::Path;
use poldb_types::{PatchOp, Value};

/// The transactional surface every storage engine implements.
///
/// Engines enforce single-writer discipline: at most one write transaction
/// is open at a time, and beginning a second one blocks until the first
/// commits or aborts. Read transactions are never blocked by writers.
pub trait Store: Send + Sync {
    /// Open a transaction. Blocks while another write transaction is open
    /// if `params.write` is set.
    fn transaction(&self, params: TransactionParams) -> Result<TxnId>;

    /// Read the value at `path`. The empty path reads the full document.
    fn read(&self, txn: TxnId, path: &Path) -> Result<Value>;

    /// Buffer a write at `path` in the transaction.
    fn write(&self, txn: TxnId, op: PatchOp, path: &Path, value: Value) -> Result<()>;

    /// Apply the transaction's pending updates to the committed state and
    /// fire triggers. The transaction becomes stale.
    fn commit(&self, txn: TxnId) -> Result<()>;

    /// Discard the transaction. The transaction becomes stale.
    fn abort(&self, txn: TxnId);

    /// Ids of all policies, including this transaction's pending upserts.
    fn list_policies(&self, txn: TxnId) -> Result<Vec<String>>;

    /// The byte payload of the named policy.
    fn get_policy(&self, txn: TxnId, id: &str) -> Result<Vec<u8>>;

    /// Insert or replace the named policy in the transaction.
    fn upsert_policy(&self, txn: TxnId, id: &str, data: Vec<u8>) -> Result<()>;

    /// Remove the named policy in the transaction.
    fn delete_policy(&self, txn: TxnId, id: &str) -> Result<()>;

    /// Register a commit trigger. Requires a write transaction.
    fn register_trigger(&self, txn: TxnId, config: TriggerConfig) -> Result<TriggerHandle>;

    /// Unregister a previously registered trigger. Requires a write
    /// transaction.
    fn unregister_trigger(&self, txn: TxnId, handle: TriggerHandle) -> Result<()>;
}
