//! In-process transactional document store for policy engines.
//!
//! A store keeps a single rooted JSON-like document plus a namespace of
//! named opaque policy blobs, and exposes a small transactional API —
//! begin, read-at-path, write-at-path, commit, abort — with path-indexed
//! updates and synchronous triggers on commit.
//!
//! Two engines implement the same [`Store`] contract:
//!
//! - [`TreeStore`]: the committed document is a value tree; transactions
//!   buffer compacted pending updates and fold them in on commit.
//! - [`ArenaStore`]: the document is a graph of fixed-size nodes in
//!   segmented arena storage with string interning, a freelist, and a
//!   background scavenger.
//!
//! # Example
//!
//! ```
//! use poldb::{Path, PatchOp, Store, TransactionParams, TreeStore};
//!
//! let store = TreeStore::new();
//!
//! let txn = store.transaction(TransactionParams::write())?;
//! let path = Path::parse("/servers").unwrap();
//! let value = poldb::from_json(serde_json::json!([{"id": "s1", "port": 8080}]));
//! store.write(txn, PatchOp::Add, &path, value)?;
//! store.commit(txn)?;
//!
//! let txn = store.transaction(TransactionParams::read())?;
//! let port = store.read(txn, &Path::parse("/servers/0/port").unwrap())?;
//! assert_eq!(port, poldb::Value::Int(8080));
//! # Ok::<(), poldb::StoreError>(())
//! ```

pub use poldb_arena::ArenaStore;
pub use poldb_error::{ErrorKind, Result, StoreError};
pub use poldb_path::{intern_segment, InternedStr, Path};
pub use poldb_store::{
    DataEvent, LazyBlob, PolicyEvent, Store, TransactionParams, TriggerConfig, TriggerEvent,
    TriggerHandle, TxnContext, TxnId,
};
pub use poldb_tree::TreeStore;
pub use poldb_types::{
    from_bool_map, from_int_map, from_json, from_string_map, Array, Object, PatchOp, Value,
};
