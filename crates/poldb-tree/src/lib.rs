//! Tree-of-values storage engine.
//!
//! The committed document is a single [`poldb_types::Value`] tree behind a
//! reader/writer lock. Write transactions buffer a compacted set of pending
//! updates (no two pending updates ever overlap) and fold them into the
//! committed tree on commit; read transactions pass straight through to the
//! committed state.
//!
//! Reads do not see a snapshot taken at `transaction()` time: a read
//! transaction observes whatever was committed when each `read` call runs.
//! Writers never block readers except for the brief exclusive section in
//! which a commit swaps updates into the tree.

mod pools;
mod store;
mod txn;
mod update;

pub use store::TreeStore;
