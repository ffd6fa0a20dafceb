//! Transaction identity and parameters.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide store id allocator. Each store instance tags its
/// transactions so that a handle presented to the wrong store is rejected
/// instead of silently resolving to an unrelated transaction.
static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh store tag.
#[must_use]
pub fn next_store_id() -> u64 {
    NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle to an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId {
    store: u64,
    xid: u64,
}

impl TxnId {
    /// Construct a handle. Engines call this; callers only receive handles
    /// from [`Store::transaction`](crate::Store::transaction).
    #[must_use]
    pub const fn new(store: u64, xid: u64) -> Self {
        Self { store, xid }
    }

    /// The owning store's tag.
    #[must_use]
    pub const fn store(self) -> u64 {
        self.store
    }

    /// The transaction id, monotonically increasing per store.
    #[must_use]
    pub const fn xid(self) -> u64 {
        self.xid
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.xid)
    }
}

/// Parameters for opening a transaction.
#[derive(Default)]
pub struct TransactionParams {
    /// Whether the transaction may write. Write transactions hold the
    /// store's writer gate until commit or abort.
    pub write: bool,
    /// Opaque caller context, delivered to triggers on commit.
    pub context: Option<TxnContext>,
}

impl TransactionParams {
    /// Parameters for a write transaction.
    #[must_use]
    pub fn write() -> Self {
        Self {
            write: true,
            context: None,
        }
    }

    /// Parameters for a read-only transaction.
    #[must_use]
    pub fn read() -> Self {
        Self::default()
    }

    /// Attach caller context.
    #[must_use]
    pub fn with_context(mut self, context: TxnContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Opaque caller context carried through a transaction and delivered to
/// triggers. The engines never inspect it.
#[derive(Clone, Default)]
pub struct TxnContext {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl TxnContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a keyed payload.
    pub fn put(&mut self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Retrieve a keyed payload, downcast to its concrete type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.entries.get(key).and_then(|v| v.downcast_ref::<T>())
    }
}

impl fmt::Debug for TxnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnContext")
            .field("keys", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
