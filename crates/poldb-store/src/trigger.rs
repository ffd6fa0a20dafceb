//! Commit triggers and the events delivered to them.

use std::fmt;
use std::sync::Arc;

use poldb_path::Path;
use poldb_types::Value;

use crate::txn::TxnContext;

/// Callback invoked synchronously after every commit.
pub type OnCommit = Arc<dyn Fn(&TriggerEvent) + Send + Sync>;

/// Configuration for a registered trigger.
pub struct TriggerConfig {
    on_commit: OnCommit,
}

impl TriggerConfig {
    /// A trigger invoking `f` after each commit.
    pub fn new(f: impl Fn(&TriggerEvent) + Send + Sync + 'static) -> Self {
        Self {
            on_commit: Arc::new(f),
        }
    }

    /// Invoke the callback.
    pub fn fire(&self, event: &TriggerEvent) {
        (self.on_commit)(event);
    }
}

impl fmt::Debug for TriggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerConfig").finish_non_exhaustive()
    }
}

/// Identifier of a registered trigger, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerHandle(pub(crate) u64);

impl TriggerHandle {
    /// Construct a handle from its raw id. Engines own id allocation.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Everything a trigger learns about one commit.
#[derive(Debug, Default)]
pub struct TriggerEvent {
    /// The committing transaction's caller context, if any.
    pub context: Option<TxnContext>,
    /// Per-update data changes, in the order they were applied.
    pub data: Vec<DataEvent>,
    /// Per-update policy changes.
    pub policy: Vec<PolicyEvent>,
}

impl TriggerEvent {
    /// Whether this commit changed any data path.
    #[must_use]
    pub fn data_changed(&self) -> bool {
        !self.data.is_empty()
    }

    /// Whether this commit changed any policy.
    #[must_use]
    pub fn policy_changed(&self) -> bool {
        !self.policy.is_empty()
    }
}

/// One applied data update.
#[derive(Debug)]
pub struct DataEvent {
    /// The path the update targeted.
    pub path: Path,
    /// The written value; `None` for removals.
    pub data: Option<Value>,
    /// Whether the update removed the path.
    pub removed: bool,
}

/// One applied policy update.
#[derive(Debug)]
pub struct PolicyEvent {
    /// The policy id.
    pub id: String,
    /// The upserted payload; `None` for removals.
    pub data: Option<Vec<u8>>,
    /// Whether the update removed the policy.
    pub removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn trigger_fires() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let config = TriggerConfig::new(|event| {
            assert!(!event.data_changed());
            CALLS.fetch_add(1, Ordering::Relaxed);
        });
        config.fire(&TriggerEvent::default());
        config.fire(&TriggerEvent::default());
        assert_eq!(CALLS.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn event_change_flags() {
        let mut event = TriggerEvent::default();
        assert!(!event.data_changed());
        event.data.push(DataEvent {
            path: Path::root(),
            data: Some(Value::Null),
            removed: false,
        });
        assert!(event.data_changed());

        event.policy.push(PolicyEvent {
            id: "p.rego".to_owned(),
            data: None,
            removed: true,
        });
        assert!(event.policy_changed());
    }

    #[test]
    fn handle_round_trip() {
        let h = TriggerHandle::from_raw(9);
        assert_eq!(h.raw(), 9);
    }
}
