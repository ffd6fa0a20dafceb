//! Policy sub-store: an interned-id linked list with tombstone reuse.
//!
//! Policies are few and cold compared to data, so a scanned chain with
//! slot reuse beats a hash map on memory. Entries removed by `delete` stay
//! in place as tombstones; the next `upsert` that misses reuses the first
//! removed slot (unlinking it from wherever it sat) and appends it at the
//! tail. Payloads are held compressed and inflated on demand.

use poldb_error::{Result, StoreError};
use poldb_store::LazyBlob;

use crate::symbols::{intern, resolve, Sym};

struct PolicyEntry {
    id: Sym,
    blob: Option<LazyBlob>,
    next: i32,
    removed: bool,
}

/// Chain-linked policy storage.
pub(crate) struct PolicyStore {
    head: i32,
    entries: Vec<PolicyEntry>,
    count: usize,
}

impl PolicyStore {
    pub(crate) fn new() -> Self {
        Self {
            head: -1,
            // Storage is allocated on first upsert; policy-free workloads
            // pay nothing.
            entries: Vec::new(),
            count: 0,
        }
    }

    /// Insert or replace a policy payload.
    pub(crate) fn upsert(&mut self, id: &str, blob: LazyBlob) {
        let id = intern(id);

        let mut curr = self.head;
        while curr >= 0 {
            let entry = &mut self.entries[curr as usize];
            if !entry.removed && entry.id == id {
                entry.blob = Some(blob);
                return;
            }
            curr = entry.next;
        }

        let idx = self.claim_slot();
        {
            let entry = &mut self.entries[idx as usize];
            entry.id = id;
            entry.blob = Some(blob);
            entry.next = -1;
            entry.removed = false;
        }

        // `claim_slot` unlinks a reused slot, so the tail must be re-found
        // from the head (the chain may even have emptied).
        if self.head < 0 {
            self.head = idx;
        } else {
            let mut tail = self.head;
            while self.entries[tail as usize].next >= 0 {
                tail = self.entries[tail as usize].next;
            }
            self.entries[tail as usize].next = idx;
        }

        self.count += 1;
    }

    /// Mark a policy removed. The slot stays chained until reused.
    pub(crate) fn delete(&mut self, id: &str) -> Result<()> {
        let id = intern(id);
        let mut curr = self.head;
        while curr >= 0 {
            let entry = &mut self.entries[curr as usize];
            if !entry.removed && entry.id == id {
                entry.removed = true;
                entry.blob = None;
                self.count -= 1;
                return Ok(());
            }
            curr = entry.next;
        }
        Err(StoreError::not_found(format!(
            "policy id {:?}",
            resolve(id)
        )))
    }

    /// The payload of a live policy.
    pub(crate) fn get(&self, id: &str) -> Result<&LazyBlob> {
        let id = intern(id);
        let mut curr = self.head;
        while curr >= 0 {
            let entry = &self.entries[curr as usize];
            if !entry.removed && entry.id == id {
                return entry
                    .blob
                    .as_ref()
                    .ok_or_else(|| StoreError::internal("live policy with no payload"));
            }
            curr = entry.next;
        }
        Err(StoreError::not_found(format!(
            "policy id {:?}",
            resolve(id)
        )))
    }

    /// Whether a live policy with this id exists.
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.get(id).is_ok()
    }

    /// Ids of all live policies, in chain order.
    pub(crate) fn list(&self) -> Vec<String> {
        if self.count == 0 {
            return Vec::new();
        }
        let mut ids = Vec::with_capacity(self.count);
        let mut curr = self.head;
        while curr >= 0 {
            let entry = &self.entries[curr as usize];
            if !entry.removed {
                ids.push(resolve(entry.id).to_string());
            }
            curr = entry.next;
        }
        ids
    }

    /// Number of live policies.
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    /// Reuse the first removed slot (unlinking it from the chain) or grow
    /// the entry vector.
    fn claim_slot(&mut self) -> i32 {
        if self.entries.is_empty() {
            self.entries.reserve(8);
        }

        if let Some(pos) = self.entries.iter().position(|e| e.removed) {
            let idx = i32::try_from(pos).expect("policy index fits i32");
            self.unlink(idx);
            return idx;
        }

        let idx = i32::try_from(self.entries.len()).expect("policy index fits i32");
        self.entries.push(PolicyEntry {
            id: Sym::EMPTY,
            blob: None,
            next: -1,
            removed: false,
        });
        idx
    }

    /// Remove a slot from the chain, wherever it sits.
    fn unlink(&mut self, idx: i32) {
        let mut prev = -1;
        let mut curr = self.head;
        while curr >= 0 {
            if curr == idx {
                let next = self.entries[curr as usize].next;
                if prev < 0 {
                    self.head = next;
                } else {
                    self.entries[prev as usize].next = next;
                }
                self.entries[curr as usize].next = -1;
                return;
            }
            prev = curr;
            curr = self.entries[curr as usize].next;
        }
    }
}
