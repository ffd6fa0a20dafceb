//! Process-wide string interning with integer handles.
//!
//! Node storage wants string identity in four bytes, so the arena layers a
//! symbol table over shared strings: a [`Sym`] is an index into a
//! process-lifetime table, and symbol equality is `u32` equality. The
//! table grows monotonically; entries are never reclaimed.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

/// Handle to an interned string. Equality of handles is string equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Sym(u32);

impl Sym {
    /// The empty string, pre-seeded at table slot zero.
    pub(crate) const EMPTY: Sym = Sym(0);

    #[inline]
    pub(crate) const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

struct SymbolTable {
    by_value: HashMap<Arc<str>, u32>,
    by_index: Vec<Arc<str>>,
}

static SYMBOLS: LazyLock<RwLock<SymbolTable>> = LazyLock::new(|| {
    let empty: Arc<str> = Arc::from("");
    let mut by_value = HashMap::with_capacity(256);
    by_value.insert(Arc::clone(&empty), 0);
    RwLock::new(SymbolTable {
        by_value,
        by_index: vec![empty],
    })
});

/// Intern `s`, returning its stable handle.
pub(crate) fn intern(s: &str) -> Sym {
    {
        let table = SYMBOLS.read();
        if let Some(&idx) = table.by_value.get(s) {
            return Sym(idx);
        }
    }

    let mut table = SYMBOLS.write();
    // Double-check under the exclusive lock.
    if let Some(&idx) = table.by_value.get(s) {
        return Sym(idx);
    }
    let idx = u32::try_from(table.by_index.len()).expect("symbol table exhausted u32 indices");
    let value: Arc<str> = Arc::from(s);
    table.by_index.push(Arc::clone(&value));
    table.by_value.insert(value, idx);
    Sym(idx)
}

/// The string behind a handle.
pub(crate) fn resolve(sym: Sym) -> Arc<str> {
    let table = SYMBOLS.read();
    Arc::clone(&table.by_index[sym.raw() as usize])
}
