//! Pools for transaction-scoped scratch objects.
//!
//! Pools only pay for themselves on large transactions: the path index
//! exists only past the adaptive threshold, and the masking scan buffer is
//! pooled only past its own threshold. Small transactions use stack or
//! plain heap allocation.

use std::collections::HashMap;

use poldb_types::Pool;

/// Pending-update count at which a transaction builds its exact-path index.
pub(crate) const PATH_INDEX_THRESHOLD: usize = 16;

/// Pending-update count above which the masking scan borrows a pooled
/// buffer instead of the inline stack-backed one.
pub(crate) const SCRATCH_POOL_THRESHOLD: usize = 32;

/// Recycled exact-path index maps (`path string -> update position`).
pub(crate) static PATH_INDEX_POOL: Pool<HashMap<String, usize>> = Pool::new(8);

/// Recycled index buffers for collecting masked-update positions.
pub(crate) static SCRATCH_POOL: Pool<Vec<usize>> = Pool::new(8);

/// Take a cleared path index from the pool.
pub(crate) fn acquire_path_index() -> HashMap<String, usize> {
    let mut index = PATH_INDEX_POOL.acquire_with(|| HashMap::with_capacity(32));
    index.clear();
    index
}

/// Return a path index to the pool.
pub(crate) fn release_path_index(mut index: HashMap<String, usize>) {
    index.clear();
    PATH_INDEX_POOL.release(index);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_index_round_trip() {
        let mut index = acquire_path_index();
        index.insert("/a".to_owned(), 0);
        release_path_index(index);

        let index = acquire_path_index();
        assert!(index.is_empty());
    }
}
