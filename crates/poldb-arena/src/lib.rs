//! Arena-based storage engine.
//!
//! The document is a graph of fixed-size nodes allocated from segmented
//! arrays and linked by `i32` indices instead of pointers. Objects and
//! arrays are singly-linked chains of child nodes, trading lookup time for
//! compact memory and in-place mutation. Strings are interned into a
//! process-wide symbol table so node-level key comparison is an integer
//! compare.
//!
//! This engine is built for high read throughput over large documents with
//! repeated keys and frequent updates to the same paths. The trade-offs:
//! segments are never returned to the allocator, very small data sets pay
//! proportionally more overhead, and background scavenging costs CPU.
//!
//! Reads are not snapshot-isolated: a transaction pins the root index
//! observed at begin, but in-place node mutation by a later commit can
//! become visible to a reader holding an older root. Removed subtrees are
//! freed eagerly; only a replaced root's subtree is tombstoned, because an
//! older reader may still be walking it — the scavenger reclaims those
//! nodes afterwards.

mod arena;
mod node;
mod policy;
mod store;
mod symbols;
mod txn;

pub use store::ArenaStore;
