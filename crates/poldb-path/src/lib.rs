//! Storage paths with segment interning.
//!
//! A [`Path`] addresses a node in the rooted document: an ordered sequence of
//! string segments, the empty sequence being the root. Segments are interned
//! through a bounded process-wide table so that equality checks on hot lookup
//! paths reduce to pointer identity.

mod intern;
mod path;

pub use intern::{intern_segment, InternedStr, MAX_INTERNED_SEGMENT_LEN};
pub use path::Path;
