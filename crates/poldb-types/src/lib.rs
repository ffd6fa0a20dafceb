//! Value model and shared helpers for the poldb document store.
//!
//! The internal document is a tagged union ([`Value`]) of JSON-like shapes.
//! External heterogeneous input (`serde_json::Value`) enters through the
//! converter in [`convert`]; the engines only ever see [`Value`].

mod convert;
mod patch;
mod pool;
mod ptr;
mod value;

pub use convert::{
    from_json, from_bool_map, from_int_map, from_string_map, CACHE_RETAIN_MAX,
    STRING_CACHE_THRESHOLD,
};
pub use patch::{apply_patch, parse_array_index, validate_patch_target, PatchOp};
pub use pool::Pool;
pub use ptr::{value_at, value_at_mut};
pub use value::{Array, Object, Value};
