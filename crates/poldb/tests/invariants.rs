//! Randomized cross-engine equivalence.
//!
//! Both engines implement one write contract, so any script of patches
//! must leave them with identical documents and identical per-write
//! outcomes. Scripts are chunked into transactions to exercise both the
//! pending-update path and the committed apply path.

use poldb::{
    from_json, ArenaStore, ErrorKind, Path, PatchOp, Store, TransactionParams, TreeStore, Value,
};
use proptest::prelude::*;
use serde_json::json;

const PATHS: &[&str] = &[
    "/a", "/b", "/c", "/a/b", "/a/c", "/a/b/d", "/c/0", "/c/-", "/c/1/x",
];

fn step_strategy() -> impl Strategy<Value = (u8, usize, u8)> {
    (0..3_u8, 0..PATHS.len(), 0..6_u8)
}

fn step_value(tag: u8) -> Value {
    match tag {
        0 => Value::Null,
        1 => Value::Bool(true),
        2 => Value::Int(7),
        3 => from_json(json!({"x": 1})),
        4 => from_json(json!([10, 20])),
        _ => Value::from("s"),
    }
}

fn step_op(tag: u8) -> PatchOp {
    match tag {
        0 => PatchOp::Add,
        1 => PatchOp::Replace,
        _ => PatchOp::Remove,
    }
}

/// Run the script in transactions of up to six writes; record every
/// write's outcome.
fn run_script(store: &dyn Store, steps: &[(u8, usize, u8)]) -> Vec<Result<(), ErrorKind>> {
    let mut log = Vec::with_capacity(steps.len());
    for chunk in steps.chunks(6) {
        let txn = store
            .transaction(TransactionParams::write())
            .expect("write txn opens");
        for &(op, path_idx, value_tag) in chunk {
            let path = Path::parse(PATHS[path_idx]).expect("script path parses");
            let result = store
                .write(txn, step_op(op), &path, step_value(value_tag))
                .map_err(|e| e.kind());
            log.push(result);
        }
        store.commit(txn).expect("commit succeeds");
    }
    log
}

fn read_document(store: &dyn Store) -> Value {
    let txn = store
        .transaction(TransactionParams::read())
        .expect("read txn opens");
    store.read(txn, &Path::root()).expect("root always reads")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn engines_agree_on_outcomes_and_documents(
        steps in prop::collection::vec(step_strategy(), 0..30)
    ) {
        let tree = TreeStore::new();
        let arena = ArenaStore::new();

        let tree_log = run_script(&tree, &steps);
        let arena_log = run_script(&arena, &steps);
        prop_assert_eq!(tree_log, arena_log);

        prop_assert_eq!(read_document(&tree), read_document(&arena));
    }

    #[test]
    fn commit_equals_lifo_replay_of_pending_updates(
        steps in prop::collection::vec(step_strategy(), 1..10)
    ) {
        // Writing a whole script in one transaction and committing must
        // read back the same as writing each chunk through its own
        // committed transaction only when updates do not conflict; what
        // must always hold is that the transaction's own read of the root
        // equals the post-commit read.
        let store = TreeStore::new();
        let txn = store
            .transaction(TransactionParams::write())
            .expect("write txn opens");
        for &(op, path_idx, value_tag) in &steps {
            let path = Path::parse(PATHS[path_idx]).expect("script path parses");
            let _ = store.write(txn, step_op(op), &path, step_value(value_tag));
        }
        let pending_view = store.read(txn, &Path::root()).expect("root reads");
        store.commit(txn).expect("commit succeeds");

        prop_assert_eq!(read_document(&store), pending_view);
    }
}
