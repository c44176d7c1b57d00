use std::sync::Arc;
use std::thread;

use super::{read_u32, TestResult};
use crate::SessionStore;

/// Number of threads spawned in each test.
const N: u32 = 10;

pub(super) fn run_concurrent_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> S,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "parallel_writers_distinct_keys_all_visible",
            parallel_writers_distinct_keys_all_visible(factory()),
        ),
        TestResult::from_result(
            "concurrent",
            "parallel_writers_same_key_leave_one_value",
            parallel_writers_same_key_leave_one_value(factory()),
        ),
    ]
}

// ── Distinct keys ───────────────────────────────────────────────────────────

fn parallel_writers_distinct_keys_all_visible<S: SessionStore>(store: S) -> Result<(), String> {
    let errors: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..N)
            .map(|i| {
                let store = &store;
                scope.spawn(move || store.put(&format!("key-{i}"), Arc::new(i)).map(|_| ()))
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|h| match h.join() {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("writer thread panicked".to_string()),
            })
            .collect()
    });
    if !errors.is_empty() {
        return Err(format!("writers failed: {errors:?}"));
    }
    for i in 0..N {
        match read_u32(&store, &format!("key-{i}"))? {
            Some(v) if v == i => {}
            other => return Err(format!("key-{i}: expected Some({i}), got {other:?}")),
        }
    }
    Ok(())
}

// ── Same key ────────────────────────────────────────────────────────────────

/// Every writer targets the same key; afterwards exactly one of the written
/// values is present.
fn parallel_writers_same_key_leave_one_value<S: SessionStore>(store: S) -> Result<(), String> {
    thread::scope(|scope| {
        for i in 0..N {
            let store = &store;
            scope.spawn(move || store.put("shared", Arc::new(i)));
        }
    });
    match read_u32(&store, "shared")? {
        Some(v) if v < N => {}
        other => return Err(format!("unexpected shared value {other:?}")),
    }
    let keys = store.keys().map_err(|e| e.to_string())?;
    if keys.len() != 1 {
        return Err(format!("expected exactly one key, got {keys:?}"));
    }
    Ok(())
}
