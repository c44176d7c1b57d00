use std::sync::Arc;

use super::TestResult;
use crate::{SessionStore, StorageError};

pub(super) fn run_lifecycle_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> S,
{
    vec![
        TestResult::from_result(
            "lifecycle",
            "invalidate_rejects_access",
            invalidate_rejects_access(factory()),
        ),
        TestResult::from_result(
            "lifecycle",
            "double_invalidate_is_error",
            double_invalidate_is_error(factory()),
        ),
    ]
}

fn expect_invalidated<T: std::fmt::Debug>(
    op: &str,
    result: Result<T, StorageError>,
) -> Result<(), String> {
    match result {
        Err(StorageError::Invalidated { .. }) => Ok(()),
        other => Err(format!("{op}: expected Invalidated, got {other:?}")),
    }
}

fn invalidate_rejects_access<S: SessionStore>(store: S) -> Result<(), String> {
    store.put("k", Arc::new(1u32)).map_err(|e| e.to_string())?;
    store.invalidate().map_err(|e| format!("invalidate: {e}"))?;
    expect_invalidated("get", store.get("k").map(|a| a.is_some()))?;
    expect_invalidated("put", store.put("k", Arc::new(2u32)).map(|a| a.is_some()))?;
    expect_invalidated("remove", store.remove("k").map(|a| a.is_some()))?;
    expect_invalidated("keys", store.keys())?;
    Ok(())
}

fn double_invalidate_is_error<S: SessionStore>(store: S) -> Result<(), String> {
    store.invalidate().map_err(|e| e.to_string())?;
    expect_invalidated("invalidate", store.invalidate())
}
