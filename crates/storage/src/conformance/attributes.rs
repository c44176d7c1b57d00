use std::sync::Arc;

use super::{read_u32, TestResult};
use crate::SessionStore;

pub(super) fn run_attribute_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> S,
{
    vec![
        TestResult::from_result(
            "attributes",
            "fresh_session_is_empty",
            fresh_session_is_empty(factory()),
        ),
        TestResult::from_result(
            "attributes",
            "put_then_get_returns_value",
            put_then_get_returns_value(factory()),
        ),
        TestResult::from_result(
            "attributes",
            "put_replaces_and_returns_previous",
            put_replaces_and_returns_previous(factory()),
        ),
        TestResult::from_result(
            "attributes",
            "remove_returns_value_and_forgets_key",
            remove_returns_value_and_forgets_key(factory()),
        ),
        TestResult::from_result(
            "attributes",
            "keys_lists_every_attribute",
            keys_lists_every_attribute(factory()),
        ),
    ]
}

fn fresh_session_is_empty<S: SessionStore>(store: S) -> Result<(), String> {
    let keys = store.keys().map_err(|e| format!("keys: {e}"))?;
    if !keys.is_empty() {
        return Err(format!("expected no keys, got {keys:?}"));
    }
    if store.contains("missing").map_err(|e| e.to_string())? {
        return Err("contains reported a missing key".to_string());
    }
    Ok(())
}

fn put_then_get_returns_value<S: SessionStore>(store: S) -> Result<(), String> {
    store.put("count", Arc::new(7u32)).map_err(|e| format!("put: {e}"))?;
    match read_u32(&store, "count")? {
        Some(7) => Ok(()),
        other => Err(format!("expected Some(7), got {other:?}")),
    }
}

fn put_replaces_and_returns_previous<S: SessionStore>(store: S) -> Result<(), String> {
    let first = store.put("k", Arc::new(1u32)).map_err(|e| e.to_string())?;
    if first.is_some() {
        return Err("first put returned a previous value".to_string());
    }
    let previous = store
        .put("k", Arc::new(2u32))
        .map_err(|e| e.to_string())?
        .ok_or("second put returned no previous value")?;
    if previous.downcast_ref::<u32>() != Some(&1) {
        return Err("previous value was not the first one stored".to_string());
    }
    match read_u32(&store, "k")? {
        Some(2) => Ok(()),
        other => Err(format!("expected Some(2), got {other:?}")),
    }
}

fn remove_returns_value_and_forgets_key<S: SessionStore>(store: S) -> Result<(), String> {
    store.put("k", Arc::new(3u32)).map_err(|e| e.to_string())?;
    let removed = store.remove("k").map_err(|e| e.to_string())?;
    if removed.and_then(|a| a.downcast_ref::<u32>().copied()) != Some(3) {
        return Err("remove did not return the stored value".to_string());
    }
    if store.contains("k").map_err(|e| e.to_string())? {
        return Err("key still present after remove".to_string());
    }
    if store.remove("k").map_err(|e| e.to_string())?.is_some() {
        return Err("second remove returned a value".to_string());
    }
    Ok(())
}

fn keys_lists_every_attribute<S: SessionStore>(store: S) -> Result<(), String> {
    for key in ["a", "b", "c"] {
        store.put(key, Arc::new(0u32)).map_err(|e| e.to_string())?;
    }
    let mut keys = store.keys().map_err(|e| e.to_string())?;
    keys.sort();
    if keys != ["a", "b", "c"] {
        return Err(format!("unexpected keys {keys:?}"));
    }
    Ok(())
}
