use super::TestResult;
use crate::{SessionStore, SessionStoreExt, StorageError};

pub(super) fn run_typed_tests<S, F>(factory: &F) -> Vec<TestResult>
where
    S: SessionStore,
    F: Fn() -> S,
{
    vec![
        TestResult::from_result(
            "typed",
            "get_typed_downcasts",
            get_typed_downcasts(factory()),
        ),
        TestResult::from_result(
            "typed",
            "get_typed_reports_mismatch",
            get_typed_reports_mismatch(factory()),
        ),
        TestResult::from_result(
            "typed",
            "get_typed_missing_is_none",
            get_typed_missing_is_none(factory()),
        ),
    ]
}

fn get_typed_downcasts<S: SessionStore>(store: S) -> Result<(), String> {
    store
        .put_typed("names", vec!["a".to_string(), "b".to_string()])
        .map_err(|e| e.to_string())?;
    let names = store
        .get_typed::<Vec<String>>("names")
        .map_err(|e| e.to_string())?
        .ok_or("names missing")?;
    if names.as_slice() != ["a", "b"] {
        return Err(format!("unexpected names {names:?}"));
    }
    Ok(())
}

fn get_typed_reports_mismatch<S: SessionStore>(store: S) -> Result<(), String> {
    store.put_typed("n", 5i64).map_err(|e| e.to_string())?;
    match store.get_typed::<String>("n") {
        Err(StorageError::TypeMismatch { key, .. }) if key == "n" => Ok(()),
        Err(other) => Err(format!("expected TypeMismatch, got {other}")),
        Ok(v) => Err(format!("expected TypeMismatch, got Ok({v:?})")),
    }
}

fn get_typed_missing_is_none<S: SessionStore>(store: S) -> Result<(), String> {
    match store.get_typed::<u32>("absent") {
        Ok(None) => Ok(()),
        other => Err(format!("expected Ok(None), got {other:?}")),
    }
}
