//! Conformance test suite for `SessionStore` implementations.
//!
//! Any session backend can run this suite to check that it behaves the way
//! the flow machinery expects. The suite covers:
//!
//! - **Attributes**: put/get/remove/keys round trips and replacement
//! - **Typed access**: downcasting and type mismatch reporting
//! - **Lifecycle**: invalidation clears state and rejects further access
//! - **Concurrency**: parallel writers on distinct and shared keys
//!
//! # Usage
//!
//! ```ignore
//! use faces_storage::conformance::run_conformance_suite;
//!
//! #[test]
//! fn redis_conformance() {
//!     let report = run_conformance_suite(|| create_test_redis_session());
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod attributes;
mod concurrent;
mod lifecycle;
mod typed;

use std::fmt;

use crate::SessionStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "attributes", "lifecycle").
    pub category: String,
    /// Test name.
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a session backend.
///
/// `factory` is called once per test and must return a fresh, empty,
/// valid session.
pub fn run_conformance_suite<S, F>(factory: F) -> ConformanceReport
where
    S: SessionStore,
    F: Fn() -> S,
{
    let mut results = Vec::new();

    results.extend(attributes::run_attribute_tests(&factory));
    results.extend(typed::run_typed_tests(&factory));
    results.extend(lifecycle::run_lifecycle_tests(&factory));
    results.extend(concurrent::run_concurrent_tests(&factory));

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn read_u32<S: SessionStore + ?Sized>(store: &S, key: &str) -> Result<Option<u32>, String> {
    let attr = store.get(key).map_err(|e| format!("get {key}: {e}"))?;
    match attr {
        None => Ok(None),
        Some(a) => a
            .downcast_ref::<u32>()
            .copied()
            .map(Some)
            .ok_or_else(|| format!("attribute {key} is not a u32")),
    }
}
