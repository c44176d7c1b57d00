use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::error::StorageError;
use crate::traits::{Attribute, SessionStore};

/// In-process session store backed by a `RwLock<HashMap>`.
#[derive(Default)]
pub struct MemorySession {
    id: String,
    attributes: RwLock<HashMap<String, Attribute>>,
    invalidated: AtomicBool,
}

impl MemorySession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: RwLock::new(HashMap::new()),
            invalidated: AtomicBool::new(false),
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    fn check_valid(&self) -> Result<(), StorageError> {
        if self.is_invalidated() {
            return Err(StorageError::Invalidated {
                session_id: self.id.clone(),
            });
        }
        Ok(())
    }

    fn poisoned() -> StorageError {
        StorageError::Backend("session attribute lock poisoned".to_string())
    }
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.attributes.read().map(|a| a.len()).unwrap_or(0);
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("attributes", &len)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

impl SessionStore for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, key: &str) -> Result<Option<Attribute>, StorageError> {
        self.check_valid()?;
        let attrs = self.attributes.read().map_err(|_| Self::poisoned())?;
        Ok(attrs.get(key).cloned())
    }

    fn put(&self, key: &str, value: Attribute) -> Result<Option<Attribute>, StorageError> {
        self.check_valid()?;
        let mut attrs = self.attributes.write().map_err(|_| Self::poisoned())?;
        Ok(attrs.insert(key.to_string(), value))
    }

    fn remove(&self, key: &str) -> Result<Option<Attribute>, StorageError> {
        self.check_valid()?;
        let mut attrs = self.attributes.write().map_err(|_| Self::poisoned())?;
        Ok(attrs.remove(key))
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check_valid()?;
        let attrs = self.attributes.read().map_err(|_| Self::poisoned())?;
        Ok(attrs.keys().cloned().collect())
    }

    fn invalidate(&self) -> Result<(), StorageError> {
        if self.invalidated.swap(true, Ordering::AcqRel) {
            return Err(StorageError::Invalidated {
                session_id: self.id.clone(),
            });
        }
        let mut attrs = self.attributes.write().map_err(|_| Self::poisoned())?;
        attrs.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;
    use crate::SessionStoreExt;

    #[test]
    fn memory_session_passes_conformance() {
        let report = run_conformance_suite(|| MemorySession::new("conformance"));
        assert_eq!(report.failed, 0, "{report}");
        assert!(report.total > 0);
    }

    #[test]
    fn debug_reports_attribute_count() {
        let session = MemorySession::new("s1");
        session.put_typed("a", 1u8).unwrap();
        let rendered = format!("{session:?}");
        assert!(rendered.contains("attributes: 1"));
        assert!(rendered.contains("\"s1\""));
    }
}
