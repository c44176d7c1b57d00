use std::any::{type_name, Any};
use std::sync::Arc;

use crate::error::StorageError;

/// A value held in session storage.
pub type Attribute = Arc<dyn Any + Send + Sync>;

/// Session-scoped key/value storage with attribute-level granularity.
///
/// ## Write-back semantics
///
/// `get` hands out a shared handle. Values that are copied out, modified and
/// meant to persist (the flow stack is the main example) must be written back
/// with `put`; implementations that serialize attributes only see what was
/// `put`.
///
/// ## Thread Safety
///
/// Concurrent requests of one session share the store, so implementations must
/// be `Send + Sync`. Individual calls are atomic; sequences of calls are not.
pub trait SessionStore: Send + Sync {
    /// Identifier of the session this store belongs to.
    fn id(&self) -> &str;

    /// Read an attribute. `Ok(None)` when absent.
    fn get(&self, key: &str) -> Result<Option<Attribute>, StorageError>;

    /// Store an attribute, returning the previous value if any.
    fn put(&self, key: &str, value: Attribute) -> Result<Option<Attribute>, StorageError>;

    /// Remove an attribute, returning it if it was present.
    fn remove(&self, key: &str) -> Result<Option<Attribute>, StorageError>;

    /// All attribute keys currently stored, in no particular order.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Drop every attribute and refuse further access.
    ///
    /// Calling `invalidate` twice returns `Err(StorageError::Invalidated)`.
    fn invalidate(&self) -> Result<(), StorageError>;

    /// Whether `key` is present.
    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Typed access on top of [`SessionStore`].
pub trait SessionStoreExt: SessionStore {
    /// Read an attribute and downcast it to `T`.
    ///
    /// Returns `Err(StorageError::TypeMismatch)` when the attribute exists
    /// under another type.
    fn get_typed<T: Any + Send + Sync>(&self, key: &str) -> Result<Option<Arc<T>>, StorageError> {
        match self.get(key)? {
            None => Ok(None),
            Some(attr) => attr
                .downcast::<T>()
                .map(Some)
                .map_err(|_| StorageError::TypeMismatch {
                    key: key.to_string(),
                    expected: type_name::<T>(),
                }),
        }
    }

    /// Store `value` under `key`, discarding the previous attribute.
    fn put_typed<T: Any + Send + Sync>(&self, key: &str, value: T) -> Result<(), StorageError> {
        self.put(key, Arc::new(value))?;
        Ok(())
    }

    /// Store an already shared value under `key`.
    fn put_shared<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>) -> Result<(), StorageError> {
        self.put(key, value)?;
        Ok(())
    }
}

impl<S: SessionStore + ?Sized> SessionStoreExt for S {}
