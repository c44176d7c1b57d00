/// All errors that can be returned by a `SessionStore` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The session was invalidated; no attribute may be read or written.
    #[error("session {session_id} has been invalidated")]
    Invalidated { session_id: String },

    /// The attribute exists but holds a value of another type.
    #[error("session attribute '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    /// A backend-specific storage error (poisoned lock, serialization, etc.).
    #[error("session backend error: {0}")]
    Backend(String),
}
