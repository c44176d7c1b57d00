//! faces-storage: the session attribute store behind flow stacks and
//! flow-scoped bean maps.
//!
//! Session state is addressed by string keys and holds arbitrary shared
//! values. Nothing here tracks dirtiness: a caller that mutates a value it
//! read out of the store must `put` it back for the change to persist.

pub mod conformance;
mod error;
mod memory;
mod traits;

pub use error::StorageError;
pub use memory::MemorySession;
pub use traits::{Attribute, SessionStore, SessionStoreExt};
