//! Storage backend abstraction for uploaded asset bytes.
//!
//! Objects are addressed by their relative storage path (for example
//! `models/12/4f1c..._hood.glb`). The same path is persisted on the
//! `asset_files` row and appended to the public media prefix when URLs are
//! built, so the mapping from record to bytes stays stable for the lifetime
//! of the record.

mod backend;
mod local;

pub use backend::{namespaces, StorageBackend, StorageError, StorageResult};
pub use local::LocalStorage;
