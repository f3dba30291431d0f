//! Storage backend trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Storage error types
#[derive(Debug)]
pub enum StorageError {
    /// Object not found
    NotFound(String),
    /// IO error
    Io(std::io::Error),
    /// Key escapes the content root or is otherwise malformed
    InvalidKey(String),
    /// Other error
    Other(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(key) => write!(f, "Object not found: {}", key),
            StorageError::Io(e) => write!(f, "IO error: {}", e),
            StorageError::InvalidKey(key) => write!(f, "Invalid storage key: {}", key),
            StorageError::Other(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(e.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Pluggable storage for asset bytes.
///
/// Keys are `/`-separated relative paths. Backends must reject keys that are
/// absolute or climb out of their root.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a whole object
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Write an object, creating intermediate directories as needed
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object. Deleting an absent object succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check if an object exists right now
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get the size of an object without reading it
    async fn size(&self, key: &str) -> StorageResult<u64>;

    /// Open an object for streaming
    async fn get_stream(
        &self,
        key: &str,
    ) -> StorageResult<Box<dyn tokio::io::AsyncRead + Unpin + Send>>;
}

/// Top-level directories under the media root
pub mod namespaces {
    /// 3D model files (GLB/GLTF, converted STEP output)
    pub const MODELS: &str = "models";
    /// Preview images
    pub const IMAGES: &str = "images";
}

/// Validate a relative storage key
pub(crate) fn check_key(key: &str) -> StorageResult<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
