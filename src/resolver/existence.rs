//! Short-lived cache of positive existence checks.
//!
//! Only "exists" answers are remembered. A "missing" answer is never cached,
//! and deletes invalidate synchronously, so a removed file cannot keep being
//! served past the delete and a restored file is visible on the next check.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::storage::StorageBackend;

pub struct ExistenceCache {
    ttl: Duration,
    seen: DashMap<String, Instant>,
}

impl ExistenceCache {
    /// A zero TTL disables caching entirely
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: DashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Check whether `key` exists, consulting the cache first.
    ///
    /// Storage errors are logged and reported as missing.
    pub async fn exists(&self, storage: &Arc<dyn StorageBackend>, key: &str) -> bool {
        if !self.ttl.is_zero() {
            if let Some(checked_at) = self.seen.get(key) {
                if checked_at.elapsed() < self.ttl {
                    return true;
                }
            }
        }

        match storage.exists(key).await {
            Ok(true) => {
                if !self.ttl.is_zero() {
                    self.seen.insert(key.to_string(), Instant::now());
                }
                true
            }
            Ok(false) => {
                self.seen.remove(key);
                false
            }
            Err(e) => {
                tracing::warn!("Existence check failed for {}: {}", key, e);
                self.seen.remove(key);
                false
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.seen.remove(key);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
