//! Document store for Broadside.
//!
//! Users, invitations and game sessions are kept as JSON documents in named
//! collections, each document optionally carrying an expiry fixed at
//! creation time. The in-memory backend is the default; anything that
//! implements [`StorageBackend`] can be plugged in through
//! [`Storage::with_backend`].
//!
//! ```rust,ignore
//! use broadside::storage::{Query, Storage};
//!
//! let storage = Storage::new();
//! storage.create("users", "alice", &user, Some(Duration::from_secs(86_400)))?;
//! let online: Vec<User> = storage.find("users", &Query::new().eq("online", true), 100)?;
//! ```

mod backend;
mod document;
mod query;

pub use backend::{MemoryBackend, StorageBackend};
pub use document::Document;
pub use query::{Query, QueryOp, SortDir};

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Storage error types.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("document not found: {collection}/{key}")]
    NotFound { collection: String, key: String },

    #[error("document already exists: {collection}/{key}")]
    AlreadyExists { collection: String, key: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Main storage service.
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
}

impl Storage {
    /// Create new storage with in-memory backend.
    pub fn new() -> Self {
        Self {
            backend: Arc::new(MemoryBackend::new()),
        }
    }

    /// Create storage with custom backend.
    pub fn with_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    // ==================== Typed Operations ====================

    /// Get a typed record by key.
    pub fn get<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<Option<T>> {
        self.backend
            .get(collection, key)?
            .map(|doc| doc.get())
            .transpose()
    }

    /// Create a record, optionally expiring `ttl` after creation.
    pub fn create<T: Serialize>(
        &self,
        collection: &str,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<Document> {
        self.backend.create(collection, key, to_value(value)?, ttl)
    }

    /// Overwrite an existing record.
    pub fn update<T: Serialize>(&self, collection: &str, key: &str, value: &T) -> Result<Document> {
        self.backend.update(collection, key, to_value(value)?)
    }

    /// Delete a record.
    pub fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        self.backend.delete(collection, key)
    }

    // ==================== Query Operations ====================

    /// Find typed records matching a query.
    pub fn find<T: DeserializeOwned>(&self, collection: &str, query: &Query, limit: usize) -> Result<Vec<T>> {
        self.backend
            .query(collection, query, limit)?
            .iter()
            .map(Document::get)
            .collect()
    }

    /// Count records matching a query.
    pub fn count(&self, collection: &str, query: &Query) -> Result<u64> {
        self.backend.count(collection, query)
    }

    // ==================== Expiry ====================

    /// Purge expired documents across all collections.
    pub fn sweep_expired(&self) -> Result<Vec<Document>> {
        self.backend.sweep_expired()
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}
