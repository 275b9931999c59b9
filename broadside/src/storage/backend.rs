//! Storage backend implementations.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{now_millis, Document, Query, Result, StorageError};

/// Storage backend trait.
///
/// Expired documents are invisible to every read and write; they are only
/// returned once, by [`StorageBackend::sweep_expired`], when they are purged.
pub trait StorageBackend: Send + Sync {
    /// Get a single document.
    fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Create a document. Fails with `AlreadyExists` if a live one is present.
    fn create(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<Document>;

    /// Replace the value of an existing document, keeping its expiry.
    fn update(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<Document>;

    /// Delete a document.
    fn delete(&self, collection: &str, key: &str) -> Result<bool>;

    /// Query documents in a collection.
    fn query(&self, collection: &str, query: &Query, limit: usize) -> Result<Vec<Document>>;

    /// Count documents matching query.
    fn count(&self, collection: &str, query: &Query) -> Result<u64>;

    /// Purge every expired document and return what was removed.
    fn sweep_expired(&self) -> Result<Vec<Document>>;
}

/// In-memory storage backend.
pub struct MemoryBackend {
    /// collection -> key -> document
    data: DashMap<String, DashMap<String, Document>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let Some(docs) = self.data.get(collection) else {
            return Ok(None);
        };
        let now = now_millis();
        Ok(docs
            .get(key)
            .filter(|doc| !doc.is_expired(now))
            .map(|doc| doc.clone()))
    }

    fn create(
        &self,
        collection: &str,
        key: &str,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<Document> {
        let now = now_millis();
        let doc = Document {
            collection: collection.to_string(),
            key: key.to_string(),
            value,
            version: 1,
            created_at: now,
            updated_at: now,
            expires_at: ttl.map(|ttl| now.saturating_add(ttl.as_millis() as i64)),
        };

        let docs = self.data.entry(collection.to_string()).or_default();
        match docs.entry(key.to_string()) {
            Entry::Occupied(mut existing) => {
                if !existing.get().is_expired(now) {
                    return Err(StorageError::AlreadyExists {
                        collection: collection.to_string(),
                        key: key.to_string(),
                    });
                }
                existing.insert(doc.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(doc.clone());
            }
        }
        Ok(doc)
    }

    fn update(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<Document> {
        let not_found = || StorageError::NotFound {
            collection: collection.to_string(),
            key: key.to_string(),
        };

        let docs = self.data.get(collection).ok_or_else(not_found)?;
        let now = now_millis();
        let mut doc = docs
            .get_mut(key)
            .filter(|doc| !doc.is_expired(now))
            .ok_or_else(not_found)?;

        doc.value = value;
        doc.version += 1;
        doc.updated_at = now;
        Ok(doc.clone())
    }

    fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let Some(docs) = self.data.get(collection) else {
            return Ok(false);
        };
        let now = now_millis();
        Ok(docs.remove(key).is_some_and(|(_, doc)| !doc.is_expired(now)))
    }

    fn query(&self, collection: &str, query: &Query, limit: usize) -> Result<Vec<Document>> {
        let Some(docs) = self.data.get(collection) else {
            return Ok(vec![]);
        };
        let now = now_millis();

        let mut results: Vec<Document> = docs
            .iter()
            .filter(|r| !r.is_expired(now) && query.matches(&r.value))
            .map(|r| r.value().clone())
            .collect();

        results.sort_by(|a, b| query.ordering(&a.value, &b.value).then_with(|| a.key.cmp(&b.key)));
        results.truncate(limit);
        Ok(results)
    }

    fn count(&self, collection: &str, query: &Query) -> Result<u64> {
        let Some(docs) = self.data.get(collection) else {
            return Ok(0);
        };
        let now = now_millis();
        Ok(docs
            .iter()
            .filter(|r| !r.is_expired(now) && query.matches(&r.value))
            .count() as u64)
    }

    fn sweep_expired(&self) -> Result<Vec<Document>> {
        let now = now_millis();
        let mut removed = Vec::new();

        for docs in self.data.iter() {
            let expired: Vec<String> = docs
                .iter()
                .filter(|r| r.is_expired(now))
                .map(|r| r.key().clone())
                .collect();

            for key in expired {
                if let Some((_, doc)) = docs.remove_if(&key, |_, doc| doc.is_expired(now)) {
                    removed.push(doc);
                }
            }
        }

        Ok(removed)
    }
}
