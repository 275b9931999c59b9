//! Stored document type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Result, StorageError};

/// A stored document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Collection name.
    pub collection: String,
    /// Document key within the collection.
    pub key: String,
    /// JSON value.
    pub value: serde_json::Value,
    /// Version number (incremented on each update).
    pub version: u64,
    /// Creation timestamp (milliseconds since epoch).
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
    /// Expiry timestamp; fixed at creation, untouched by updates.
    pub expires_at: Option<i64>,
}

impl Document {
    /// Whether the document is past its expiry at `now` (ms since epoch).
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Decode the value into a typed record.
    pub fn get<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| StorageError::Serialization(format!("{}/{}: {}", self.collection, self.key, e)))
    }

    /// Get a string field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.value.get(field).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(expires_at: Option<i64>) -> Document {
        Document {
            collection: "users".into(),
            key: "alice".into(),
            value: serde_json::json!({"username": "alice", "online": true}),
            version: 1,
            created_at: 1_000,
            updated_at: 1_000,
            expires_at,
        }
    }

    #[test]
    fn test_expiry() {
        assert!(!doc(None).is_expired(i64::MAX));
        assert!(!doc(Some(2_000)).is_expired(1_999));
        assert!(doc(Some(2_000)).is_expired(2_000));
    }

    #[test]
    fn test_typed_get() {
        #[derive(Deserialize)]
        struct Named {
            username: String,
        }

        let d = doc(None);
        let named: Named = d.get().unwrap();
        assert_eq!(named.username, "alice");
        assert_eq!(d.get_str("username"), Some("alice"));

        let bad: Result<Vec<u8>> = d.get();
        assert!(matches!(bad, Err(StorageError::Serialization(_))));
    }
}
