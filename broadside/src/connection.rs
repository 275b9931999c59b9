//! Connection registry.
//!
//! Maps live connections to the username they registered under. A
//! connection exists from socket open to socket close; the binding is made
//! on a successful `register` and removed on logout or disconnect.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque handle for one live client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Generate unique connection ID
#[inline]
pub fn generate_connection_id() -> ConnectionId {
    ConnectionId(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Connection → username bindings.
pub struct ConnectionRegistry {
    bindings: DashMap<ConnectionId, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Bind a connection to a username, returning any previous binding.
    pub fn bind(&self, conn: ConnectionId, username: impl Into<String>) -> Option<String> {
        self.bindings.insert(conn, username.into())
    }

    /// Remove and return the binding for a connection.
    pub fn unbind(&self, conn: ConnectionId) -> Option<String> {
        self.bindings.remove(&conn).map(|(_, username)| username)
    }

    /// Remove the binding only if it still points at `username`.
    pub fn unbind_if(&self, conn: ConnectionId, username: &str) -> bool {
        self.bindings.remove_if(&conn, |_, bound| bound == username).is_some()
    }

    pub fn lookup(&self, conn: ConnectionId) -> Option<String> {
        self.bindings.get(&conn).map(|r| r.value().clone())
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.bindings.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_connection_id_unique() {
        let a = generate_connection_id();
        let b = generate_connection_id();
        assert_ne!(a, b);
        assert!(b.0 > a.0);
    }

    #[test]
    fn test_bind_lookup_unbind() {
        let registry = ConnectionRegistry::new();
        let conn = generate_connection_id();

        assert!(registry.lookup(conn).is_none());
        assert!(registry.bind(conn, "alice").is_none());
        assert_eq!(registry.lookup(conn).as_deref(), Some("alice"));
        assert_eq!(registry.count(), 1);

        assert_eq!(registry.unbind(conn).as_deref(), Some("alice"));
        assert!(registry.unbind(conn).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_unbind_if_checks_name() {
        let registry = ConnectionRegistry::new();
        let conn = generate_connection_id();
        registry.bind(conn, "alice");

        assert!(!registry.unbind_if(conn, "bob"));
        assert!(registry.unbind_if(conn, "alice"));
        assert!(registry.lookup(conn).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionId(7).to_string(), "conn-7");
    }
}
