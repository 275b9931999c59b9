//! Presence directory.
//!
//! One [`User`] record per registered username, keyed by the canonical
//! (trimmed, lowercased) name. Records carry the user TTL; a stale record
//! left offline can be reclaimed by a new registration.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::error::RegisterError;
use crate::locks::{user_key, KeyedLocks};
use crate::protocol::ServerEvent;
use crate::storage::{Query, Storage, StorageError};

pub const USERS: &str = "users";

pub const MIN_USERNAME_LEN: usize = 2;
pub const MAX_USERNAME_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub connection_id: ConnectionId,
    pub online: bool,
    pub current_game_id: Option<String>,
}

/// Result of a username availability check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub message: String,
}

/// Canonical form used as the record key.
pub fn canonical_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Canonicalize and validate a requested username.
pub fn normalize_username(raw: &str) -> Result<String, RegisterError> {
    let name = canonical_name(raw);
    let len = name.chars().count();

    if len == 0 {
        return Err(RegisterError::InvalidName("Username is required"));
    }
    if len < MIN_USERNAME_LEN {
        return Err(RegisterError::InvalidName("Username must be at least 2 characters"));
    }
    if len > MAX_USERNAME_LEN {
        return Err(RegisterError::InvalidName("Username must be at most 20 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RegisterError::InvalidName(
            "Username may only contain letters, numbers, underscores and hyphens",
        ));
    }
    Ok(name)
}

pub struct PresenceDirectory {
    storage: Arc<Storage>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    locks: Arc<KeyedLocks>,
    ttl: Duration,
    roster: Mutex<()>,
}

impl PresenceDirectory {
    pub fn new(
        storage: Arc<Storage>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
        locks: Arc<KeyedLocks>,
        ttl: Duration,
    ) -> Self {
        Self {
            storage,
            registry,
            broadcaster,
            locks,
            ttl,
            roster: Mutex::new(()),
        }
    }

    // ==================== Registration ====================

    /// Claim `raw` as the username of `conn`.
    ///
    /// On success the connection is bound, `register_success` is sent to it
    /// and the roster is republished. Nothing is changed on failure.
    pub fn register(&self, conn: ConnectionId, raw: &str) -> Result<User, RegisterError> {
        if let Some(existing) = self.registry.lookup(conn) {
            return Err(RegisterError::AlreadyRegistered(existing));
        }
        let username = normalize_username(raw)?;

        let user = self.locks.with(&user_key(&username), || -> Result<User, RegisterError> {
            if let Some(existing) = self.storage.get::<User>(USERS, &username)? {
                if existing.online {
                    return Err(RegisterError::DuplicateName(username.clone()));
                }
                self.storage.delete(USERS, &username)?;
                debug!(username = %username, "Purged stale offline user record");
            }

            let user = User {
                username: username.clone(),
                connection_id: conn,
                online: true,
                current_game_id: None,
            };
            self.storage.create(USERS, &username, &user, Some(self.ttl))?;
            self.registry.bind(conn, username.clone());
            self.broadcaster.to_connection(
                conn,
                ServerEvent::RegisterSuccess {
                    username: username.clone(),
                },
            );
            Ok(user)
        })?;

        info!(username = %user.username, conn = %conn, "User registered");
        self.publish_roster();
        Ok(user)
    }

    /// Remove a user's record. Returns false if there was none.
    pub fn unregister(&self, username: &str) -> Result<bool, StorageError> {
        let removed = self.locks.with(&user_key(username), || -> Result<Option<User>, StorageError> {
            let Some(user) = self.storage.get::<User>(USERS, username)? else {
                return Ok(None);
            };
            self.storage.delete(USERS, username)?;
            Ok(Some(user))
        })?;

        let Some(user) = removed else {
            return Ok(false);
        };
        self.registry.unbind_if(user.connection_id, username);
        info!(username, "User unregistered");
        self.publish_roster();
        Ok(true)
    }

    // ==================== Lookup ====================

    pub fn get(&self, username: &str) -> Result<Option<User>, StorageError> {
        self.storage.get(USERS, username)
    }

    pub fn is_online(&self, username: &str) -> Result<bool, StorageError> {
        Ok(self.get(username)?.is_some_and(|u| u.online))
    }

    /// Online usernames, ordered by name.
    pub fn list_online(&self) -> Result<Vec<String>, StorageError> {
        let users: Vec<User> = self.storage.find(
            USERS,
            &Query::new().eq("online", true).sort_asc("username"),
            usize::MAX,
        )?;
        Ok(users.into_iter().map(|u| u.username).collect())
    }

    pub fn check_availability(&self, raw: &str) -> Result<Availability, StorageError> {
        let username = match normalize_username(raw) {
            Ok(name) => name,
            Err(e) => {
                return Ok(Availability {
                    available: false,
                    message: e.to_string(),
                })
            }
        };

        let taken = self.is_online(&username)?;
        Ok(Availability {
            available: !taken,
            message: if taken {
                "Username is already taken".into()
            } else {
                "Username is available".into()
            },
        })
    }

    // ==================== Game References ====================

    /// Seat `username` in `game_id` unless they already sit in a live game.
    ///
    /// Check and write happen under the user's lock, so two games racing for
    /// the same player cannot both claim them. `is_live` reports whether the
    /// currently recorded game still counts. Returns false when the user is
    /// busy or has no record.
    pub fn claim_game(
        &self,
        username: &str,
        game_id: &str,
        is_live: impl Fn(&str) -> Result<bool, StorageError>,
    ) -> Result<bool, StorageError> {
        self.locks.with(&user_key(username), || -> Result<bool, StorageError> {
            let Some(mut user) = self.get(username)? else {
                return Ok(false);
            };
            match user.current_game_id.as_deref() {
                Some(current) if current == game_id => return Ok(true),
                Some(current) if is_live(current)? => return Ok(false),
                _ => {}
            }
            user.current_game_id = Some(game_id.to_string());
            self.storage.update(USERS, username, &user)?;
            Ok(true)
        })
    }

    /// Clear `currentGameId` if it still points at `game_id`.
    pub fn clear_game_ref(&self, username: &str, game_id: &str) -> Result<(), StorageError> {
        self.locks.with(&user_key(username), || -> Result<(), StorageError> {
            let Some(mut user) = self.get(username)? else {
                return Ok(());
            };
            if user.current_game_id.as_deref() == Some(game_id) {
                user.current_game_id = None;
                self.storage.update(USERS, username, &user)?;
            }
            Ok(())
        })
    }

    // ==================== Maintenance ====================

    /// Mark every record offline. Run at startup, before any connection exists.
    pub fn mark_all_offline(&self) -> Result<usize, StorageError> {
        let online: Vec<User> = self
            .storage
            .find(USERS, &Query::new().eq("online", true), usize::MAX)?;
        let count = online.len();
        for mut user in online {
            self.locks.with(&user_key(&user.username), || {
                user.online = false;
                self.storage.update(USERS, &user.username, &user)
            })?;
        }
        Ok(count)
    }

    /// Drop bindings for user records that expired in the store. Returns the
    /// users whose connection was still bound.
    pub fn on_expired<'a>(&self, users: &'a [User]) -> Vec<&'a User> {
        let mut unbound = Vec::new();
        let mut changed = false;
        for user in users {
            if self.registry.unbind_if(user.connection_id, &user.username) {
                info!(username = %user.username, "User record expired");
                unbound.push(user);
            }
            changed |= user.online;
        }
        if changed {
            self.publish_roster();
        }
        unbound
    }

    /// Push the current roster to every connection.
    pub fn publish_roster(&self) {
        let _roster = self.roster.lock();
        match self.list_online() {
            Ok(users) => {
                self.broadcaster.to_all(ServerEvent::UsersUpdate { users });
            }
            Err(e) => warn!(error = %e, "Failed to publish roster"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::generate_connection_id;

    struct Fixture {
        storage: Arc<Storage>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
        presence: PresenceDirectory,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(Storage::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(storage.clone()));
        let presence = PresenceDirectory::new(
            storage.clone(),
            registry.clone(),
            broadcaster.clone(),
            Arc::new(KeyedLocks::new()),
            Duration::from_secs(86_400),
        );
        Fixture {
            storage,
            registry,
            broadcaster,
            presence,
        }
    }

    #[test]
    fn test_normalize_username() {
        assert_eq!(normalize_username("  Alice ").unwrap(), "alice");
        assert_eq!(normalize_username("sea_dog-7").unwrap(), "sea_dog-7");
        assert!(matches!(normalize_username("   "), Err(RegisterError::InvalidName(_))));
        assert!(matches!(normalize_username("a"), Err(RegisterError::InvalidName(_))));
        assert!(matches!(normalize_username(&"x".repeat(21)), Err(RegisterError::InvalidName(_))));
        assert!(matches!(normalize_username("bad name"), Err(RegisterError::InvalidName(_))));
        assert!(matches!(normalize_username("émile"), Err(RegisterError::InvalidName(_))));
    }

    #[test]
    fn test_register_binds_and_replies() {
        let f = fixture();
        let conn = generate_connection_id();
        let mut rx = f.broadcaster.attach(conn);

        let user = f.presence.register(conn, "Alice").unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(f.registry.lookup(conn).as_deref(), Some("alice"));

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::RegisterSuccess { username: "alice".into() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::UsersUpdate { users: vec!["alice".into()] }
        );
    }

    #[test]
    fn test_register_duplicate_online_name() {
        let f = fixture();
        let first = generate_connection_id();
        let second = generate_connection_id();

        f.presence.register(first, "alice").unwrap();
        let err = f.presence.register(second, " ALICE ").unwrap_err();
        assert!(matches!(err, RegisterError::DuplicateName(_)));
        assert!(f.registry.lookup(second).is_none());
    }

    #[test]
    fn test_register_twice_on_one_connection() {
        let f = fixture();
        let conn = generate_connection_id();
        f.presence.register(conn, "alice").unwrap();
        assert!(matches!(
            f.presence.register(conn, "bob"),
            Err(RegisterError::AlreadyRegistered(name)) if name == "alice"
        ));
    }

    #[test]
    fn test_register_purges_offline_record() {
        let f = fixture();
        let stale = User {
            username: "alice".into(),
            connection_id: ConnectionId(0),
            online: false,
            current_game_id: Some("game_old".into()),
        };
        f.storage.create(USERS, "alice", &stale, None).unwrap();

        let conn = generate_connection_id();
        let user = f.presence.register(conn, "alice").unwrap();
        assert_eq!(user.connection_id, conn);

        let stored = f.presence.get("alice").unwrap().unwrap();
        assert!(stored.online);
        assert!(stored.current_game_id.is_none());
    }

    #[test]
    fn test_unregister_idempotent() {
        let f = fixture();
        let conn = generate_connection_id();
        f.presence.register(conn, "alice").unwrap();

        assert!(f.presence.unregister("alice").unwrap());
        assert!(!f.presence.unregister("alice").unwrap());
        assert!(f.registry.lookup(conn).is_none());
        assert!(f.presence.list_online().unwrap().is_empty());
    }

    #[test]
    fn test_list_online_sorted() {
        let f = fixture();
        for name in ["carol", "alice", "bob"] {
            f.presence.register(generate_connection_id(), name).unwrap();
        }
        assert_eq!(f.presence.list_online().unwrap(), vec!["alice", "bob", "carol"]);

        assert_eq!(f.presence.mark_all_offline().unwrap(), 3);
        assert!(f.presence.list_online().unwrap().is_empty());
    }

    #[test]
    fn test_game_refs() {
        let f = fixture();
        f.presence.register(generate_connection_id(), "alice").unwrap();

        assert!(f.presence.claim_game("alice", "game_1", |_| Ok(true)).unwrap());
        f.presence.clear_game_ref("alice", "game_2").unwrap();
        assert_eq!(f.presence.get("alice").unwrap().unwrap().current_game_id.as_deref(), Some("game_1"));

        f.presence.clear_game_ref("alice", "game_1").unwrap();
        assert!(f.presence.get("alice").unwrap().unwrap().current_game_id.is_none());

        // Unknown users cannot be seated.
        assert!(!f.presence.claim_game("ghost", "game_1", |_| Ok(false)).unwrap());
    }

    #[test]
    fn test_claim_game_respects_live_game() {
        let f = fixture();
        f.presence.register(generate_connection_id(), "alice").unwrap();

        assert!(f.presence.claim_game("alice", "game_1", |_| Ok(true)).unwrap());
        assert!(f.presence.claim_game("alice", "game_1", |_| Ok(true)).unwrap());
        assert!(!f.presence.claim_game("alice", "game_2", |id| Ok(id == "game_1")).unwrap());
        assert_eq!(f.presence.get("alice").unwrap().unwrap().current_game_id.as_deref(), Some("game_1"));

        // A finished game no longer holds the seat.
        assert!(f.presence.claim_game("alice", "game_2", |_| Ok(false)).unwrap());
        assert_eq!(f.presence.get("alice").unwrap().unwrap().current_game_id.as_deref(), Some("game_2"));
    }

    #[test]
    fn test_check_availability() {
        let f = fixture();
        f.presence.register(generate_connection_id(), "alice").unwrap();

        assert!(!f.presence.check_availability("Alice").unwrap().available);
        assert!(f.presence.check_availability("bob").unwrap().available);
        let invalid = f.presence.check_availability("x").unwrap();
        assert!(!invalid.available);
        assert_eq!(invalid.message, "Username must be at least 2 characters");
    }
}
