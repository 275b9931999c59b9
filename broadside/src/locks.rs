//! Per-entity serialization.
//!
//! Every mutation of a user, invitation or game runs under the lock for its
//! key, so read-check-write sequences on one entity never interleave. Keys
//! are namespaced (`game:<id>`, `invite:<id>`, `pair:<from>-><to>`,
//! `user:<name>`). When more than one lock is needed they are taken in the
//! order pair, invite, game, user.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

pub fn game_key(game_id: &str) -> String {
    format!("game:{}", game_id)
}

pub fn invite_key(invite_id: &str) -> String {
    format!("invite:{}", invite_id)
}

pub fn pair_key(from: &str, to: &str) -> String {
    format!("pair:{}->{}", from, to)
}

pub fn user_key(username: &str) -> String {
    format!("user:{}", username)
}

/// Keyed mutexes, created on first use.
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// The mutex is dropped from the map again once nobody else holds or
    /// waits on it.
    pub fn with<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock();
            f()
        };

        drop(lock);
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}
