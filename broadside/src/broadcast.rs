//! Outbound delivery.
//!
//! Each live connection owns an unbounded mailbox drained by its socket
//! task. Enqueueing never blocks, so events can be emitted while an entity
//! lock is held and still reach a given connection in emission order.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::ConnectionId;
use crate::game::GameSession;
use crate::presence::{User, USERS};
use crate::protocol::ServerEvent;
use crate::storage::Storage;

pub type Mailbox = mpsc::UnboundedSender<ServerEvent>;

pub struct Broadcaster {
    mailboxes: DashMap<ConnectionId, Mailbox>,
    storage: Arc<Storage>,
}

impl Broadcaster {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            mailboxes: DashMap::new(),
            storage,
        }
    }

    /// Open a mailbox for a new connection.
    pub fn attach(&self, conn: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.insert(conn, tx);
        rx
    }

    pub fn detach(&self, conn: ConnectionId) -> bool {
        self.mailboxes.remove(&conn).is_some()
    }

    /// Number of attached connections.
    pub fn count(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn to_connection(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        match self.mailboxes.get(&conn) {
            Some(mailbox) => mailbox.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver to whichever connection `username` is currently registered on.
    /// Returns false if the user is offline.
    pub fn to_user(&self, username: &str, event: ServerEvent) -> bool {
        let user: Option<User> = match self.storage.get(USERS, username) {
            Ok(user) => user,
            Err(e) => {
                warn!(username, error = %e, "Failed to resolve user for delivery");
                return false;
            }
        };

        match user.filter(|u| u.online) {
            Some(user) => self.to_connection(user.connection_id, event),
            None => {
                debug!(username, "Dropping event for offline user");
                false
            }
        }
    }

    /// Deliver to both participants of a game.
    pub fn to_game(&self, session: &GameSession, event: ServerEvent) {
        self.to_user(&session.player1, event.clone());
        if let Some(player2) = &session.player2 {
            self.to_user(player2, event);
        }
    }

    /// Deliver to every attached connection, registered or not.
    pub fn to_all(&self, event: ServerEvent) -> usize {
        let mut delivered = 0;
        for mailbox in self.mailboxes.iter() {
            if mailbox.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
