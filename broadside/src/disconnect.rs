//! Disconnect coordinator.
//!
//! Runs once per departing user, whether the socket closed or the client
//! logged out: the presence record goes, pending invitations in either
//! direction expire, and any game in progress is awarded to the opponent.

use std::sync::Arc;

use tracing::{info, warn};

use crate::arbiter::TurnArbiter;
use crate::broadcast::Broadcaster;
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::game::GameSession;
use crate::invitation::{Invitation, InvitationBroker};
use crate::presence::{PresenceDirectory, User};
use crate::protocol::ServerEvent;

pub const SESSION_EXPIRED: &str = "Session expired, please register again";

/// What a departure cleaned up.
#[derive(Debug, Default)]
pub struct Departure {
    pub username: String,
    pub expired_invitations: Vec<Invitation>,
    pub forfeited_games: Vec<GameSession>,
}

pub struct DisconnectCoordinator {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceDirectory>,
    broker: Arc<InvitationBroker>,
    arbiter: Arc<TurnArbiter>,
    broadcaster: Arc<Broadcaster>,
}

impl DisconnectCoordinator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceDirectory>,
        broker: Arc<InvitationBroker>,
        arbiter: Arc<TurnArbiter>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            registry,
            presence,
            broker,
            arbiter,
            broadcaster,
        }
    }

    /// Socket closed. Returns `None` if the connection never registered.
    pub fn handle_disconnect(&self, conn: ConnectionId) -> Option<Departure> {
        self.broadcaster.detach(conn);
        let username = self.registry.unbind(conn)?;
        info!(conn = %conn, username = %username, "Registered connection closed");
        Some(self.depart(username))
    }

    /// Client logged out but keeps its socket.
    pub fn handle_logout(&self, conn: ConnectionId) -> Option<Departure> {
        let username = self.registry.unbind(conn)?;
        info!(conn = %conn, username = %username, "User logged out");
        Some(self.depart(username))
    }

    /// User records purged by TTL. Connections still bound to them are told
    /// to register again and their departures are reconciled.
    pub fn on_expired(&self, users: &[User]) -> Vec<Departure> {
        self.presence
            .on_expired(users)
            .into_iter()
            .map(|user| {
                self.broadcaster.to_connection(
                    user.connection_id,
                    ServerEvent::Error {
                        message: SESSION_EXPIRED.into(),
                    },
                );
                self.reconcile(user.username.clone())
            })
            .collect()
    }

    fn depart(&self, username: String) -> Departure {
        if let Err(e) = self.presence.unregister(&username) {
            warn!(username = %username, error = %e, "Failed to remove user record");
        }
        self.reconcile(username)
    }

    /// Expire the user's invitations and forfeit their games.
    fn reconcile(&self, username: String) -> Departure {
        let expired_invitations = match self.broker.expire_for_user(&username) {
            Ok(expired) => expired,
            Err(e) => {
                warn!(username = %username, error = %e, "Failed to expire invitations");
                Vec::new()
            }
        };
        for invitation in &expired_invitations {
            self.broadcaster.to_user(
                invitation.counterparty(&username),
                ServerEvent::InvitationExpired {
                    invite_id: invitation.invite_id.clone(),
                    user: username.clone(),
                },
            );
        }

        let forfeited_games = match self.arbiter.forfeit_all(&username) {
            Ok(games) => games,
            Err(e) => {
                warn!(username = %username, error = %e, "Failed to forfeit games");
                Vec::new()
            }
        };

        Departure {
            username,
            expired_invitations,
            forfeited_games,
        }
    }
}
