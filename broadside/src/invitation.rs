//! Invitation broker.
//!
//! A proposal creates a `waiting` game session together with a `pending`
//! invitation that points at it. Accepting seats the recipient and moves the
//! game to `setup`; declining or expiry discards the waiting session.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::error::{InviteError, RespondError};
use crate::game::{GameSession, GameSessions, GameStatus};
use crate::locks::{invite_key, pair_key, KeyedLocks};
use crate::presence::{canonical_name, PresenceDirectory};
use crate::protocol::ServerEvent;
use crate::storage::{now_millis, Query, Storage, StorageError};

pub const INVITATIONS: &str = "invitations";

/// A recipient's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Decline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Expired => "expired",
        }
    }
}

pub fn generate_invite_id() -> String {
    format!("invite_{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub invite_id: String,
    pub from_user: String,
    pub to_user: String,
    pub game_id: String,
    pub status: InvitationStatus,
    pub created_at: i64,
}

impl Invitation {
    pub fn new(from_user: &str, to_user: &str, game_id: &str) -> Self {
        Self {
            invite_id: generate_invite_id(),
            from_user: from_user.to_string(),
            to_user: to_user.to_string(),
            game_id: game_id.to_string(),
            status: InvitationStatus::Pending,
            created_at: now_millis(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == InvitationStatus::Pending
    }

    /// The participant other than `username`.
    pub fn counterparty(&self, username: &str) -> &str {
        if self.from_user == username {
            &self.to_user
        } else {
            &self.from_user
        }
    }
}

/// A successfully sent invitation.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub invite_id: String,
    pub game_id: String,
    pub to_user: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Accepted(GameSession),
    Declined { from_user: String },
}

pub struct InvitationBroker {
    storage: Arc<Storage>,
    presence: Arc<PresenceDirectory>,
    sessions: Arc<GameSessions>,
    broadcaster: Arc<Broadcaster>,
    locks: Arc<KeyedLocks>,
    ttl: Duration,
}

impl InvitationBroker {
    pub fn new(
        storage: Arc<Storage>,
        presence: Arc<PresenceDirectory>,
        sessions: Arc<GameSessions>,
        broadcaster: Arc<Broadcaster>,
        locks: Arc<KeyedLocks>,
        ttl: Duration,
    ) -> Self {
        Self {
            storage,
            presence,
            sessions,
            broadcaster,
            locks,
            ttl,
        }
    }

    // ==================== Propose ====================

    /// Invite `to` to a game. The recipient is notified directly; the caller
    /// reports the outcome to the proposer.
    pub fn propose(&self, from: &str, to: &str) -> Result<Proposal, InviteError> {
        let to = canonical_name(to);
        if to == from {
            return Err(InviteError::SelfInvite);
        }

        self.locks.with(&pair_key(from, &to), || -> Result<Proposal, InviteError> {
            if !self.presence.is_online(&to)? {
                return Err(InviteError::TargetOffline(to.clone()));
            }
            for name in [from, to.as_str()] {
                if self.is_busy(name)? {
                    return Err(InviteError::Busy(name.to_string()));
                }
            }

            let pending = self.storage.count(
                INVITATIONS,
                &Query::new()
                    .eq("fromUser", from)
                    .eq("toUser", to.as_str())
                    .eq("status", InvitationStatus::Pending.as_str()),
            )?;
            if pending > 0 {
                return Err(InviteError::DuplicatePending(to.clone()));
            }

            let game = self.sessions.create(from)?;
            let invitation = Invitation::new(from, &to, &game.game_id);
            if let Err(e) = self
                .storage
                .create(INVITATIONS, &invitation.invite_id, &invitation, Some(self.ttl))
            {
                if let Err(cleanup) = self.sessions.discard(&game.game_id) {
                    warn!(game_id = %game.game_id, error = %cleanup, "Failed to discard orphaned game");
                }
                return Err(e.into());
            }

            // A departure that ran before the insert could not see it.
            let gone = if !self.presence.is_online(&to)? {
                Some(InviteError::TargetOffline(to.clone()))
            } else if !self.presence.is_online(from)? {
                Some(InviteError::NotRegistered)
            } else {
                None
            };
            if let Some(e) = gone {
                if let Err(withdraw) = self.expire_pending(&invitation.invite_id) {
                    warn!(invite_id = %invitation.invite_id, error = %withdraw, "Failed to withdraw invitation");
                }
                return Err(e);
            }

            let delivered = self.broadcaster.to_user(
                &to,
                ServerEvent::InvitationReceived {
                    invite_id: invitation.invite_id.clone(),
                    from_user: from.to_string(),
                    game_id: game.game_id.clone(),
                },
            );
            if !delivered {
                debug!(to = %to, "Invitation recipient went offline before delivery");
            }

            info!(invite_id = %invitation.invite_id, from, to = %to, "Invitation sent");
            Ok(Proposal {
                invite_id: invitation.invite_id,
                game_id: game.game_id,
                to_user: to.clone(),
            })
        })
    }

    /// Whether `username` is seated in a game that has not finished.
    fn is_busy(&self, username: &str) -> Result<bool, StorageError> {
        let Some(game_id) = self.presence.get(username)?.and_then(|u| u.current_game_id) else {
            return Ok(false);
        };
        self.is_live(&game_id)
    }

    fn is_live(&self, game_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .sessions
            .get(game_id)?
            .is_some_and(|game| game.status.is_active()))
    }

    /// Seat both players in `game_id`, or neither.
    fn claim_seats(&self, players: [&str; 2], game_id: &str) -> Result<(), RespondError> {
        let mut claimed = Vec::with_capacity(players.len());
        for name in players {
            let outcome = self.presence.claim_game(name, game_id, |current| self.is_live(current));
            match outcome {
                Ok(true) => claimed.push(name),
                Ok(false) => {
                    self.release_seats(&claimed, game_id);
                    return Err(RespondError::Busy(name.to_string()));
                }
                Err(e) => {
                    self.release_seats(&claimed, game_id);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn release_seats(&self, players: &[&str], game_id: &str) {
        for name in players {
            if let Err(e) = self.presence.clear_game_ref(name, game_id) {
                warn!(username = %name, game_id, error = %e, "Failed to release seat");
            }
        }
    }

    // ==================== Respond ====================

    /// Accept or decline a pending invitation addressed to `responder`.
    pub fn respond(&self, invite_id: &str, responder: &str, decision: Decision) -> Result<Resolution, RespondError> {
        self.locks.with(&invite_key(invite_id), || -> Result<Resolution, RespondError> {
            let mut invitation = self
                .storage
                .get::<Invitation>(INVITATIONS, invite_id)?
                .filter(|inv| inv.to_user == responder && inv.is_pending())
                .ok_or_else(|| RespondError::NotFound(invite_id.to_string()))?;

            match decision {
                Decision::Accept => self.accept(&mut invitation),
                Decision::Decline => self.decline(&mut invitation),
            }
        })
    }

    fn accept(&self, invitation: &mut Invitation) -> Result<Resolution, RespondError> {
        let game_id = invitation.game_id.clone();
        let invite_id = invitation.invite_id.clone();
        let not_found = || RespondError::NotFound(invite_id.clone());

        self.sessions.locked(&game_id, || -> Result<Resolution, RespondError> {
            let mut game = self
                .sessions
                .get(&game_id)?
                .filter(|g| g.status == GameStatus::Waiting)
                .ok_or_else(not_found)?;
            if !self.presence.is_online(&invitation.from_user)? {
                return Err(not_found());
            }
            game.begin_setup(invitation.to_user.as_str()).map_err(|_| not_found())?;

            let (from, to) = (invitation.from_user.clone(), invitation.to_user.clone());
            let players = [from.as_str(), to.as_str()];
            self.claim_seats(players, &game_id)?;

            invitation.status = InvitationStatus::Accepted;
            if let Err(e) = self.storage.update(INVITATIONS, &invitation.invite_id, &*invitation) {
                self.release_seats(&players, &game_id);
                return Err(e.into());
            }
            if let Err(e) = self.sessions.save(&game) {
                invitation.status = InvitationStatus::Pending;
                if let Err(revert) = self.storage.update(INVITATIONS, &invitation.invite_id, &*invitation) {
                    warn!(invite_id = %invitation.invite_id, error = %revert, "Failed to revert invitation");
                }
                self.release_seats(&players, &game_id);
                return Err(e.into());
            }

            self.broadcaster.to_user(
                &invitation.from_user,
                ServerEvent::GameStart {
                    game_id: game_id.clone(),
                    opponent: invitation.to_user.clone(),
                    is_player1: true,
                },
            );
            self.broadcaster.to_user(
                &invitation.to_user,
                ServerEvent::GameStart {
                    game_id: game_id.clone(),
                    opponent: invitation.from_user.clone(),
                    is_player1: false,
                },
            );

            info!(game_id = %game_id, player1 = %game.player1, player2 = %invitation.to_user, "Invitation accepted");
            Ok(Resolution::Accepted(game))
        })
    }

    fn decline(&self, invitation: &mut Invitation) -> Result<Resolution, RespondError> {
        invitation.status = InvitationStatus::Declined;
        self.storage
            .update(INVITATIONS, &invitation.invite_id, &*invitation)?;

        self.discard_waiting(&invitation.game_id);
        self.broadcaster.to_user(
            &invitation.from_user,
            ServerEvent::InvitationDeclined {
                by_user: invitation.to_user.clone(),
            },
        );

        info!(invite_id = %invitation.invite_id, by = %invitation.to_user, "Invitation declined");
        Ok(Resolution::Declined {
            from_user: invitation.from_user.clone(),
        })
    }

    /// Delete the game behind an invitation if nobody has joined it yet.
    fn discard_waiting(&self, game_id: &str) {
        let result = self.sessions.locked(game_id, || -> Result<bool, StorageError> {
            match self.sessions.get(game_id)? {
                Some(game) if game.status == GameStatus::Waiting => self.sessions.discard(game_id),
                _ => Ok(false),
            }
        });
        match result {
            Ok(true) => debug!(game_id, "Discarded waiting game"),
            Ok(false) => {}
            Err(e) => warn!(game_id, error = %e, "Failed to discard waiting game"),
        }
    }

    // ==================== Expiry ====================

    /// Expire every pending invitation sent by or addressed to `username`.
    /// Returns the invitations that were expired.
    pub fn expire_for_user(&self, username: &str) -> Result<Vec<Invitation>, StorageError> {
        let pending = InvitationStatus::Pending.as_str();
        let mut candidates: Vec<Invitation> = self.storage.find(
            INVITATIONS,
            &Query::new().eq("fromUser", username).eq("status", pending),
            usize::MAX,
        )?;
        let addressed: Vec<Invitation> = self.storage.find(
            INVITATIONS,
            &Query::new().eq("toUser", username).eq("status", pending),
            usize::MAX,
        )?;
        candidates.extend(addressed);

        let mut expired = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.expire_pending(&candidate.invite_id) {
                Ok(Some(invitation)) => expired.push(invitation),
                Ok(None) => {}
                Err(e) => warn!(invite_id = %candidate.invite_id, error = %e, "Failed to expire invitation"),
            }
        }

        Ok(expired)
    }

    /// Mark one invitation expired if it is still pending, discarding its
    /// waiting game.
    fn expire_pending(&self, invite_id: &str) -> Result<Option<Invitation>, StorageError> {
        self.locks.with(&invite_key(invite_id), || -> Result<Option<Invitation>, StorageError> {
            let Some(mut invitation) = self
                .storage
                .get::<Invitation>(INVITATIONS, invite_id)?
                .filter(Invitation::is_pending)
            else {
                return Ok(None);
            };
            invitation.status = InvitationStatus::Expired;
            self.storage.update(INVITATIONS, invite_id, &invitation)?;
            self.discard_waiting(&invitation.game_id);
            Ok(Some(invitation))
        })
    }

    /// Handle invitations purged from the store by TTL.
    pub fn on_expired(&self, invitations: &[Invitation]) -> usize {
        let mut count = 0;
        for invitation in invitations.iter().filter(|inv| inv.is_pending()) {
            debug!(invite_id = %invitation.invite_id, "Invitation timed out");
            self.discard_waiting(&invitation.game_id);
            count += 1;
        }
        count
    }

    pub fn get(&self, invite_id: &str) -> Result<Option<Invitation>, StorageError> {
        self.storage.get(INVITATIONS, invite_id)
    }
}
