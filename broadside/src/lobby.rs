//! Lobby: wires the components together and dispatches client events.
//!
//! The transport hands every decoded frame to [`Lobby::handle`] together
//! with the connection it arrived on. Replies and notifications are queued
//! on connection mailboxes; nothing here awaits.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, debug_span, info, warn};

use crate::arbiter::TurnArbiter;
use crate::board::{standard_factory, BoardFactory};
use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::connection::{generate_connection_id, ConnectionId, ConnectionRegistry};
use crate::disconnect::{Departure, DisconnectCoordinator};
use crate::error::{ErrorKind, GameError, InviteError, RespondError, Result};
use crate::game::{FinishReason, GameSession, GameSessions, GAMES};
use crate::invitation::{Invitation, InvitationBroker, Resolution, INVITATIONS};
use crate::locks::KeyedLocks;
use crate::presence::{canonical_name, PresenceDirectory, User, USERS};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::ratelimit::RateLimiter;
use crate::storage::Storage;

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

const IDLE_BUCKET_AGE: Duration = Duration::from_secs(60);

/// Something worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stat {
    Invitation(&'static str),
    GameFinished(FinishReason),
    Move,
    Rejected(&'static str),
}

/// Point-in-time counts for health and metrics endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyStats {
    pub connections: usize,
    pub users_online: usize,
    pub games_active: u64,
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub invitations_expired: usize,
    pub games_expired: usize,
    pub users_expired: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Lobby {
    config: ServerConfig,
    storage: Arc<Storage>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    presence: Arc<PresenceDirectory>,
    sessions: Arc<GameSessions>,
    broker: Arc<InvitationBroker>,
    arbiter: Arc<TurnArbiter>,
    coordinator: DisconnectCoordinator,
    limiter: RateLimiter,
    #[cfg(feature = "metrics")]
    metrics: Metrics,
}

impl Lobby {
    /// Lobby over an in-memory store with standard boards.
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(Storage::new()), standard_factory())
    }

    /// Lobby over a given store and board factory.
    pub fn with_parts(config: ServerConfig, storage: Arc<Storage>, boards: BoardFactory) -> Result<Self> {
        let locks = Arc::new(KeyedLocks::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(storage.clone()));
        let presence = Arc::new(PresenceDirectory::new(
            storage.clone(),
            registry.clone(),
            broadcaster.clone(),
            locks.clone(),
            config.user_ttl,
        ));
        let sessions = Arc::new(GameSessions::new(storage.clone(), locks.clone(), config.game_ttl));
        let broker = Arc::new(InvitationBroker::new(
            storage.clone(),
            presence.clone(),
            sessions.clone(),
            broadcaster.clone(),
            locks,
            config.invite_ttl,
        ));
        let arbiter = Arc::new(TurnArbiter::new(
            sessions.clone(),
            presence.clone(),
            broadcaster.clone(),
            boards,
        ));
        let coordinator = DisconnectCoordinator::new(
            registry.clone(),
            presence.clone(),
            broker.clone(),
            arbiter.clone(),
            broadcaster.clone(),
        );

        // No connection exists yet, so any record still marked online is stale.
        match presence.mark_all_offline() {
            Ok(0) => {}
            Ok(count) => info!(count, "Marked stale user records offline"),
            Err(e) => warn!(error = %e, "Failed to reset stale user records"),
        }

        Ok(Self {
            limiter: RateLimiter::new(config.rate_limit.clone()),
            config,
            storage,
            registry,
            broadcaster,
            presence,
            sessions,
            broker,
            arbiter,
            coordinator,
            #[cfg(feature = "metrics")]
            metrics: Metrics::new()?,
        })
    }

    // ==================== Connections ====================

    /// Open a connection and return its mailbox.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn = generate_connection_id();
        let rx = self.broadcaster.attach(conn);
        debug!(conn = %conn, "Connection opened");
        (conn, rx)
    }

    /// Tear down a closed connection. Call exactly once, after its last
    /// message has been handled.
    pub fn disconnect(&self, conn: ConnectionId) -> Option<Departure> {
        self.limiter.remove(conn);
        let departure = self.coordinator.handle_disconnect(conn);
        if let Some(departure) = &departure {
            self.record_departure(departure);
        }
        debug!(conn = %conn, "Connection closed");
        departure
    }

    fn record_departure(&self, departure: &Departure) {
        for _ in &departure.expired_invitations {
            self.observe(Stat::Invitation("expired"));
        }
        for _ in &departure.forfeited_games {
            self.observe(Stat::GameFinished(FinishReason::Disconnect));
        }
    }

    // ==================== Dispatch ====================

    /// Rate-limit, decode and dispatch one text frame.
    pub fn handle_text(&self, conn: ConnectionId, text: &str) {
        if !self.limiter.check(conn) {
            self.observe(Stat::Rejected("rate_limited"));
            self.reply(conn, ServerEvent::Error {
                message: "Too many messages, slow down".into(),
            });
            return;
        }

        match ClientEvent::decode(text) {
            Ok(event) => self.handle(conn, event),
            Err(e) => {
                debug!(conn = %conn, error = %e, "Rejected message");
                self.observe(Stat::Rejected("malformed"));
                self.reply(conn, ServerEvent::Error { message: e.to_string() });
            }
        }
    }

    /// Dispatch one decoded event.
    pub fn handle(&self, conn: ConnectionId, event: ClientEvent) {
        let span = debug_span!("event", conn = %conn, event = event.name());
        let _enter = span.enter();

        match event {
            ClientEvent::Register { username } => {
                if let Err(e) = self.presence.register(conn, &username) {
                    log_failure(e.kind(), &e);
                    self.reply(conn, ServerEvent::RegisterError { message: e.to_string() });
                }
            }

            ClientEvent::GetOnlineUsers => match self.presence.list_online() {
                Ok(users) => self.reply(conn, ServerEvent::OnlineUsers { users }),
                Err(e) => {
                    warn!(error = %e, "Failed to list online users");
                    self.reply(conn, ServerEvent::Error {
                        message: "Failed to fetch online users".into(),
                    });
                }
            },

            ClientEvent::Logout => {
                if let Some(departure) = self.coordinator.handle_logout(conn) {
                    self.record_departure(&departure);
                }
                self.reply(conn, ServerEvent::LogoutSuccess {
                    message: "Logged out successfully".into(),
                });
            }

            ClientEvent::SendInvitation { to_username } => {
                let result = self
                    .username(conn)
                    .ok_or(InviteError::NotRegistered)
                    .and_then(|from| self.broker.propose(&from, &to_username));
                match result {
                    Ok(proposal) => {
                        self.observe(Stat::Invitation("sent"));
                        self.reply(conn, ServerEvent::InvitationSent {
                            to_user: proposal.to_user,
                        });
                    }
                    Err(e) => {
                        log_failure(e.kind(), &e);
                        self.reply(conn, ServerEvent::InvitationError { message: e.to_string() });
                    }
                }
            }

            ClientEvent::RespondInvitation { invite_id, response } => {
                let result = self
                    .username(conn)
                    .ok_or(RespondError::NotRegistered)
                    .and_then(|responder| self.broker.respond(&invite_id, &responder, response));
                match result {
                    Ok(Resolution::Accepted(_)) => self.observe(Stat::Invitation("accepted")),
                    Ok(Resolution::Declined { .. }) => self.observe(Stat::Invitation("declined")),
                    Err(e) => {
                        log_failure(e.kind(), &e);
                        self.reply(conn, ServerEvent::InvitationError { message: e.to_string() });
                    }
                }
            }

            ClientEvent::JoinGame { game_id } => {
                if let Some(game) = self.game_op(conn, |user| self.arbiter.join(&game_id, user)) {
                    self.reply(conn, ServerEvent::JoinedGame { game_id: game.game_id });
                }
            }

            ClientEvent::PlaceShip {
                game_id,
                ship,
                origin,
                orientation,
            } => {
                let placed = self.game_op(conn, |user| {
                    self.arbiter.place_ship(&game_id, user, ship, origin, orientation)
                });
                if let Some(placed) = placed {
                    self.reply(conn, ServerEvent::ShipPlaced { ship, placed });
                }
            }

            ClientEvent::PlayerReady { game_id } => {
                self.game_op(conn, |user| self.arbiter.mark_ready(&game_id, user));
            }

            ClientEvent::GameMove { game_id, target } => {
                let outcome = self.game_op(conn, |user| self.arbiter.apply_move(&game_id, user, target));
                if let Some(outcome) = outcome {
                    self.observe(Stat::Move);
                    if outcome.winner.is_some() {
                        self.observe(Stat::GameFinished(FinishReason::AllSunk));
                    }
                }
            }

            ClientEvent::GameOver { game_id, winner } => {
                let conceded = self.game_op(conn, |user| {
                    if canonical_name(&winner) == user {
                        return Err(GameError::ClaimedVictory);
                    }
                    self.arbiter.surrender(&game_id, user)
                });
                if conceded.is_some() {
                    self.observe(Stat::GameFinished(FinishReason::Surrender));
                }
            }

            ClientEvent::Surrender { game_id } => {
                if self
                    .game_op(conn, |user| self.arbiter.surrender(&game_id, user))
                    .is_some()
                {
                    self.observe(Stat::GameFinished(FinishReason::Surrender));
                }
            }
        }
    }

    /// Run a game operation as the connection's user, reporting failures
    /// with `game_error`.
    fn game_op<T>(
        &self,
        conn: ConnectionId,
        op: impl FnOnce(&str) -> std::result::Result<T, GameError>,
    ) -> Option<T> {
        let result = self
            .username(conn)
            .ok_or(GameError::NotRegistered)
            .and_then(|user| op(&user));
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                log_failure(e.kind(), &e);
                self.reply(conn, ServerEvent::GameError { message: e.to_string() });
                None
            }
        }
    }

    fn username(&self, conn: ConnectionId) -> Option<String> {
        self.registry.lookup(conn)
    }

    fn reply(&self, conn: ConnectionId, event: ServerEvent) {
        self.broadcaster.to_connection(conn, event);
    }

    // ==================== Maintenance ====================

    /// Purge expired records and clean up what depended on them.
    pub fn sweep(&self) -> SweepReport {
        // Buckets idle this long are full again.
        self.limiter.cleanup(IDLE_BUCKET_AGE);

        let removed = match self.storage.sweep_expired() {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Expiry sweep failed");
                return SweepReport::default();
            }
        };

        let mut invitations: Vec<Invitation> = Vec::new();
        let mut games: Vec<GameSession> = Vec::new();
        let mut users: Vec<User> = Vec::new();
        for doc in &removed {
            let decoded = match doc.collection.as_str() {
                INVITATIONS => doc.get::<Invitation>().map(|inv| invitations.push(inv)),
                GAMES => doc.get::<GameSession>().map(|game| games.push(game)),
                USERS => doc.get::<User>().map(|user| users.push(user)),
                _ => Ok(()),
            };
            if let Err(e) = decoded {
                warn!(collection = %doc.collection, key = %doc.key, error = %e, "Undecodable expired record");
            }
        }

        let report = SweepReport {
            invitations_expired: self.broker.on_expired(&invitations),
            games_expired: self.arbiter.on_expired(&games),
            users_expired: users.len(),
        };
        for departure in self.coordinator.on_expired(&users) {
            self.record_departure(&departure);
        }

        for _ in 0..report.invitations_expired {
            self.observe(Stat::Invitation("expired"));
        }
        if !report.is_empty() {
            info!(
                invitations = report.invitations_expired,
                games = report.games_expired,
                users = report.users_expired,
                "Expired records swept"
            );
        }
        report
    }

    pub fn stats(&self) -> LobbyStats {
        LobbyStats {
            connections: self.broadcaster.count(),
            users_online: self.registry.count(),
            games_active: self.sessions.count_active().unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count active games");
                0
            }),
        }
    }

    #[cfg(feature = "metrics")]
    pub fn render_metrics(&self) -> String {
        self.metrics.update(&self.stats());
        self.metrics.gather()
    }

    fn observe(&self, stat: Stat) {
        #[cfg(feature = "metrics")]
        self.metrics.observe(stat);
        #[cfg(not(feature = "metrics"))]
        let _ = stat;
    }

    // ==================== Accessors ====================

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn presence(&self) -> &PresenceDirectory {
        &self.presence
    }

    pub fn broker(&self) -> &InvitationBroker {
        &self.broker
    }

    pub fn sessions(&self) -> &GameSessions {
        &self.sessions
    }

    pub fn arbiter(&self) -> &TurnArbiter {
        &self.arbiter
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

fn log_failure(kind: ErrorKind, error: &dyn std::fmt::Display) {
    match kind {
        ErrorKind::Unavailable => warn!(error = %error, "Operation failed"),
        _ => debug!(error = %error, "Request rejected"),
    }
}
