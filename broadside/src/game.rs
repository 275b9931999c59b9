//! Game sessions.
//!
//! A session moves `waiting → setup → playing → finished`, with `finished`
//! reachable from any earlier phase and never left. [`GameSession`] holds
//! the transition rules; [`GameSessions`] persists records and serializes
//! access per game.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GameError;
use crate::locks::{game_key, KeyedLocks};
use crate::storage::{now_millis, Query, Storage, StorageError};

pub const GAMES: &str = "games";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Setup,
    Playing,
    Finished,
}

impl GameStatus {
    pub const ACTIVE: [GameStatus; 3] = [GameStatus::Waiting, GameStatus::Setup, GameStatus::Playing];

    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Waiting => "waiting",
            GameStatus::Setup => "setup",
            GameStatus::Playing => "playing",
            GameStatus::Finished => "finished",
        }
    }

    pub fn is_active(self) -> bool {
        self != GameStatus::Finished
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FinishReason {
    AllSunk,
    Surrender,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seat {
    Player1,
    Player2,
}

impl Seat {
    pub fn other(self) -> Seat {
        match self {
            Seat::Player1 => Seat::Player2,
            Seat::Player2 => Seat::Player1,
        }
    }
}

pub fn generate_game_id() -> String {
    format!("game_{}", Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub game_id: String,
    pub player1: String,
    pub player2: Option<String>,
    pub status: GameStatus,
    pub player1_ready: bool,
    pub player2_ready: bool,
    pub current_turn: Option<String>,
    pub winner: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub created_at: i64,
}

impl GameSession {
    /// New session in `waiting`, seated with its proposer only.
    pub fn new(player1: impl Into<String>) -> Self {
        Self {
            game_id: generate_game_id(),
            player1: player1.into(),
            player2: None,
            status: GameStatus::Waiting,
            player1_ready: false,
            player2_ready: false,
            current_turn: None,
            winner: None,
            finish_reason: None,
            created_at: now_millis(),
        }
    }

    pub fn seat_of(&self, username: &str) -> Option<Seat> {
        if self.player1 == username {
            Some(Seat::Player1)
        } else if self.player2.as_deref() == Some(username) {
            Some(Seat::Player2)
        } else {
            None
        }
    }

    pub fn player(&self, seat: Seat) -> Option<&str> {
        match seat {
            Seat::Player1 => Some(&self.player1),
            Seat::Player2 => self.player2.as_deref(),
        }
    }

    pub fn is_participant(&self, username: &str) -> bool {
        self.seat_of(username).is_some()
    }

    pub fn opponent_of(&self, username: &str) -> Option<&str> {
        self.seat_of(username).and_then(|seat| self.player(seat.other()))
    }

    pub fn is_ready(&self, seat: Seat) -> bool {
        match seat {
            Seat::Player1 => self.player1_ready,
            Seat::Player2 => self.player2_ready,
        }
    }

    /// `waiting → setup` once the invitation is accepted.
    pub fn begin_setup(&mut self, player2: impl Into<String>) -> Result<(), GameError> {
        if self.status != GameStatus::Waiting {
            return Err(GameError::WrongPhase(self.status));
        }
        self.player2 = Some(player2.into());
        self.status = GameStatus::Setup;
        self.player1_ready = false;
        self.player2_ready = false;
        Ok(())
    }

    /// Record readiness; returns true when this call started the battle.
    pub fn mark_ready(&mut self, username: &str) -> Result<bool, GameError> {
        let seat = self.seat_of(username).ok_or(GameError::NotAParticipant)?;
        if self.status != GameStatus::Setup {
            return Err(GameError::WrongPhase(self.status));
        }

        match seat {
            Seat::Player1 => self.player1_ready = true,
            Seat::Player2 => self.player2_ready = true,
        }

        if self.player1_ready && self.player2_ready {
            self.status = GameStatus::Playing;
            self.current_turn = Some(self.player1.clone());
            return Ok(true);
        }
        Ok(false)
    }

    /// Validate that `username` may fire now; returns the shooter's seat.
    pub fn check_turn(&self, username: &str) -> Result<Seat, GameError> {
        if self.status != GameStatus::Playing {
            return Err(GameError::WrongPhase(self.status));
        }
        let seat = self.seat_of(username).ok_or(GameError::NotAParticipant)?;
        if self.current_turn.as_deref() != Some(username) {
            return Err(GameError::NotYourTurn);
        }
        Ok(seat)
    }

    /// Hand the turn to the other player.
    pub fn pass_turn(&mut self) {
        let next = match self.current_turn.as_deref() {
            Some(current) => self.opponent_of(current).map(str::to_string),
            None => None,
        };
        if next.is_some() {
            self.current_turn = next;
        }
    }

    /// Enter `finished`. Later calls keep the first outcome.
    pub fn finish(&mut self, winner: Option<String>, reason: FinishReason) {
        if self.status == GameStatus::Finished {
            return;
        }
        self.status = GameStatus::Finished;
        self.winner = winner;
        self.finish_reason = Some(reason);
        self.current_turn = None;
    }

    /// Concede; returns the winner.
    pub fn surrender(&mut self, username: &str) -> Result<String, GameError> {
        let seat = self.seat_of(username).ok_or(GameError::NotAParticipant)?;
        if !matches!(self.status, GameStatus::Setup | GameStatus::Playing) {
            return Err(GameError::WrongPhase(self.status));
        }
        let winner = self
            .player(seat.other())
            .map(str::to_string)
            .ok_or(GameError::WrongPhase(self.status))?;
        self.finish(Some(winner.clone()), FinishReason::Surrender);
        Ok(winner)
    }
}

/// Persistence and per-game locking for sessions.
pub struct GameSessions {
    storage: Arc<Storage>,
    locks: Arc<KeyedLocks>,
    ttl: Duration,
}

impl GameSessions {
    pub fn new(storage: Arc<Storage>, locks: Arc<KeyedLocks>, ttl: Duration) -> Self {
        Self { storage, locks, ttl }
    }

    /// Run `f` while holding the lock for `game_id`.
    pub fn locked<R>(&self, game_id: &str, f: impl FnOnce() -> R) -> R {
        self.locks.with(&game_key(game_id), f)
    }

    /// Create and persist a new `waiting` session.
    pub fn create(&self, player1: &str) -> Result<GameSession, StorageError> {
        let session = GameSession::new(player1);
        self.storage
            .create(GAMES, &session.game_id, &session, Some(self.ttl))?;
        Ok(session)
    }

    pub fn get(&self, game_id: &str) -> Result<Option<GameSession>, StorageError> {
        self.storage.get(GAMES, game_id)
    }

    /// Load a session that must exist.
    pub fn load(&self, game_id: &str) -> Result<GameSession, GameError> {
        self.get(game_id)?
            .ok_or_else(|| GameError::GameNotFound(game_id.to_string()))
    }

    pub fn save(&self, session: &GameSession) -> Result<(), StorageError> {
        self.storage.update(GAMES, &session.game_id, session)?;
        Ok(())
    }

    /// Remove a session record entirely.
    pub fn discard(&self, game_id: &str) -> Result<bool, StorageError> {
        self.storage.delete(GAMES, game_id)
    }

    /// Non-finished sessions `username` is seated in.
    pub fn find_active(&self, username: &str) -> Result<Vec<GameSession>, StorageError> {
        let statuses = GameStatus::ACTIVE.map(GameStatus::as_str);
        let mut sessions: Vec<GameSession> = self.storage.find(
            GAMES,
            &Query::new().eq("player1", username).in_list("status", statuses),
            usize::MAX,
        )?;
        let as_player2: Vec<GameSession> = self.storage.find(
            GAMES,
            &Query::new().eq("player2", username).in_list("status", statuses),
            usize::MAX,
        )?;
        sessions.extend(as_player2);
        Ok(sessions)
    }

    /// Number of non-finished sessions.
    pub fn count_active(&self) -> Result<u64, StorageError> {
        let statuses = GameStatus::ACTIVE.map(GameStatus::as_str);
        self.storage.count(GAMES, &Query::new().in_list("status", statuses))
    }
}
