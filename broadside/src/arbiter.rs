//! Turn arbiter.
//!
//! Drives a session from fleet placement to a result: readiness, turn
//! order, shot resolution and the terminal transition. All work on a game
//! happens under that game's lock, and every state change is saved before
//! the matching event is queued.

use std::sync::Arc;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::board::{AttackResult, BoardFactory, BoardModel, Orientation, Position, ShipKind};
use crate::broadcast::Broadcaster;
use crate::error::GameError;
use crate::game::{FinishReason, GameSession, GameSessions, GameStatus, Seat};
use crate::presence::PresenceDirectory;
use crate::protocol::ServerEvent;
use crate::storage::StorageError;

/// Both players' boards for one game.
struct Fleets {
    player1: Box<dyn BoardModel>,
    player2: Box<dyn BoardModel>,
}

impl Fleets {
    fn new(factory: &BoardFactory) -> Self {
        Self {
            player1: factory(),
            player2: factory(),
        }
    }

    fn board(&self, seat: Seat) -> &dyn BoardModel {
        match seat {
            Seat::Player1 => self.player1.as_ref(),
            Seat::Player2 => self.player2.as_ref(),
        }
    }

    fn board_mut(&mut self, seat: Seat) -> &mut Box<dyn BoardModel> {
        match seat {
            Seat::Player1 => &mut self.player1,
            Seat::Player2 => &mut self.player2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Both players are ready; `first_turn` fires first.
    Started { first_turn: String },
    /// Still waiting on the opponent.
    Waiting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub result: AttackResult,
    pub next_turn: Option<String>,
    pub winner: Option<String>,
}

pub struct TurnArbiter {
    sessions: Arc<GameSessions>,
    presence: Arc<PresenceDirectory>,
    broadcaster: Arc<Broadcaster>,
    boards: DashMap<String, Fleets>,
    factory: BoardFactory,
}

impl TurnArbiter {
    pub fn new(
        sessions: Arc<GameSessions>,
        presence: Arc<PresenceDirectory>,
        broadcaster: Arc<Broadcaster>,
        factory: BoardFactory,
    ) -> Self {
        Self {
            sessions,
            presence,
            broadcaster,
            boards: DashMap::new(),
            factory,
        }
    }

    fn fleets(&self, game_id: &str) -> RefMut<'_, String, Fleets> {
        self.boards
            .entry(game_id.to_string())
            .or_insert_with(|| Fleets::new(&self.factory))
    }

    /// Drop the boards of a game that is over or gone.
    pub fn release(&self, game_id: &str) {
        if self.boards.remove(game_id).is_some() {
            debug!(game_id, "Released boards");
        }
    }

    /// Number of games with boards in memory.
    pub fn board_count(&self) -> usize {
        self.boards.len()
    }

    // ==================== Setup ====================

    /// Confirm `username` is seated in `game_id`.
    pub fn join(&self, game_id: &str, username: &str) -> Result<GameSession, GameError> {
        let game = self.sessions.load(game_id)?;
        if !game.is_participant(username) {
            return Err(GameError::NotAParticipant);
        }
        Ok(game)
    }

    /// Position one ship on the caller's board during setup.
    pub fn place_ship(
        &self,
        game_id: &str,
        username: &str,
        ship: ShipKind,
        origin: Position,
        orientation: Orientation,
    ) -> Result<bool, GameError> {
        self.sessions.locked(game_id, || -> Result<bool, GameError> {
            let game = self.sessions.load(game_id)?;
            let seat = game.seat_of(username).ok_or(GameError::NotAParticipant)?;
            if game.status != GameStatus::Setup {
                return Err(GameError::WrongPhase(game.status));
            }
            if game.is_ready(seat) {
                return Err(GameError::AlreadyReady);
            }
            let placed = self
                .fleets(game_id)
                .board_mut(seat)
                .place(ship, origin, orientation);
            Ok(placed)
        })
    }

    /// Mark the caller ready. The second ready player starts the battle.
    pub fn mark_ready(&self, game_id: &str, username: &str) -> Result<ReadyOutcome, GameError> {
        self.sessions.locked(game_id, || -> Result<ReadyOutcome, GameError> {
            let mut game = self.sessions.load(game_id)?;
            let seat = game.seat_of(username).ok_or(GameError::NotAParticipant)?;
            if game.status != GameStatus::Setup {
                return Err(GameError::WrongPhase(game.status));
            }
            let complete = self.fleets(game_id).board(seat).fleet_complete();
            if !complete {
                return Err(GameError::FleetIncomplete);
            }

            let started = game.mark_ready(username)?;
            self.sessions.save(&game)?;

            if started {
                let first_turn = game.current_turn.clone().unwrap_or_else(|| game.player1.clone());
                self.broadcaster.to_game(
                    &game,
                    ServerEvent::GameReady {
                        current_turn: first_turn.clone(),
                        player1: game.player1.clone(),
                        player2: game.player2.clone().unwrap_or_default(),
                    },
                );
                info!(game_id, first_turn = %first_turn, "Battle started");
                return Ok(ReadyOutcome::Started { first_turn });
            }

            if let Some(opponent) = game.opponent_of(username) {
                self.broadcaster.to_user(
                    opponent,
                    ServerEvent::PlayerReadyUpdate {
                        player1_ready: game.player1_ready,
                        player2_ready: game.player2_ready,
                    },
                );
            }
            Ok(ReadyOutcome::Waiting)
        })
    }

    // ==================== Battle ====================

    /// Fire at the opponent's board.
    pub fn apply_move(&self, game_id: &str, username: &str, target: Position) -> Result<MoveOutcome, GameError> {
        self.sessions.locked(game_id, || -> Result<MoveOutcome, GameError> {
            let mut game = self.sessions.load(game_id)?;
            let seat = game.check_turn(username)?;
            let defender = seat.other();

            let (result, fleet_sunk, before) = {
                let mut fleets = self.fleets(game_id);
                let board = fleets.board_mut(defender);
                if !board.contains(target) {
                    return Err(GameError::InvalidMove);
                }
                let before = board.snapshot();
                let result = board.attack(target);
                (result, board.all_sunk(), before)
            };

            game.pass_turn();
            if fleet_sunk {
                game.finish(Some(username.to_string()), FinishReason::AllSunk);
            }

            if let Err(e) = self.sessions.save(&game) {
                if let Some(mut fleets) = self.boards.get_mut(game_id) {
                    *fleets.board_mut(defender) = before;
                }
                return Err(e.into());
            }

            self.broadcaster.to_game(
                &game,
                ServerEvent::MoveMade {
                    target,
                    by_player: username.to_string(),
                    next_turn: game.current_turn.clone(),
                    result: result.outcome(),
                    ship: result.sunk_ship(),
                },
            );
            if fleet_sunk {
                self.conclude(&game);
            }

            Ok(MoveOutcome {
                result,
                next_turn: game.current_turn.clone(),
                winner: game.winner.clone(),
            })
        })
    }

    /// Concede the game to the opponent. Returns the winner.
    pub fn surrender(&self, game_id: &str, username: &str) -> Result<String, GameError> {
        self.sessions.locked(game_id, || -> Result<String, GameError> {
            let mut game = self.sessions.load(game_id)?;
            let winner = game.surrender(username)?;
            self.sessions.save(&game)?;
            self.conclude(&game);
            Ok(winner)
        })
    }

    // ==================== Termination ====================

    /// Finish every active game `username` sits in, awarding it to the
    /// remaining player.
    pub fn forfeit_all(&self, username: &str) -> Result<Vec<GameSession>, StorageError> {
        let mut finished = Vec::new();

        for candidate in self.sessions.find_active(username)? {
            let game_id = candidate.game_id;
            let result = self.sessions.locked(&game_id, || -> Result<Option<GameSession>, GameError> {
                let mut game = match self.sessions.get(&game_id)? {
                    Some(game) if game.status.is_active() && game.is_participant(username) => game,
                    _ => return Ok(None),
                };
                let opponent = game.opponent_of(username).map(str::to_string);
                game.finish(opponent.clone(), FinishReason::Disconnect);
                self.sessions.save(&game)?;

                if let Some(opponent) = &opponent {
                    self.broadcaster
                        .to_user(opponent, ServerEvent::OpponentDisconnected {});
                }
                self.conclude(&game);
                Ok(Some(game))
            });

            match result {
                Ok(Some(game)) => finished.push(game),
                Ok(None) => {}
                Err(e) => warn!(game_id = %game_id, username, error = %e, "Failed to forfeit game"),
            }
        }

        Ok(finished)
    }

    /// Announce the result and tidy up after a game reached `finished`.
    fn conclude(&self, game: &GameSession) {
        if let Some(reason) = game.finish_reason {
            self.broadcaster.to_game(
                game,
                ServerEvent::GameFinished {
                    winner: game.winner.clone(),
                    reason,
                },
            );
        }
        info!(game_id = %game.game_id, winner = ?game.winner, reason = ?game.finish_reason, "Game finished");

        self.release(&game.game_id);
        self.clear_refs(game);
    }

    fn clear_refs(&self, game: &GameSession) {
        let players = std::iter::once(game.player1.as_str()).chain(game.player2.as_deref());
        for player in players {
            if let Err(e) = self.presence.clear_game_ref(player, &game.game_id) {
                warn!(username = player, game_id = %game.game_id, error = %e, "Failed to clear current game");
            }
        }
    }

    /// Clean up after sessions purged from the store by TTL.
    pub fn on_expired(&self, games: &[GameSession]) -> usize {
        for game in games {
            debug!(game_id = %game.game_id, status = %game.status, "Game session expired");
            self.release(&game.game_id);
            self.clear_refs(game);
        }
        games.len()
    }
}
