//! Error types for Broadside.
//!
//! Each component reports failures through its own enum so the lobby can
//! route them to the matching client event (`register_error`,
//! `invitation_error`, `game_error`). [`BroadsideError`] wraps all of them for
//! callers that only need a single type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::game::GameStatus;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, BroadsideError>;

/// Coarse error class, shared by every component error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or disallowed request.
    Validation,
    /// Referenced entity does not exist (or is not visible to the caller).
    NotFound,
    /// Request collides with existing state.
    Conflict,
    /// Backing store could not complete the operation.
    Unavailable,
}

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("{0}")]
    InvalidName(&'static str),

    #[error("Username '{0}' is already taken")]
    DuplicateName(String),

    #[error("Connection is already registered as '{0}'")]
    AlreadyRegistered(String),

    #[error("Registration failed: {0}")]
    Storage(#[from] StorageError),
}

impl RegisterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName(_) => ErrorKind::Validation,
            Self::DuplicateName(_) | Self::AlreadyRegistered(_) => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Unavailable,
        }
    }
}

#[derive(Error, Debug)]
pub enum InviteError {
    #[error("You must be registered to send invitations")]
    NotRegistered,

    #[error("You cannot invite yourself")]
    SelfInvite,

    #[error("User '{0}' is not online")]
    TargetOffline(String),

    #[error("An invitation to '{0}' is already pending")]
    DuplicatePending(String),

    #[error("User '{0}' is already in a game")]
    Busy(String),

    #[error("Failed to send invitation: {0}")]
    Storage(#[from] StorageError),
}

impl InviteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotRegistered | Self::SelfInvite => ErrorKind::Validation,
            Self::TargetOffline(_) => ErrorKind::NotFound,
            Self::DuplicatePending(_) | Self::Busy(_) => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Unavailable,
        }
    }
}

#[derive(Error, Debug)]
pub enum RespondError {
    #[error("You must be registered to answer invitations")]
    NotRegistered,

    #[error("Invitation not found or expired")]
    NotFound(String),

    #[error("User '{0}' is already in a game")]
    Busy(String),

    #[error("Failed to answer invitation: {0}")]
    Storage(#[from] StorageError),
}

impl RespondError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotRegistered => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Busy(_) => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Unavailable,
        }
    }
}

#[derive(Error, Debug)]
pub enum GameError {
    #[error("You must be registered to play")]
    NotRegistered,

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("You are not a player in this game")]
    NotAParticipant,

    #[error("Game is {0}")]
    WrongPhase(GameStatus),

    #[error("Not your turn")]
    NotYourTurn,

    #[error("Place your whole fleet before readying up")]
    FleetIncomplete,

    #[error("Ships cannot be moved after readying up")]
    AlreadyReady,

    #[error("Invalid move")]
    InvalidMove,

    #[error("The winner is decided by the server")]
    ClaimedVictory,

    #[error("Game update failed: {0}")]
    Storage(#[from] StorageError),
}

impl GameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotRegistered
            | Self::NotAParticipant
            | Self::FleetIncomplete
            | Self::AlreadyReady
            | Self::InvalidMove
            | Self::ClaimedVictory => ErrorKind::Validation,
            Self::GameNotFound(_) => ErrorKind::NotFound,
            Self::WrongPhase(_) | Self::NotYourTurn => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Unavailable,
        }
    }
}

#[derive(Error, Debug)]
pub enum BroadsideError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    Invite(#[from] InviteError),

    #[error(transparent)]
    Respond(#[from] RespondError),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[cfg(feature = "metrics")]
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl BroadsideError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Register(e) => e.kind(),
            Self::Invite(e) => e.kind(),
            Self::Respond(e) => e.kind(),
            Self::Game(e) => e.kind(),
            Self::Protocol { .. } | Self::Serde(_) | Self::Config(_) => ErrorKind::Validation,
            Self::Io(_) | Self::Storage(_) => ErrorKind::Unavailable,
            #[cfg(feature = "metrics")]
            Self::Metrics(_) => ErrorKind::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RegisterError::InvalidName("too short").kind(), ErrorKind::Validation);
        assert_eq!(RegisterError::DuplicateName("alice".into()).kind(), ErrorKind::Conflict);
        assert_eq!(InviteError::TargetOffline("bob".into()).kind(), ErrorKind::NotFound);
        assert_eq!(InviteError::Busy("bob".into()).kind(), ErrorKind::Conflict);
        assert_eq!(GameError::NotYourTurn.kind(), ErrorKind::Conflict);
        assert_eq!(
            GameError::Storage(StorageError::Backend("down".into())).kind(),
            ErrorKind::Unavailable
        );
    }

    #[test]
    fn test_wrapped_kind() {
        let err: BroadsideError = RespondError::NotFound("invite_1".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "Invitation not found or expired");

        let err = BroadsideError::protocol("bad frame");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_wrong_phase_message() {
        let err = GameError::WrongPhase(GameStatus::Finished);
        assert_eq!(err.to_string(), "Game is finished");
    }
}
