//! # Broadside
//!
//! Session server for two-player naval combat over WebSocket.
//!
//! ## Features
//!
//! - **Presence**: unique usernames, live roster broadcast
//! - **Invitations**: point-to-point challenges with expiry
//! - **Turn arbitration**: per-game serialized readiness, turns and results
//! - **Disconnect handling**: pending invitations expire, games in progress are forfeited
//!
//! ## Example
//!
//! ```rust,ignore
//! use broadside::ServerBuilder;
//!
//! let server = ServerBuilder::new()
//!     .bind("0.0.0.0:3000")
//!     .build()?;
//!
//! server.run().await?;
//! ```

pub mod arbiter;
pub mod board;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod disconnect;
pub mod error;
pub mod game;
pub mod invitation;
pub mod lobby;
pub mod locks;
pub mod presence;
pub mod protocol;
pub mod ratelimit;
pub mod server;
pub mod storage;
pub mod sweeper;
pub mod telemetry;

#[cfg(feature = "metrics")]
pub mod metrics;

// Re-exports
pub use board::{BoardFactory, BoardModel, StandardBoard};
pub use config::ServerConfig;
pub use connection::ConnectionId;
pub use error::{BroadsideError, ErrorKind, Result};
pub use game::{GameSession, GameStatus};
pub use lobby::{Lobby, LobbyStats, SweepReport};
pub use protocol::{ClientEvent, ServerEvent};
pub use server::{Server, ServerBuilder};
pub use storage::{MemoryBackend, Storage, StorageBackend};
