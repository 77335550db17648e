//! Error types for the simulation core
//!
//! Contract violations (registration, activation, ticker membership) are
//! returned synchronously to the caller. Failures raised while a Game is
//! being ticked are collected as [`TickError`] at the sweep boundary and
//! never escape the scheduler thread.

use crate::command::GameId;
use crate::objects::ObjectId;
use crate::state::ModeId;
use thiserror::Error;

/// Boxed error returned by user-supplied commands, objects and states
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by [`Game`](crate::game::Game) operations
#[derive(Debug, Error)]
pub enum GameError {
    /// An identifier argument was empty
    #[error("{0} must not be empty")]
    NullArgument(&'static str),
    /// The mode was registered before on this game
    #[error("state '{0}' is already registered")]
    DuplicateState(ModeId),
    /// The mode was never registered on this game
    #[error("state '{0}' was not registered")]
    UnregisteredState(ModeId),
    /// The game's inbox no longer accepts commands
    #[error("game {0} is closed")]
    Closed(GameId),
}

/// Errors returned by [`GameTicker`](crate::ticker::GameTicker) operations
#[derive(Debug, Error)]
pub enum TickerError {
    #[error("game {0} is already owned by this ticker")]
    DuplicateGame(GameId),
    #[error("tick rate must be between 1 and {}", crate::tick_loop::MAX_TICK_RATE)]
    InvalidTickRate,
}

/// A failure raised while ticking a single game instance
#[derive(Debug, Error)]
pub enum TickError {
    #[error("command {command} (stamped at tick {stamped}) failed: {source}")]
    Command {
        command: &'static str,
        stamped: u64,
        #[source]
        source: BoxError,
    },
    #[error("object {object} ({label}) failed to update: {source}")]
    Object {
        object: ObjectId,
        label: String,
        #[source]
        source: BoxError,
    },
    #[error("state '{mode}' failed to update: {source}")]
    State {
        mode: ModeId,
        #[source]
        source: BoxError,
    },
    #[error("tick panicked: {0}")]
    Panicked(String),
}

/// Failures reported by a [`TickLoop`](crate::tick_loop::TickLoop)
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("failed to spawn loop thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to build loop runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("loop callback failed: {0}")]
    Callback(#[source] BoxError),
    #[error("loop callback panicked: {0}")]
    Panicked(String),
}

/// Errors raised while loading a [`TickerConfig`](crate::config::TickerConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("tick_rate must be between 1 and {}", crate::tick_loop::MAX_TICK_RATE)]
    InvalidTickRate,
    #[error("failure_capacity must be greater than 0")]
    InvalidCapacity,
}
