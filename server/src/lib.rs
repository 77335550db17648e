//! # Match Server Library
//!
//! This library provides the simulation core of a multiplayer match server.
//! Many independent match instances are advanced in discrete ticks by one
//! scheduler thread, while producers on any thread feed them commands.
//!
//! ## Core Responsibilities
//!
//! ### Deterministic Simulation
//! Each [`Game`] owns its entities, its mode table and its command log.
//! All mutation happens inside [`Game::do_tick`], which runs three phases
//! in a fixed order:
//! - **Dispatch**: drain the inbox and execute every queued command,
//!   including commands enqueued by commands executed in the same phase
//! - **Update**: update enabled entities in insertion order, then the
//!   active mode
//! - **Advance**: increment the tick counter and publish a snapshot
//!
//! ### Command Intake
//! Producers hold a cloned [`CommandSender`]. Sending never blocks and never
//! touches simulation state: the command is stamped with the game and the
//! tick observed at enqueue, then pushed onto an unbounded channel. Each
//! sender keeps its own sends in order.
//!
//! ### Failure Isolation
//! A [`GameTicker`] sweeps every owned game once per loop invocation. An
//! error or panic raised while ticking one game is captured at the sweep
//! boundary, logged, and published on a broadcast channel. The remaining
//! games of the sweep are still ticked and the failing game stays owned.
//!
//! ## Module Organization
//!
//! ### Command Module (`command`)
//! Command and event traits, stamps, game identities and the producer handle.
//!
//! ### Game Module (`game`)
//! The match instance, its tick and the snapshots published to readers.
//!
//! ### Objects Module (`objects`)
//! Insertion-ordered entity container with per-entry enabled flags.
//!
//! ### State Module (`state`)
//! Named simulation modes with enter, update and exit hooks.
//!
//! ### Recorder Module (`recorder`)
//! Append-only log of executed commands for replay and audit.
//!
//! ### Tick Loop and Ticker Modules (`tick_loop`, `ticker`)
//! Fixed-rate loop thread and the multi-game scheduler built on it.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use match_server::{BoxError, Command, Game, GameTicker, Stamp};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Announce(&'static str);
//!
//! impl Command for Announce {
//!     fn execute(&self, game: &mut Game, stamp: Stamp) -> Result<(), BoxError> {
//!         println!("game {} at tick {}: {}", game.id(), stamp.tick, self.0);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Sweep all owned games 30 times per second
//!     let ticker = GameTicker::new(30)?;
//!
//!     let game = Game::new();
//!     let sender = game.sender();
//!     ticker.add(game.into_shared())?;
//!
//!     ticker.start()?;
//!     sender.send(Announce("hello"))?;
//!     std::thread::sleep(Duration::from_millis(100));
//!     ticker.stop();
//!
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod game;
pub mod objects;
pub mod recorder;
pub mod state;
pub mod tick_loop;
pub mod ticker;
pub mod utils;

pub use command::{Command, CommandSender, Event, GameId, Stamp};
pub use config::TickerConfig;
pub use error::{BoxError, ConfigError, GameError, LoopError, TickError, TickerError};
pub use game::{Game, GameSnapshot, ObjectSummary, SharedGame};
pub use objects::{GameObject, GameObjectCollection, ObjectEntry, ObjectId, UpdateContext};
pub use recorder::{CommandRecorder, RecordedCommand};
pub use state::{GameState, ModeId, StateContext, StateMachine};
pub use tick_loop::{TickLoop, MAX_TICK_RATE};
pub use ticker::{FailureSource, GameTicker, SweepReport, TickFailure, TickOutcome};
