//! Commands and the inbox that carries them into a game
//!
//! A [`Command`] is a request to mutate one game instance. Producers on any
//! thread hand commands to a [`CommandSender`], which stamps them with the
//! owning game and the tick observed at enqueue time, records them in the
//! game's [`CommandRecorder`] and pushes them onto the game's unbounded
//! inbox. The game drains the inbox on its own tick, so commands only ever
//! execute on the simulation thread.

use crate::error::{BoxError, GameError};
use crate::game::Game;
use crate::recorder::CommandRecorder;
use crate::utils::lock;
use log::trace;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

static NEXT_GAME_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a game instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GameId(u64);

impl GameId {
    pub(crate) fn next() -> Self {
        Self(NEXT_GAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Metadata attached to a command when it is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// Game the command was sent to
    pub game: GameId,
    /// Tick counter observed at enqueue, not at execution
    pub tick: u64,
}

/// A unit of requested mutation, executed exactly once on the simulation thread
///
/// Commands receive exclusive access to the game they were sent to. They may
/// enqueue further commands through [`Game::on_command`]; those run in the
/// same dispatch phase.
pub trait Command: Send + Sync + fmt::Debug + 'static {
    fn execute(&self, game: &mut Game, stamp: Stamp) -> Result<(), BoxError>;

    /// Name used in logs and failure reports
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Notification delivered to a game through [`Game::on_event`]
pub trait Event: Send + fmt::Debug {}

/// A stamped command waiting in a game's inbox
#[derive(Debug)]
pub struct Envelope {
    /// Position of the command in the game's recorder
    pub sequence: u64,
    pub stamp: Stamp,
    pub command: Arc<dyn Command>,
}

/// Cloneable producer handle for a game's inbox
///
/// Safe to use from any thread concurrently with the game's tick. Each
/// sender preserves the order of its own sends; no order is guaranteed
/// between different senders racing on the same tick boundary.
#[derive(Debug, Clone)]
pub struct CommandSender {
    game: GameId,
    tick: Arc<AtomicU64>,
    recorder: Arc<Mutex<CommandRecorder>>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl CommandSender {
    pub(crate) fn new(
        game: GameId,
        tick: Arc<AtomicU64>,
        recorder: Arc<Mutex<CommandRecorder>>,
        tx: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            game,
            tick,
            recorder,
            tx,
        }
    }

    /// Stamps, records and enqueues a command, returning the stamp it received
    pub fn send<C: Command>(&self, command: C) -> Result<Stamp, GameError> {
        self.send_shared(Arc::new(command))
    }

    pub fn send_boxed(&self, command: Box<dyn Command>) -> Result<Stamp, GameError> {
        self.send_shared(Arc::from(command))
    }

    fn send_shared(&self, command: Arc<dyn Command>) -> Result<Stamp, GameError> {
        // Held across the send so recorder order matches inbox order
        let mut recorder = lock(&self.recorder);
        let stamp = Stamp {
            game: self.game,
            tick: self.tick.load(Ordering::Acquire),
        };
        let sequence = recorder.next_sequence();

        self.tx
            .send(Envelope {
                sequence,
                stamp,
                command: Arc::clone(&command),
            })
            .map_err(|_| GameError::Closed(self.game))?;

        trace!("Game {} accepted {} at tick {}", self.game, command.name(), stamp.tick);
        recorder.record(stamp, command);
        Ok(stamp)
    }

    /// Game this sender feeds
    pub fn game(&self) -> GameId {
        self.game
    }

    /// Current tick of the game, as seen by producers
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Returns true once the game has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
