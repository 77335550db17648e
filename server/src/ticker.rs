//! Scheduler that ticks a set of games from one loop thread
//!
//! Every loop invocation runs a sweep: each owned game is ticked once, in
//! the order it was added. A game that fails (by error or panic) is reported
//! on the failure channel and stays owned, so it is ticked again on the next
//! sweep. Membership changes and sweeps share one mutex, so `add` and
//! `remove` wait for an in-progress sweep to finish. Neither locks the game
//! itself, so a caller holding a game's guard can still add or remove it.

use crate::command::GameId;
use crate::config::TickerConfig;
use crate::error::{LoopError, TickError, TickerError};
use crate::game::SharedGame;
use crate::tick_loop::TickLoop;
use crate::utils::{lock, panic_message};
use log::{debug, error, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of the failure channel when none is configured
pub const DEFAULT_FAILURE_CAPACITY: usize = 64;

/// Where a reported failure came from
#[derive(Debug, Clone)]
pub enum FailureSource {
    /// A game failed during its tick
    Game { game: GameId, tick: u64, error: Arc<TickError> },
    /// The loop infrastructure failed: runtime setup, or a sweep that
    /// errored or panicked outside any single game
    Loop(Arc<LoopError>),
}

/// Notification emitted for every failure observed by a ticker
#[derive(Debug, Clone)]
pub struct TickFailure {
    /// Sweep counter at the time of the failure
    pub sweep: u64,
    pub source: FailureSource,
}

impl TickFailure {
    /// Game that failed, if the failure came from a game
    pub fn game(&self) -> Option<GameId> {
        match &self.source {
            FailureSource::Game { game, .. } => Some(*game),
            FailureSource::Loop(_) => None,
        }
    }
}

/// Result of ticking one game during a sweep
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub game: GameId,
    /// Tick the game was on when the sweep reached it
    pub tick: u64,
    pub result: Result<u64, Arc<TickError>>,
}

/// Per-game outcomes of one sweep, in sweep order
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub sweep: u64,
    pub outcomes: Vec<TickOutcome>,
}

impl SweepReport {
    pub fn failures(&self) -> impl Iterator<Item = &TickOutcome> + '_ {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

// State shared between the ticker and its loop thread
struct Shared {
    games: Mutex<Sweeper>,
    failures: broadcast::Sender<TickFailure>,
}

#[derive(Default)]
struct Sweeper {
    games: Vec<SharedGame>,
    sweeps: u64,
}

pub struct GameTicker {
    shared: Arc<Shared>,
    tick_loop: TickLoop,
}

impl GameTicker {
    /// Creates a stopped ticker sweeping `tick_rate` times per second
    pub fn new(tick_rate: u32) -> Result<Self, TickerError> {
        Self::with_capacity(tick_rate, DEFAULT_FAILURE_CAPACITY)
    }

    pub fn with_config(config: &TickerConfig) -> Result<Self, TickerError> {
        Self::with_capacity(config.tick_rate, config.failure_capacity)
    }

    fn with_capacity(tick_rate: u32, failure_capacity: usize) -> Result<Self, TickerError> {
        let tick_loop = TickLoop::new(tick_rate).ok_or(TickerError::InvalidTickRate)?;
        let (failures, _failures_rx) = broadcast::channel(failure_capacity.max(1));

        Ok(Self {
            shared: Arc::new(Shared {
                games: Mutex::new(Sweeper::default()),
                failures,
            }),
            tick_loop,
        })
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_loop.rate()
    }

    pub fn period(&self) -> Duration {
        self.tick_loop.period()
    }

    /// Takes ownership of a game; the same game cannot be added twice
    pub fn add(&self, game: SharedGame) -> Result<(), TickerError> {
        let mut sweeper = lock(&self.shared.games);
        if sweeper.games.iter().any(|owned| owned.ptr_eq(&game)) {
            return Err(TickerError::DuplicateGame(game.id()));
        }

        debug!("Ticker added game {}", game.id());
        sweeper.games.push(game);
        Ok(())
    }

    /// Releases a game; returns false if this ticker did not own it
    pub fn remove(&self, game: &SharedGame) -> bool {
        let mut sweeper = lock(&self.shared.games);
        match sweeper.games.iter().position(|owned| owned.ptr_eq(game)) {
            Some(index) => {
                sweeper.games.remove(index);
                debug!("Ticker removed game {}", game.id());
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, game: &SharedGame) -> bool {
        lock(&self.shared.games)
            .games
            .iter()
            .any(|owned| owned.ptr_eq(game))
    }

    /// Owned games in sweep order
    pub fn games(&self) -> Vec<SharedGame> {
        lock(&self.shared.games).games.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.games).games.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.shared.games).games.is_empty()
    }

    /// Receiver for failure notifications
    ///
    /// A receiver that falls more than the configured capacity behind loses
    /// the oldest notifications.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<TickFailure> {
        self.shared.failures.subscribe()
    }

    /// Starts sweeping on the loop thread; does nothing if already running
    pub fn start(&self) -> Result<(), LoopError> {
        let sweeper = Arc::clone(&self.shared);
        let reporter = Arc::clone(&self.shared);

        self.tick_loop.start(
            move || {
                sweeper.sweep();
                Ok(())
            },
            move |e| reporter.report_loop_failure(e),
        )
    }

    /// Stops sweeping, waiting for an in-flight sweep to finish
    pub fn stop(&self) {
        self.tick_loop.stop();
    }

    pub fn is_running(&self) -> bool {
        self.tick_loop.is_running()
    }

    /// Runs one sweep on the calling thread
    pub fn sweep(&self) -> SweepReport {
        self.shared.sweep()
    }
}

impl Shared {
    fn sweep(&self) -> SweepReport {
        let report = {
            let mut sweeper = lock(&self.games);
            sweeper.sweeps += 1;
            SweepReport {
                sweep: sweeper.sweeps,
                outcomes: sweeper.games.iter().map(tick_game).collect(),
            }
        };

        for outcome in report.failures() {
            if let Err(e) = &outcome.result {
                error!("Game {} failed at tick {}: {}", outcome.game, outcome.tick, e);
                // No subscribers is not an error
                let _ = self.failures.send(TickFailure {
                    sweep: report.sweep,
                    source: FailureSource::Game {
                        game: outcome.game,
                        tick: outcome.tick,
                        error: Arc::clone(e),
                    },
                });
            }
        }

        if report.sweep % 600 == 0 {
            info!(
                "Sweep {}: {} games, {} failed",
                report.sweep,
                report.outcomes.len(),
                report.failures().count()
            );
        }

        report
    }

    /// Reports a failure of the loop itself
    ///
    /// Game failures never come through here; `tick_game` catches them so
    /// the sweep always completes.
    fn report_loop_failure(&self, e: LoopError) {
        error!("Ticker loop failure: {}", e);
        let sweep = lock(&self.games).sweeps;
        let _ = self.failures.send(TickFailure {
            sweep,
            source: FailureSource::Loop(Arc::new(e)),
        });
    }
}

fn tick_game(shared: &SharedGame) -> TickOutcome {
    let id = shared.id();
    let mut game = lock(shared);
    let tick = game.tick();

    let result = match panic::catch_unwind(AssertUnwindSafe(|| game.do_tick())) {
        Ok(result) => result,
        Err(payload) => Err(TickError::Panicked(panic_message(&*payload))),
    };

    TickOutcome {
        game: id,
        tick,
        result: result.map_err(Arc::new),
    }
}
