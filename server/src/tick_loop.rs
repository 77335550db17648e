//! Fixed-rate callback loop on a dedicated thread
//!
//! The loop thread runs its own current-thread tokio runtime and drives the
//! callback from a `tokio::time::interval`. Missed ticks are skipped rather
//! than bursted, so a slow callback delays the cadence instead of
//! triggering a catch-up storm. Callback errors and panics are handed to the
//! supplied handler; they never unwind out of the loop thread.

use crate::error::{BoxError, LoopError};
use crate::utils::{lock, panic_message};
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};

/// Highest rate whose period is still at least one nanosecond
pub const MAX_TICK_RATE: u32 = 1_000_000_000;

struct Running {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct TickLoop {
    rate: u32,
    period: Duration,
    running: Mutex<Option<Running>>,
}

impl TickLoop {
    /// Creates a stopped loop invoking its callback `rate` times per second
    ///
    /// Returns `None` for a zero rate or one above [`MAX_TICK_RATE`].
    pub fn new(rate: u32) -> Option<Self> {
        if !(1..=MAX_TICK_RATE).contains(&rate) {
            return None;
        }

        // tokio's interval panics on a zero period
        let period = Duration::from_secs_f64(1.0 / rate as f64);
        if period.is_zero() {
            return None;
        }

        Some(Self {
            rate,
            period,
            running: Mutex::new(None),
        })
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running)
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Starts invoking `callback` once per period; does nothing if already running
    pub fn start<F, H>(&self, callback: F, on_error: H) -> Result<(), LoopError>
    where
        F: FnMut() -> Result<(), BoxError> + Send + 'static,
        H: Fn(LoopError) + Send + 'static,
    {
        let mut running = lock(&self.running);
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                debug!("Tick loop already running");
                return Ok(());
            }
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let period = self.period;
        let handle = thread::Builder::new()
            .name("tick-loop".to_string())
            .spawn(move || run_loop(period, stop_rx, callback, on_error))
            .map_err(LoopError::Spawn)?;

        info!("Tick loop started at {}Hz", self.rate);
        *running = Some(Running { stop_tx, handle });
        Ok(())
    }

    /// Stops the loop, waiting for an in-flight callback to finish
    ///
    /// Calling this from inside the callback only signals the loop to stop.
    pub fn stop(&self) {
        let Some(running) = lock(&self.running).take() else {
            return;
        };

        let _ = running.stop_tx.send(());
        if running.handle.thread().id() == thread::current().id() {
            warn!("Tick loop stopped from its own thread; not waiting for it");
            return;
        }

        if running.handle.join().is_err() {
            error!("Tick loop thread panicked");
        }
        info!("Tick loop stopped");
    }
}

impl Drop for TickLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<F, H>(period: Duration, mut stop_rx: oneshot::Receiver<()>, mut callback: F, on_error: H)
where
    F: FnMut() -> Result<(), BoxError>,
    H: Fn(LoopError),
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            on_error(LoopError::Runtime(e));
            return;
        }
    };

    runtime.block_on(async move {
        let mut interval_timer = interval(period);
        interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        interval_timer.tick().await;

        loop {
            tokio::select! {
                biased;

                // A dropped sender also ends the loop
                _ = &mut stop_rx => break,

                _ = interval_timer.tick() => {
                    match panic::catch_unwind(AssertUnwindSafe(&mut callback)) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => on_error(LoopError::Callback(e)),
                        Err(payload) => on_error(LoopError::Panicked(panic_message(&*payload))),
                    }
                }
            }
        }
    });
}
