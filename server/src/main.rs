mod arena;

use arena::{AddScore, Join, Leave, Sabotage};
use clap::Parser;
use log::{info, warn};
use match_server::{CommandSender, GameTicker, SharedGame, TickerConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Duration};

// Players handled by each simulated producer
const PLAYERS_PER_PRODUCER: u32 = 4;

/// Main-method of the application.
/// Parses command-line arguments, builds the arena games and sweeps them until
/// the run time elapses or Ctrl+C is pressed.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// JSON config file; defaults are used if it does not exist
        #[clap(short, long, default_value = "match_server.json")]
        config: PathBuf,
        /// Tick rate (sweeps per second), overrides the config file
        #[clap(short, long)]
        tick_rate: Option<u32>,
        /// Number of concurrent matches
        #[clap(short, long, default_value = "4")]
        games: usize,
        /// Simulated command producers per match
        #[clap(short, long, default_value = "2")]
        producers: usize,
        /// Run time in seconds; 0 runs until Ctrl+C
        #[clap(short, long, default_value = "10")]
        duration: u64,
        /// Let one producer of the first match send failing commands
        #[clap(long)]
        faulty_game: bool,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args = Args::parse();

    let mut config = TickerConfig::load(&args.config)?;
    if let Some(tick_rate) = args.tick_rate {
        config.tick_rate = tick_rate;
    }
    config.validate()?;

    let ticker = GameTicker::with_config(&config)?;
    let dt = 1.0 / config.tick_rate as f32;
    // Two seconds of warmup at the configured rate
    let warmup_ticks = u64::from(config.tick_rate) * 2;

    // Build the matches
    let mut games: Vec<SharedGame> = Vec::with_capacity(args.games);
    let mut senders: Vec<CommandSender> = Vec::with_capacity(args.games);
    for _ in 0..args.games {
        let game = arena::build_game(warmup_ticks)?;
        senders.push(game.sender());
        let game = game.into_shared();
        ticker.add(game.clone())?;
        games.push(game);
    }

    // Spawn failure observer
    let failure_count = Arc::new(AtomicUsize::new(0));
    let observer_handle = {
        let mut failures = ticker.subscribe_failures();
        let failure_count = Arc::clone(&failure_count);

        tokio::spawn(async move {
            loop {
                match failures.recv().await {
                    Ok(failure) => {
                        failure_count.fetch_add(1, Ordering::Relaxed);
                        match failure.game() {
                            Some(game) => warn!("Match {} failed in sweep {}", game, failure.sweep),
                            None => warn!("Ticker loop failed in sweep {}", failure.sweep),
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Failure observer lagged, {} notifications missed", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    // Spawn producers
    let mut producer_handles = Vec::new();
    for (game_index, sender) in senders.iter().enumerate() {
        for producer in 0..args.producers {
            let faulty = args.faulty_game && game_index == 0 && producer == 0;
            let first_player = producer as u32 * PLAYERS_PER_PRODUCER;
            producer_handles.push(tokio::spawn(run_producer(
                sender.clone(),
                first_player,
                dt,
                faulty,
            )));
        }
    }

    info!(
        "Running {} matches at {}Hz with {} producers each",
        games.len(),
        ticker.tick_rate(),
        args.producers
    );
    ticker.start()?;

    // Handle shutdown gracefully
    if args.duration == 0 {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down gracefully...");
    } else {
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {
                info!("Run time elapsed, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
            }
        }
    }

    for handle in &producer_handles {
        handle.abort();
    }
    ticker.stop();
    drop(ticker);
    observer_handle.abort();

    // Print a summary per match
    for game in &games {
        let game = match_server::utils::lock(game);
        let snapshot = game.snapshot();
        info!(
            "Match {}: {} ticks, {} commands recorded, scores {:?}",
            game.id(),
            game.tick(),
            game.recorder().len(),
            arena::scores(&game)
        );
        info!("{}", serde_json::to_string(&snapshot)?);
    }
    info!(
        "{} failures observed",
        failure_count.load(Ordering::Relaxed)
    );

    Ok(())
}

/// Sends random arena commands for a fixed range of players until the match closes.
async fn run_producer(sender: CommandSender, first_player: u32, dt: f32, faulty: bool) {
    let mut rng = StdRng::from_entropy();

    loop {
        sleep(Duration::from_millis(rng.gen_range(20..200))).await;

        let player = first_player + rng.gen_range(0..PLAYERS_PER_PRODUCER);
        let result = if faulty && rng.gen_bool(0.05) {
            sender.send(Sabotage)
        } else {
            match rng.gen_range(0..10) {
                0..=2 => sender.send(Join { player, dt }),
                3 => sender.send(Leave { player }),
                _ => sender.send(AddScore {
                    player,
                    points: rng.gen_range(1..=3),
                }),
            }
        };

        if result.is_err() {
            break;
        }
    }
}
