//! Demonstration match rules driven by the `match_server` binary
//!
//! A match starts in warmup, where joined players are parked, then switches
//! itself to in-progress after a fixed number of ticks. Players drift around
//! a circular arena and collect points through commands.

use log::debug;
use match_server::{
    BoxError, Command, Game, GameError, GameObject, GameState, ModeId, ObjectId, Stamp,
    StateContext, UpdateContext,
};
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;

pub const WARMUP: &str = "warmup";
pub const IN_PROGRESS: &str = "in-progress";

/// Radius of the playable area, centered on the origin
pub const ARENA_RADIUS: f32 = 50.0;

/// Speed of a freshly spawned drifter in units per second
pub const DRIFT_SPEED: f32 = 4.0;

// Spreads spawn points evenly without coordination between players
const GOLDEN_ANGLE: f32 = 2.399_963;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

/// Deterministic spawn point for a player, halfway to the arena edge
pub fn spawn_position(player: u32) -> Vector2 {
    let angle = player as f32 * GOLDEN_ANGLE;
    Vector2 {
        x: angle.cos(),
        y: angle.sin(),
    }
    .scale(ARENA_RADIUS / 2.0)
}

/// Initial velocity: tangent to the spawn circle, counter-clockwise
pub fn spawn_velocity(player: u32) -> Vector2 {
    let angle = player as f32 * GOLDEN_ANGLE;
    Vector2 {
        x: -angle.sin(),
        y: angle.cos(),
    }
    .scale(DRIFT_SPEED)
}

/// A player's avatar
#[derive(Debug, Clone)]
pub struct Drifter {
    pub player: u32,
    pub position: Vector2,
    pub velocity: Vector2,
    dt: f32,
}

impl Drifter {
    pub fn spawn(player: u32, dt: f32) -> Self {
        Self {
            player,
            position: spawn_position(player),
            velocity: spawn_velocity(player),
            dt,
        }
    }
}

impl GameObject for Drifter {
    fn update(&mut self, _ctx: &mut UpdateContext<'_>) -> Result<(), BoxError> {
        self.position = self.position.add(&self.velocity.scale(self.dt));

        // Bounce off the arena wall
        let distance = self.position.magnitude();
        if distance > ARENA_RADIUS {
            self.position = self.position.scale(ARENA_RADIUS / distance);
            self.velocity = self.velocity.scale(-1.0);
        }
        Ok(())
    }

    fn label(&self) -> &str {
        "drifter"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Points per joined player
#[derive(Debug, Default)]
pub struct Scoreboard {
    pub scores: BTreeMap<u32, i64>,
}

impl GameObject for Scoreboard {
    fn update(&mut self, _ctx: &mut UpdateContext<'_>) -> Result<(), BoxError> {
        Ok(())
    }

    fn label(&self) -> &str {
        "scoreboard"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn scoreboard_mut(game: &mut Game) -> Result<&mut Scoreboard, BoxError> {
    let id = game
        .objects()
        .find_as::<Scoreboard>(|_| true)
        .ok_or("arena has no scoreboard")?;
    game.objects_mut()
        .get_as_mut::<Scoreboard>(id)
        .ok_or_else(|| "arena has no scoreboard".into())
}

fn find_drifter(game: &Game, player: u32) -> Option<ObjectId> {
    game.objects().find_as::<Drifter>(|d| d.player == player)
}

/// Current scores of a game built by [`build_game`]
pub fn scores(game: &Game) -> BTreeMap<u32, i64> {
    game.objects()
        .iter()
        .find_map(|entry| entry.object.as_any().downcast_ref::<Scoreboard>())
        .map(|board| board.scores.clone())
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct Join {
    pub player: u32,
    pub dt: f32,
}

impl Command for Join {
    fn execute(&self, game: &mut Game, stamp: Stamp) -> Result<(), BoxError> {
        if find_drifter(game, self.player).is_some() {
            debug!("Player {} already in game {}", self.player, stamp.game);
            return Ok(());
        }

        // Drifters stay parked until the match is live
        let live = game.get_state().map(ModeId::as_str) == Some(IN_PROGRESS);
        game.objects_mut()
            .insert_boxed(Box::new(Drifter::spawn(self.player, self.dt)), live);
        scoreboard_mut(game)?.scores.entry(self.player).or_insert(0);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Join"
    }
}

#[derive(Debug)]
pub struct Leave {
    pub player: u32,
}

impl Command for Leave {
    fn execute(&self, game: &mut Game, _stamp: Stamp) -> Result<(), BoxError> {
        if let Some(id) = find_drifter(game, self.player) {
            game.objects_mut().remove(id);
            scoreboard_mut(game)?.scores.remove(&self.player);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Leave"
    }
}

#[derive(Debug)]
pub struct AddScore {
    pub player: u32,
    pub points: i64,
}

impl Command for AddScore {
    fn execute(&self, game: &mut Game, _stamp: Stamp) -> Result<(), BoxError> {
        if game.get_state().map(ModeId::as_str) != Some(IN_PROGRESS) {
            return Ok(());
        }
        if let Some(score) = scoreboard_mut(game)?.scores.get_mut(&self.player) {
            *score += self.points;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "AddScore"
    }
}

/// Always fails; sent by a faulty producer to exercise failure isolation
#[derive(Debug)]
pub struct Sabotage;

impl Command for Sabotage {
    fn execute(&self, _game: &mut Game, _stamp: Stamp) -> Result<(), BoxError> {
        Err("sabotaged by a faulty producer".into())
    }

    fn name(&self) -> &'static str {
        "Sabotage"
    }
}

#[derive(Debug)]
pub struct BeginMatch;

impl Command for BeginMatch {
    fn execute(&self, game: &mut Game, _stamp: Stamp) -> Result<(), BoxError> {
        game.set_state(IN_PROGRESS)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "BeginMatch"
    }
}

fn set_drifters_enabled(ctx: &mut StateContext<'_>, enabled: bool) {
    let drifters: Vec<ObjectId> = ctx
        .objects
        .iter()
        .filter(|entry| entry.object.as_any().is::<Drifter>())
        .map(|entry| entry.id)
        .collect();
    for id in drifters {
        ctx.objects.set_enabled(id, enabled);
    }
}

pub struct Warmup {
    ticks: u64,
    remaining: u64,
    requested: bool,
}

impl Warmup {
    pub fn new(ticks: u64) -> Self {
        Self {
            ticks,
            remaining: ticks,
            requested: false,
        }
    }
}

impl GameState for Warmup {
    fn on_enter(&mut self, ctx: &mut StateContext<'_>) {
        self.remaining = self.ticks;
        self.requested = false;
        set_drifters_enabled(ctx, false);
    }

    fn on_update(&mut self, ctx: &mut StateContext<'_>) -> Result<(), BoxError> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 && !self.requested {
            ctx.commands.send(BeginMatch)?;
            self.requested = true;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InProgress {
    /// Ticks since the match went live
    pub elapsed: u64,
}

impl GameState for InProgress {
    fn on_enter(&mut self, ctx: &mut StateContext<'_>) {
        debug!("Game {} is live at tick {}", ctx.game, ctx.tick);
        self.elapsed = 0;
        set_drifters_enabled(ctx, true);
    }

    fn on_update(&mut self, _ctx: &mut StateContext<'_>) -> Result<(), BoxError> {
        self.elapsed += 1;
        Ok(())
    }
}

/// Builds a game with a scoreboard, both modes registered and warmup active
pub fn build_game(warmup_ticks: u64) -> Result<Game, GameError> {
    let mut game = Game::new();
    game.objects_mut().insert(Scoreboard::default());
    game.register_state(WARMUP, Warmup::new(warmup_ticks))?;
    game.register_state(IN_PROGRESS, InProgress::default())?;
    game.set_state(WARMUP)?;
    Ok(game)
}
