//! Named simulation modes and the per-game registry that selects between them

use crate::command::{CommandSender, GameId};
use crate::error::{BoxError, GameError, TickError};
use crate::objects::GameObjectCollection;
use log::debug;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Stable identifier of a simulation mode, e.g. `"warmup"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModeId(Cow<'static, str>);

impl ModeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&'static str> for ModeId {
    fn from(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }
}

impl From<String> for ModeId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Context handed to state hooks
pub struct StateContext<'a> {
    /// Owning game
    pub game: GameId,
    pub tick: u64,
    pub objects: &'a mut GameObjectCollection,
    pub commands: &'a CommandSender,
}

/// A behavioral mode of a game; at most one is active at a time
pub trait GameState: Send {
    /// Called once when the state is registered with its owning game
    fn on_register(&mut self, _owner: GameId) {}

    fn on_enter(&mut self, _ctx: &mut StateContext<'_>) {}

    /// Called once per tick while active, after all entities updated
    fn on_update(&mut self, ctx: &mut StateContext<'_>) -> Result<(), BoxError>;

    fn on_exit(&mut self, _ctx: &mut StateContext<'_>) {}
}

/// Mode table keyed by [`ModeId`] plus the current selection
#[derive(Default)]
pub struct StateMachine {
    states: HashMap<ModeId, Box<dyn GameState>>,
    active: Option<ModeId>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        owner: GameId,
        id: ModeId,
        mut state: Box<dyn GameState>,
    ) -> Result<(), GameError> {
        if id.is_empty() {
            return Err(GameError::NullArgument("mode id"));
        }
        if self.states.contains_key(&id) {
            return Err(GameError::DuplicateState(id));
        }

        state.on_register(owner);
        debug!("Game {} registered state '{}'", owner, id);
        self.states.insert(id, state);
        Ok(())
    }

    /// Exits the current state and enters `id`; re-activating the active state does nothing
    pub fn activate(&mut self, id: ModeId, ctx: &mut StateContext<'_>) -> Result<(), GameError> {
        if id.is_empty() {
            return Err(GameError::NullArgument("mode id"));
        }
        if !self.states.contains_key(&id) {
            return Err(GameError::UnregisteredState(id));
        }
        if self.active.as_ref() == Some(&id) {
            return Ok(());
        }

        self.exit_active(ctx);
        if let Some(state) = self.states.get_mut(&id) {
            state.on_enter(ctx);
        }
        debug!("Game {} entered state '{}' at tick {}", ctx.game, id, ctx.tick);
        self.active = Some(id);
        Ok(())
    }

    /// Exits the current state, if any, and clears the selection
    pub fn reset(&mut self, ctx: &mut StateContext<'_>) {
        self.exit_active(ctx);
    }

    pub fn active(&self) -> Option<&ModeId> {
        self.active.as_ref()
    }

    pub fn is_registered(&self, id: &ModeId) -> bool {
        self.states.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub(crate) fn update_active(&mut self, ctx: &mut StateContext<'_>) -> Result<(), TickError> {
        let Some(mode) = self.active.as_ref() else {
            return Ok(());
        };
        let Some(state) = self.states.get_mut(mode) else {
            return Ok(());
        };

        state.on_update(ctx).map_err(|source| TickError::State {
            mode: mode.clone(),
            source,
        })
    }

    fn exit_active(&mut self, ctx: &mut StateContext<'_>) {
        if let Some(previous) = self.active.take() {
            if let Some(state) = self.states.get_mut(&previous) {
                state.on_exit(ctx);
            }
            debug!("Game {} left state '{}' at tick {}", ctx.game, previous, ctx.tick);
        }
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<&ModeId> = self.states.keys().collect();
        registered.sort();
        f.debug_struct("StateMachine")
            .field("registered", &registered)
            .field("active", &self.active)
            .finish()
    }
}
