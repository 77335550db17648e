//! Insertion-ordered container of live entities for one game
//!
//! The collection owns every entity of a game instance. Each entry carries
//! an `enabled` flag; the game updates enabled entries once per tick in the
//! order they were inserted. Creating and destroying entities is left to
//! rule content, usually through commands.

use crate::command::{CommandSender, GameId};
use crate::error::{BoxError, TickError};
use serde::Serialize;
use std::any::Any;
use std::fmt;

/// Stable handle to an entity inside a [`GameObjectCollection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectId(u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context handed to an entity during the update phase
pub struct UpdateContext<'a> {
    pub game: GameId,
    pub tick: u64,
    pub object: ObjectId,
    /// Inbox of the owning game; commands sent here run on the next dispatch
    pub commands: &'a CommandSender,
}

/// An updatable entity owned by a game
pub trait GameObject: Send {
    fn update(&mut self, ctx: &mut UpdateContext<'_>) -> Result<(), BoxError>;

    /// Label used in logs, failure reports and snapshots
    fn label(&self) -> &str {
        "object"
    }

    /// Support downcasting to concrete entity types
    fn as_any(&self) -> &dyn Any;

    /// Support downcasting to concrete entity types
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Slot {
    id: ObjectId,
    enabled: bool,
    object: Box<dyn GameObject>,
}

/// Read-only view of one entry
#[derive(Clone, Copy)]
pub struct ObjectEntry<'a> {
    pub id: ObjectId,
    pub enabled: bool,
    pub object: &'a dyn GameObject,
}

pub struct GameObjectCollection {
    game: GameId,
    slots: Vec<Slot>,
    next_id: u64,
}

impl GameObjectCollection {
    pub fn new(game: GameId) -> Self {
        Self {
            game,
            slots: Vec::new(),
            next_id: 1,
        }
    }

    /// Game this collection belongs to
    pub fn game(&self) -> GameId {
        self.game
    }

    /// Appends an enabled entity and returns its handle
    pub fn insert<O: GameObject + 'static>(&mut self, object: O) -> ObjectId {
        self.insert_boxed(Box::new(object), true)
    }

    pub fn insert_boxed(&mut self, object: Box<dyn GameObject>, enabled: bool) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.slots.push(Slot {
            id,
            enabled,
            object,
        });
        id
    }

    /// Removes an entity, keeping the relative order of the rest
    pub fn remove(&mut self, id: ObjectId) -> Option<Box<dyn GameObject>> {
        let index = self.position(id)?;
        Some(self.slots.remove(index).object)
    }

    /// Returns false if the handle is unknown
    pub fn set_enabled(&mut self, id: ObjectId, enabled: bool) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_enabled(&self, id: ObjectId) -> Option<bool> {
        self.slot(id).map(|slot| slot.enabled)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: ObjectId) -> Option<&dyn GameObject> {
        self.slot(id).map(|slot| &*slot.object)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut (dyn GameObject + 'static)> {
        self.slot_mut(id).map(|slot| &mut *slot.object)
    }

    /// Returns the entity as `T` if the handle exists and the type matches
    pub fn get_as<T: 'static>(&self, id: ObjectId) -> Option<&T> {
        self.get(id)?.as_any().downcast_ref::<T>()
    }

    pub fn get_as_mut<T: 'static>(&mut self, id: ObjectId) -> Option<&mut T> {
        self.get_mut(id)?.as_any_mut().downcast_mut::<T>()
    }

    /// Finds the first entity of type `T` matching the predicate
    pub fn find_as<T: 'static>(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<ObjectId> {
        self.slots.iter().find_map(|slot| {
            let object = slot.object.as_any().downcast_ref::<T>()?;
            predicate(object).then_some(slot.id)
        })
    }

    /// Iterates entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = ObjectEntry<'_>> + '_ {
        self.slots.iter().map(|slot| ObjectEntry {
            id: slot.id,
            enabled: slot.enabled,
            object: &*slot.object,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Updates every enabled entity in insertion order, stopping at the first failure
    pub(crate) fn update_all(&mut self, tick: u64, commands: &CommandSender) -> Result<(), TickError> {
        for slot in self.slots.iter_mut().filter(|slot| slot.enabled) {
            let mut ctx = UpdateContext {
                game: self.game,
                tick,
                object: slot.id,
                commands,
            };

            slot.object
                .update(&mut ctx)
                .map_err(|source| TickError::Object {
                    object: slot.id,
                    label: slot.object.label().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    fn position(&self, id: ObjectId) -> Option<usize> {
        // Handles are allocated in increasing order and slots keep insertion order
        self.slots.binary_search_by_key(&id, |slot| slot.id).ok()
    }

    fn slot(&self, id: ObjectId) -> Option<&Slot> {
        self.position(id).map(|index| &self.slots[index])
    }

    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Slot> {
        let index = self.position(id)?;
        Some(&mut self.slots[index])
    }
}

impl fmt::Debug for GameObjectCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|slot| (slot.id, slot.object.label(), slot.enabled)))
            .finish()
    }
}
