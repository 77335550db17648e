//! Append-only log of the commands a game has accepted

use crate::command::{Command, Stamp};
use std::sync::Arc;

/// One accepted command with its bookkeeping
#[derive(Debug)]
pub struct RecordedCommand {
    /// Position in the game's acceptance order, starting at 0
    pub sequence: u64,
    /// Stamp taken when the command was enqueued
    pub stamp: Stamp,
    /// Tick during which the command was dispatched; `None` while it waits in the inbox
    pub dispatched_at: Option<u64>,
    command: Arc<dyn Command>,
}

impl RecordedCommand {
    pub fn command(&self) -> &dyn Command {
        &*self.command
    }

    pub fn name(&self) -> &'static str {
        self.command.name()
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched_at.is_some()
    }
}

/// Commands in the order their game accepted them
///
/// Acceptance order is also dispatch order. Read access is for audit and
/// replay tooling; nothing here feeds back into the simulation.
#[derive(Debug, Default)]
pub struct CommandRecorder {
    entries: Vec<RecordedCommand>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next recorded command will receive
    pub(crate) fn next_sequence(&self) -> u64 {
        self.entries.len() as u64
    }

    pub(crate) fn record(&mut self, stamp: Stamp, command: Arc<dyn Command>) -> u64 {
        let sequence = self.next_sequence();
        self.entries.push(RecordedCommand {
            sequence,
            stamp,
            dispatched_at: None,
            command,
        });
        sequence
    }

    /// Marks a command as dispatched, before it executes
    pub(crate) fn mark_dispatched(&mut self, sequence: u64, tick: u64) {
        if let Some(entry) = usize::try_from(sequence)
            .ok()
            .and_then(|index| self.entries.get_mut(index))
        {
            entry.dispatched_at = Some(tick);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, sequence: u64) -> Option<&RecordedCommand> {
        self.entries.get(usize::try_from(sequence).ok()?)
    }

    pub fn last(&self) -> Option<&RecordedCommand> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordedCommand> + '_ {
        self.entries.iter()
    }

    /// Accepted commands not dispatched yet
    pub fn pending(&self) -> usize {
        self.entries.len() - self.entries.partition_point(RecordedCommand::is_dispatched)
    }

    /// Commands dispatched during the given tick
    pub fn for_tick(&self, tick: u64) -> impl Iterator<Item = &RecordedCommand> + '_ {
        // Dispatched entries form a prefix in tick order
        let start = self
            .entries
            .partition_point(|entry| entry.dispatched_at.is_some_and(|at| at < tick));
        self.entries[start..]
            .iter()
            .take_while(move |entry| entry.dispatched_at == Some(tick))
    }
}
