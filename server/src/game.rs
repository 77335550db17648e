//! One simulation instance and its tick

use crate::command::{Command, CommandSender, Envelope, Event, GameId, Stamp};
use crate::error::{GameError, TickError};
use crate::objects::{GameObjectCollection, ObjectId};
use crate::recorder::CommandRecorder;
use crate::utils::lock;
use crate::state::{GameState, ModeId, StateContext, StateMachine};
use log::trace;
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

/// Handle under which a [`GameTicker`](crate::ticker::GameTicker) owns a game
///
/// The id is kept outside the lock, so identity checks never wait on a game
/// that is being ticked or held by a reader. Derefs to the game's mutex.
#[derive(Clone)]
pub struct SharedGame {
    id: GameId,
    game: Arc<Mutex<Game>>,
}

impl SharedGame {
    pub fn new(game: Game) -> Self {
        Self {
            id: game.id(),
            game: Arc::new(Mutex::new(game)),
        }
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    /// Returns true if both handles refer to the same game
    pub fn ptr_eq(&self, other: &SharedGame) -> bool {
        Arc::ptr_eq(&self.game, &other.game)
    }
}

impl Deref for SharedGame {
    type Target = Mutex<Game>;

    fn deref(&self) -> &Mutex<Game> {
        &self.game
    }
}

impl fmt::Debug for SharedGame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedGame").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Entity entry as seen by snapshot readers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectSummary {
    pub id: ObjectId,
    pub label: String,
    pub enabled: bool,
}

/// Read-only view of a game published after every completed tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSnapshot {
    pub game: GameId,
    pub tick: u64,
    pub state: Option<ModeId>,
    pub objects: Vec<ObjectSummary>,
}

/// A single match instance
///
/// The game owns its entities, its command log and its mode table. Commands
/// reach it through an unbounded inbox that any thread may feed via
/// [`Game::sender`]; senders also append to the command log, which is why
/// it sits behind its own lock. Everything else happens inside
/// [`Game::do_tick`] on the thread that ticks it.
pub struct Game {
    id: GameId,
    tick: Arc<AtomicU64>,
    states: StateMachine,
    objects: GameObjectCollection,
    recorder: Arc<Mutex<CommandRecorder>>,
    inbox: mpsc::UnboundedReceiver<Envelope>,
    sender: CommandSender,
    snapshot_tx: watch::Sender<GameSnapshot>,
}

impl Game {
    pub fn new() -> Self {
        let id = GameId::next();
        let tick = Arc::new(AtomicU64::new(0));
        let recorder = Arc::new(Mutex::new(CommandRecorder::new()));
        let (tx, inbox) = mpsc::unbounded_channel();
        let (snapshot_tx, _snapshot_rx) = watch::channel(GameSnapshot {
            game: id,
            tick: 0,
            state: None,
            objects: Vec::new(),
        });

        Self {
            id,
            sender: CommandSender::new(id, Arc::clone(&tick), Arc::clone(&recorder), tx),
            tick,
            states: StateMachine::new(),
            objects: GameObjectCollection::new(id),
            recorder,
            inbox,
            snapshot_tx,
        }
    }

    /// Wraps the game for ownership by a ticker
    pub fn into_shared(self) -> SharedGame {
        SharedGame::new(self)
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    /// Number of completed ticks
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Producer handle for this game's inbox
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    pub fn objects(&self) -> &GameObjectCollection {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut GameObjectCollection {
        &mut self.objects
    }

    /// Log of every accepted command
    ///
    /// Senders block while the guard is held; drop it before sending.
    pub fn recorder(&self) -> MutexGuard<'_, CommandRecorder> {
        lock(&self.recorder)
    }

    pub fn register_state<S: GameState + 'static>(
        &mut self,
        id: impl Into<ModeId>,
        state: S,
    ) -> Result<(), GameError> {
        self.states.register(self.id, id.into(), Box::new(state))
    }

    /// Exits the active state and enters `id`
    pub fn set_state(&mut self, id: impl Into<ModeId>) -> Result<(), GameError> {
        let tick = self.tick();
        let mut ctx = StateContext {
            game: self.id,
            tick,
            objects: &mut self.objects,
            commands: &self.sender,
        };
        self.states.activate(id.into(), &mut ctx)
    }

    /// Exits the active state, leaving none selected
    pub fn reset_state(&mut self) {
        let tick = self.tick();
        let mut ctx = StateContext {
            game: self.id,
            tick,
            objects: &mut self.objects,
            commands: &self.sender,
        };
        self.states.reset(&mut ctx);
    }

    pub fn get_state(&self) -> Option<&ModeId> {
        self.states.active()
    }

    pub fn is_registered(&self, id: &ModeId) -> bool {
        self.states.is_registered(id)
    }

    /// Stamps, records and enqueues a command for the next dispatch phase
    pub fn on_command<C: Command>(&self, command: C) -> Result<Stamp, GameError> {
        self.sender.send(command)
    }

    // Reserved for broadcast and notification behavior
    pub fn on_event<E: Event>(&self, event: E) {
        trace!("Game {} ignored event {:?}", self.id, event);
    }

    /// Runs one simulation step and returns the new tick count
    ///
    /// Dispatches every queued command (including ones enqueued while
    /// dispatching), updates enabled entities in insertion order, updates the
    /// active state, then advances the tick and publishes a snapshot. The
    /// first failure aborts the step and leaves the tick unchanged.
    pub fn do_tick(&mut self) -> Result<u64, TickError> {
        let tick = self.tick();

        let dispatched = self.dispatch(tick)?;
        self.update(tick)?;

        let next = tick + 1;
        self.tick.store(next, Ordering::Release);
        self.snapshot_tx.send_replace(self.snapshot());

        trace!("Game {} finished tick {} ({} commands)", self.id, tick, dispatched);
        Ok(next)
    }

    /// Builds a snapshot of the current state
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            game: self.id,
            tick: self.tick(),
            state: self.states.active().cloned(),
            objects: self
                .objects
                .iter()
                .map(|entry| ObjectSummary {
                    id: entry.id,
                    label: entry.object.label().to_string(),
                    enabled: entry.enabled,
                })
                .collect(),
        }
    }

    /// Receiver of the snapshot published after each completed tick
    pub fn subscribe(&self) -> watch::Receiver<GameSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn dispatch(&mut self, tick: u64) -> Result<usize, TickError> {
        let mut dispatched = 0;

        // Commands executed here may enqueue more; drain until empty
        while let Ok(envelope) = self.inbox.try_recv() {
            lock(&self.recorder).mark_dispatched(envelope.sequence, tick);
            dispatched += 1;

            envelope
                .command
                .execute(self, envelope.stamp)
                .map_err(|source| TickError::Command {
                    command: envelope.command.name(),
                    stamped: envelope.stamp.tick,
                    source,
                })?;
        }

        Ok(dispatched)
    }

    fn update(&mut self, tick: u64) -> Result<(), TickError> {
        self.objects.update_all(tick, &self.sender)?;

        let mut ctx = StateContext {
            game: self.id,
            tick,
            objects: &mut self.objects,
            commands: &self.sender,
        };
        self.states.update_active(&mut ctx)
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Game")
            .field("id", &self.id)
            .field("tick", &self.tick())
            .field("states", &self.states)
            .field("objects", &self.objects.len())
            .field("recorded", &self.recorder().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::objects::{GameObject, UpdateContext};
    use std::any::Any;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn push(journal: &Journal, entry: impl Into<String>) {
        journal.lock().unwrap().push(entry.into());
    }

    #[derive(Debug)]
    struct IncrementScore {
        amount: i64,
        journal: Journal,
    }

    impl Command for IncrementScore {
        fn execute(&self, game: &mut Game, stamp: Stamp) -> Result<(), BoxError> {
            let board = game
                .objects()
                .find_as::<Scoreboard>(|_| true)
                .ok_or("no scoreboard")?;
            if let Some(board) = game.objects_mut().get_as_mut::<Scoreboard>(board) {
                board.score += self.amount;
            }
            push(&self.journal, format!("increment@{}", stamp.tick));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Push(&'static str, Journal);

    impl Command for Push {
        fn execute(&self, _game: &mut Game, _stamp: Stamp) -> Result<(), BoxError> {
            push(&self.1, self.0);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Chain(Journal);

    impl Command for Chain {
        fn execute(&self, game: &mut Game, _stamp: Stamp) -> Result<(), BoxError> {
            push(&self.0, "chain");
            game.on_command(Push("chained", Arc::clone(&self.0)))?;
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Fail;

    impl Command for Fail {
        fn execute(&self, _game: &mut Game, _stamp: Stamp) -> Result<(), BoxError> {
            Err("rejected".into())
        }

        fn name(&self) -> &'static str {
            "Fail"
        }
    }

    #[derive(Debug)]
    struct Explode;

    impl Command for Explode {
        fn execute(&self, _game: &mut Game, _stamp: Stamp) -> Result<(), BoxError> {
            panic!("exploded mid-dispatch")
        }

        fn name(&self) -> &'static str {
            "Explode"
        }
    }

    #[derive(Debug)]
    struct SwitchTo(&'static str);

    impl Command for SwitchTo {
        fn execute(&self, game: &mut Game, _stamp: Stamp) -> Result<(), BoxError> {
            game.set_state(self.0)?;
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Ping;

    impl Event for Ping {}

    #[derive(Default)]
    struct Scoreboard {
        score: i64,
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

    struct Tracer(&'static str, Journal);

    impl GameObject for Tracer {
        fn update(&mut self, ctx: &mut UpdateContext<'_>) -> Result<(), BoxError> {
            push(&self.1, format!("{}@{}", self.0, ctx.tick));
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct Mode(&'static str, Journal);

    impl GameState for Mode {
        fn on_enter(&mut self, _ctx: &mut StateContext<'_>) {
            push(&self.1, format!("{}:enter", self.0));
        }

        fn on_update(&mut self, _ctx: &mut StateContext<'_>) -> Result<(), BoxError> {
            push(&self.1, format!("{}:update", self.0));
            Ok(())
        }

        fn on_exit(&mut self, _ctx: &mut StateContext<'_>) {
            push(&self.1, format!("{}:exit", self.0));
        }
    }

    #[test]
    fn test_new_game_is_idle() {
        let game = Game::new();
        assert_eq!(game.tick(), 0);
        assert!(game.get_state().is_none());
        assert!(game.objects().is_empty());
        assert!(game.recorder().is_empty());
    }

    #[test]
    fn test_lobby_scenario() {
        let journal = Journal::default();
        let mut game = Game::new();
        game.objects_mut().insert(Scoreboard::default());
        game.register_state("lobby", Mode("lobby", Arc::clone(&journal)))
            .unwrap();
        game.set_state("lobby").unwrap();

        game.on_command(IncrementScore {
            amount: 1,
            journal: Arc::clone(&journal),
        })
        .unwrap();
        assert_eq!(game.do_tick().unwrap(), 1);

        assert_eq!(game.tick(), 1);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["lobby:enter", "increment@0", "lobby:update"]
        );
        let board = game.objects().find_as::<Scoreboard>(|_| true).unwrap();
        assert_eq!(game.objects().get_as::<Scoreboard>(board).unwrap().score, 1);
    }

    #[test]
    fn test_commands_run_in_enqueue_order_before_advance() {
        let journal = Journal::default();
        let mut game = Game::new();
        for name in ["one", "two", "three", "four"] {
            game.on_command(Push(name, Arc::clone(&journal))).unwrap();
        }

        game.do_tick().unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["one", "two", "three", "four"]);
        assert_eq!(game.tick(), 1);
        assert_eq!(game.recorder().len(), 4);

        game.do_tick().unwrap();
        assert_eq!(journal.lock().unwrap().len(), 4);
        assert_eq!(game.tick(), 2);
    }

    #[test]
    fn test_stamp_is_taken_at_enqueue() {
        let mut game = Game::new();
        game.do_tick().unwrap();
        game.do_tick().unwrap();

        let stamp = game.sender().send(Fail).unwrap();
        assert_eq!(stamp.tick, 2);
        assert_eq!(stamp.game, game.id());
    }

    #[test]
    fn test_chained_commands_run_in_same_tick() {
        let journal = Journal::default();
        let mut game = Game::new();
        game.objects_mut().insert(Tracer("tracer", Arc::clone(&journal)));
        game.on_command(Chain(Arc::clone(&journal))).unwrap();

        game.do_tick().unwrap();
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["chain", "chained", "tracer@0"]
        );
        assert_eq!(game.recorder().for_tick(0).count(), 2);
    }

    #[test]
    fn test_disabled_object_skipped_for_one_tick() {
        let journal = Journal::default();
        let mut game = Game::new();
        let tracer = game.objects_mut().insert(Tracer("tracer", Arc::clone(&journal)));

        game.objects_mut().set_enabled(tracer, false);
        game.do_tick().unwrap();
        game.objects_mut().set_enabled(tracer, true);
        game.do_tick().unwrap();

        assert_eq!(*journal.lock().unwrap(), vec!["tracer@1"]);
    }

    #[test]
    fn test_failed_command_aborts_tick() {
        let journal = Journal::default();
        let mut game = Game::new();
        game.objects_mut().insert(Tracer("tracer", Arc::clone(&journal)));
        game.on_command(Push("before", Arc::clone(&journal))).unwrap();
        game.on_command(Fail).unwrap();
        game.on_command(Push("after", Arc::clone(&journal))).unwrap();

        match game.do_tick() {
            Err(TickError::Command { command, stamped, .. }) => {
                assert_eq!(command, "Fail");
                assert_eq!(stamped, 0);
            }
            other => panic!("Unexpected result: {:?}", other),
        }
        assert_eq!(game.tick(), 0);
        assert_eq!(*journal.lock().unwrap(), vec!["before"]);
        assert_eq!(game.recorder().len(), 3);
        assert_eq!(game.recorder().for_tick(0).count(), 2);
        assert_eq!(game.recorder().pending(), 1);

        // The remaining command is still queued for the next attempt
        assert_eq!(game.do_tick().unwrap(), 1);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["before", "after", "tracer@0"]
        );
    }

    #[test]
    fn test_command_recorded_on_acceptance() {
        let journal = Journal::default();
        let game = Game::new();
        let stamp = game.on_command(Push("queued", Arc::clone(&journal))).unwrap();

        let recorder = game.recorder();
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.pending(), 1);
        let entry = recorder.last().unwrap();
        assert_eq!(entry.stamp, stamp);
        assert_eq!(entry.dispatched_at, None);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panicking_command_stays_recorded() {
        let mut game = Game::new();
        game.on_command(Explode).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| game.do_tick()));
        assert!(result.is_err());
        assert_eq!(game.tick(), 0);

        let recorder = game.recorder();
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.last().map(|entry| entry.name()), Some("Explode"));
        assert_eq!(recorder.last().and_then(|entry| entry.dispatched_at), Some(0));
    }

    #[test]
    fn test_set_state_from_command() {
        let journal = Journal::default();
        let mut game = Game::new();
        game.register_state("warmup", Mode("warmup", Arc::clone(&journal)))
            .unwrap();
        game.register_state("live", Mode("live", Arc::clone(&journal)))
            .unwrap();
        game.set_state("warmup").unwrap();

        game.on_command(SwitchTo("live")).unwrap();
        game.do_tick().unwrap();

        assert_eq!(game.get_state().map(ModeId::as_str), Some("live"));
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["warmup:enter", "warmup:exit", "live:enter", "live:update"]
        );
    }

    #[test]
    fn test_state_registration_errors() {
        let journal = Journal::default();
        let mut game = Game::new();
        game.register_state("lobby", Mode("lobby", Arc::clone(&journal)))
            .unwrap();
        game.set_state("lobby").unwrap();

        let err = game
            .register_state("lobby", Mode("again", Arc::clone(&journal)))
            .unwrap_err();
        assert!(matches!(err, GameError::DuplicateState(_)));

        let err = game.set_state("missing").unwrap_err();
        assert!(matches!(err, GameError::UnregisteredState(_)));
        assert_eq!(game.get_state().map(ModeId::as_str), Some("lobby"));
        assert!(game.is_registered(&ModeId::from("lobby")));

        game.do_tick().unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["lobby:enter", "lobby:update"]);
    }

    #[test]
    fn test_reset_state() {
        let journal = Journal::default();
        let mut game = Game::new();
        game.register_state("lobby", Mode("lobby", Arc::clone(&journal)))
            .unwrap();
        game.set_state("lobby").unwrap();
        game.reset_state();
        game.do_tick().unwrap();

        assert!(game.get_state().is_none());
        assert_eq!(*journal.lock().unwrap(), vec!["lobby:enter", "lobby:exit"]);
    }

    #[test]
    fn test_snapshot_published_after_tick() {
        let mut game = Game::new();
        let mut snapshots = game.subscribe();
        game.objects_mut().insert(Scoreboard::default());

        assert_eq!(snapshots.borrow().tick, 0);
        assert!(snapshots.borrow().objects.is_empty());

        game.do_tick().unwrap();
        assert!(snapshots.has_changed().unwrap());

        let snapshot = snapshots.borrow_and_update().clone();
        assert_eq!(snapshot.tick, 1);
        assert_eq!(snapshot.game, game.id());
        assert_eq!(snapshot.objects.len(), 1);
        assert_eq!(snapshot.objects[0].label, "scoreboard");
        assert!(snapshot.objects[0].enabled);
    }

    #[test]
    fn test_dropping_game_closes_sender() {
        let game = Game::new();
        let sender = game.sender();
        drop(game);

        assert!(matches!(sender.send(Fail), Err(GameError::Closed(_))));
    }

    #[test]
    fn test_on_event_is_accepted() {
        let game = Game::new();
        game.on_event(Ping);
        assert_eq!(game.tick(), 0);
    }

    #[derive(Debug)]
    struct Tag(u32, Arc<Mutex<Vec<u32>>>);

    impl Command for Tag {
        fn execute(&self, _game: &mut Game, _stamp: Stamp) -> Result<(), BoxError> {
            self.1.lock().unwrap().push(self.0);
            Ok(())
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_commands_execute_in_enqueue_order(
            steps in proptest::collection::vec((0u32..1000, proptest::bool::ANY), 0..64)
        ) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let mut game = Game::new();
            let mut sent = Vec::new();
            let mut stamps = Vec::new();

            for (value, tick_after) in &steps {
                stamps.push(game.on_command(Tag(*value, Arc::clone(&log))).unwrap());
                sent.push(*value);
                if *tick_after {
                    game.do_tick().unwrap();
                }
            }
            game.do_tick().unwrap();

            proptest::prop_assert_eq!(&*log.lock().unwrap(), &sent);
            proptest::prop_assert_eq!(game.recorder().len(), sent.len());

            let recorded: Vec<_> = game.recorder().iter().map(|r| r.stamp).collect();
            proptest::prop_assert_eq!(recorded, stamps);
            for entry in game.recorder().iter() {
                proptest::prop_assert!(entry.dispatched_at >= Some(entry.stamp.tick));
            }
        }
    }
}
