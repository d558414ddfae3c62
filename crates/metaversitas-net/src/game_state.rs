//! Local participant game state: an unconstrained state holder with
//! synchronous observers.
//!
//! Any [`GameState`] may follow any other. Every trigger notifies every
//! observer exactly once, including re-triggers of the current state; such
//! notifications carry [`StateChange::is_reentry`] so observers can skip
//! their side effects.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// What the local participant is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameState {
    /// Intro sequence / main menu before entering the world.
    Intro,
    /// Free movement in the world.
    #[default]
    Play,
    /// Pause menu open.
    Pause,
    /// Using an interactable (camera handed to the target).
    Interact,
    /// Chat input focused.
    Chatting,
    /// Session over.
    End,
}

impl GameState {
    /// Movement input is only sampled while playing.
    pub fn allows_movement(self) -> bool {
        self == GameState::Play
    }

    /// Interactions are suppressed outside of `Play`.
    pub fn allows_interaction(self) -> bool {
        self == GameState::Play
    }
}

/// Payload delivered to observers on every trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State before the trigger.
    pub previous: GameState,
    /// State after the trigger.
    pub current: GameState,
}

impl StateChange {
    /// `true` when the triggered state was already active.
    pub fn is_reentry(&self) -> bool {
        self.previous == self.current
    }
}

/// Handle returned by [`GameStateMachine::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type StateObserver = Box<dyn FnMut(StateChange) + Send>;

// ---------------------------------------------------------------------------
// GameStateMachine
// ---------------------------------------------------------------------------

/// Holds the local [`GameState`] and fans out changes to observers.
pub struct GameStateMachine {
    current: GameState,
    observers: Vec<(ObserverId, StateObserver)>,
    next_observer: u64,
}

impl GameStateMachine {
    /// Creates a machine in [`GameState::Play`].
    pub fn new() -> Self {
        Self::with_state(GameState::default())
    }

    /// Creates a machine in an explicit initial state.
    pub fn with_state(initial: GameState) -> Self {
        Self {
            current: initial,
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    /// Returns the active state.
    pub fn current(&self) -> GameState {
        self.current
    }

    /// Registers an observer. Observers run in registration order.
    pub fn subscribe(&mut self, observer: impl FnMut(StateChange) + Send + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Removes an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    /// Sets the state and notifies every observer once, synchronously.
    pub fn trigger(&mut self, state: GameState) -> StateChange {
        let change = StateChange {
            previous: self.current,
            current: state,
        };
        self.current = state;
        tracing::debug!(
            from = ?change.previous,
            to = ?change.current,
            reentry = change.is_reentry(),
            "game state triggered"
        );
        for (_, observer) in &mut self.observers {
            observer(change);
        }
        change
    }

    /// Enter [`GameState::Play`].
    pub fn trigger_play_state(&mut self) -> StateChange {
        self.trigger(GameState::Play)
    }

    /// Enter [`GameState::Pause`].
    pub fn trigger_pause_state(&mut self) -> StateChange {
        self.trigger(GameState::Pause)
    }

    /// Enter [`GameState::Interact`].
    pub fn trigger_interact_state(&mut self) -> StateChange {
        self.trigger(GameState::Interact)
    }

    /// Enter [`GameState::Chatting`].
    pub fn trigger_chatting_state(&mut self) -> StateChange {
        self.trigger(GameState::Chatting)
    }

    /// Enter [`GameState::Intro`].
    pub fn trigger_intro_state(&mut self) -> StateChange {
        self.trigger(GameState::Intro)
    }

    /// Enter [`GameState::End`].
    pub fn trigger_end_state(&mut self) -> StateChange {
        self.trigger(GameState::End)
    }
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GameStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameStateMachine")
            .field("current", &self.current)
            .field("observers", &self.observers.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const ALL: [GameState; 6] = [
        GameState::Intro,
        GameState::Play,
        GameState::Pause,
        GameState::Interact,
        GameState::Chatting,
        GameState::End,
    ];

    fn recording(machine: &mut GameStateMachine) -> Arc<Mutex<Vec<StateChange>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        machine.subscribe(move |change| sink.lock().unwrap().push(change));
        log
    }

    #[test]
    fn test_starts_in_play() {
        assert_eq!(GameStateMachine::new().current(), GameState::Play);
    }

    #[test]
    fn test_current_is_last_triggered_for_any_sequence() {
        let mut machine = GameStateMachine::new();
        // Every ordered pair, so every transition is exercised.
        for from in ALL {
            for to in ALL {
                machine.trigger(from);
                machine.trigger(to);
                assert_eq!(machine.current(), to, "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn test_each_trigger_notifies_once() {
        let mut machine = GameStateMachine::new();
        let log = recording(&mut machine);

        machine.trigger_pause_state();
        machine.trigger_chatting_state();
        machine.trigger_end_state();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(
            log[0],
            StateChange {
                previous: GameState::Play,
                current: GameState::Pause
            }
        );
        assert_eq!(log[2].current, GameState::End);
    }

    #[test]
    fn test_reentry_notifies_once_flagged() {
        let mut machine = GameStateMachine::new();
        let log = recording(&mut machine);

        let change = machine.trigger_play_state();
        assert!(change.is_reentry());

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1, "re-trigger still notifies exactly once");
        assert!(log[0].is_reentry());
    }

    #[test]
    fn test_observer_skipping_reentry_sees_only_real_changes() {
        let mut machine = GameStateMachine::new();
        let side_effects = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&side_effects);
        machine.subscribe(move |change| {
            if !change.is_reentry() {
                *counter.lock().unwrap() += 1;
            }
        });

        machine.trigger_interact_state();
        machine.trigger_interact_state();
        machine.trigger_play_state();
        machine.trigger_play_state();

        assert_eq!(*side_effects.lock().unwrap(), 2);
    }

    #[test]
    fn test_named_triggers_map_to_states() {
        let mut machine = GameStateMachine::new();
        assert_eq!(machine.trigger_intro_state().current, GameState::Intro);
        assert_eq!(machine.trigger_play_state().current, GameState::Play);
        assert_eq!(machine.trigger_pause_state().current, GameState::Pause);
        assert_eq!(machine.trigger_interact_state().current, GameState::Interact);
        assert_eq!(machine.trigger_chatting_state().current, GameState::Chatting);
        assert_eq!(machine.trigger_end_state().current, GameState::End);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let mut machine = GameStateMachine::new();
        let hits = Arc::new(Mutex::new(0u32));
        let counter = Arc::clone(&hits);
        let id = machine.subscribe(move |_| *counter.lock().unwrap() += 1);

        machine.trigger_pause_state();
        assert!(machine.unsubscribe(id));
        assert!(!machine.unsubscribe(id));
        machine.trigger_play_state();

        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn test_only_play_allows_interaction() {
        for state in ALL {
            assert_eq!(state.allows_interaction(), state == GameState::Play);
            assert_eq!(state.allows_movement(), state == GameState::Play);
        }
    }
}
