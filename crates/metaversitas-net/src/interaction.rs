//! Proximity and cooldown gated interaction.
//!
//! Interactables announce themselves through proximity enter/exit. The
//! most recently entered one still in range is the current target. Pressing
//! interact runs its handler at most once per cooldown, measured in
//! simulation ticks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::authority::{AuthorityGate, Ownership, ParticipantId};
use crate::error::Rejected;
use crate::game_state::{GameState, GameStateMachine};
use crate::input::{ButtonFlags, InputSample};
use crate::scheduler::TickTimer;

/// Stable identifier of an interactable in the loaded map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InteractableId(pub u32);

/// What the actor's game state should do after a successful interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractOutcome {
    /// Keep the current state (e.g. a panel toggled in place).
    Stay,
    /// Hand control to the target; the actor enters [`GameState::Interact`].
    EnterInteract,
}

/// Something a participant can walk up to and use.
pub trait Interactable: Send {
    /// Identifier of this target.
    fn id(&self) -> InteractableId;

    /// Participant currently holding exclusive use, if any.
    fn user(&self) -> Option<ParticipantId> {
        None
    }

    /// Overrides the controller's cooldown after using this target.
    fn cooldown_ticks(&self) -> Option<u32> {
        None
    }

    /// Runs the interaction handler.
    fn interact(&mut self, actor: ParticipantId) -> InteractOutcome;

    /// Ends an interaction started by `actor`.
    fn release(&mut self, _actor: ParticipantId) {}

    /// A participant entered (`+1`) or left (`-1`) the trigger volume.
    fn proximity_changed(&mut self, _delta: i32) {}
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Information panel shown next to an exhibit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformativeObject {
    id: InteractableId,
    collided_count: i32,
    showing: bool,
}

impl InformativeObject {
    pub fn new(id: InteractableId) -> Self {
        Self {
            id,
            collided_count: 0,
            showing: false,
        }
    }

    /// Participants currently inside the trigger volume.
    pub fn collided_count(&self) -> i32 {
        self.collided_count
    }

    pub fn is_showing(&self) -> bool {
        self.showing
    }
}

impl Interactable for InformativeObject {
    fn id(&self) -> InteractableId {
        self.id
    }

    fn interact(&mut self, _actor: ParticipantId) -> InteractOutcome {
        // Only reachable from inside the volume, but the count is shared.
        if self.collided_count > 0 {
            self.showing = !self.showing;
        }
        InteractOutcome::Stay
    }

    fn proximity_changed(&mut self, delta: i32) {
        self.collided_count = (self.collided_count + delta).max(0);
        if self.collided_count == 0 {
            self.showing = false;
        }
    }
}

/// Lab equipment used by one participant at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apparatus {
    id: InteractableId,
    name: String,
    in_use_by: Option<ParticipantId>,
}

impl Apparatus {
    pub fn new(id: InteractableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            in_use_by: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn in_use_by(&self) -> Option<ParticipantId> {
        self.in_use_by
    }
}

impl Interactable for Apparatus {
    fn id(&self) -> InteractableId {
        self.id
    }

    fn user(&self) -> Option<ParticipantId> {
        self.in_use_by
    }

    fn interact(&mut self, actor: ParticipantId) -> InteractOutcome {
        self.in_use_by = Some(actor);
        InteractOutcome::EnterInteract
    }

    fn release(&mut self, actor: ParticipantId) {
        if self.in_use_by == Some(actor) {
            self.in_use_by = None;
        }
    }
}

/// Interactables of the loaded map, keyed by id.
#[derive(Default)]
pub struct Interactables {
    targets: BTreeMap<InteractableId, Box<dyn Interactable>>,
}

impl Interactables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target, replacing any with the same id.
    pub fn insert(&mut self, target: impl Interactable + 'static) {
        self.targets.insert(target.id(), Box::new(target));
    }

    pub fn get(&self, id: InteractableId) -> Option<&dyn Interactable> {
        self.targets.get(&id).map(|t| t.as_ref())
    }

    pub fn get_mut(&mut self, id: InteractableId) -> Option<&mut (dyn Interactable + 'static)> {
        self.targets.get_mut(&id).map(|t| t.as_mut())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl std::fmt::Debug for Interactables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.targets.keys()).finish()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Everything an interaction attempt needs from its surroundings.
pub struct InteractionContext<'a> {
    pub gate: &'a AuthorityGate,
    /// Ownership of the acting participant's entity.
    pub actor: &'a Ownership,
    pub state: &'a mut GameStateMachine,
    /// Current simulation tick.
    pub tick: u64,
}

/// Result of [`InteractionController::process_input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionResult {
    /// A target's handler ran.
    Interacted(InteractableId),
    /// The actor left the Interact state, releasing this target if any.
    Released(Option<InteractableId>),
}

/// Per-participant interaction logic.
#[derive(Debug, Clone)]
pub struct InteractionController {
    candidates: Vec<InteractableId>,
    engaged: Option<InteractableId>,
    cooldown: TickTimer,
    cooldown_ticks: u32,
}

impl InteractionController {
    /// Controller with a cooldown of `cooldown_ticks` (at least one).
    pub fn new(cooldown_ticks: u32) -> Self {
        Self {
            candidates: Vec::new(),
            engaged: None,
            cooldown: TickTimer::none(),
            cooldown_ticks: cooldown_ticks.max(1),
        }
    }

    pub fn cooldown_ticks(&self) -> u32 {
        self.cooldown_ticks
    }

    /// Target the next interact press would use.
    pub fn current_target(&self) -> Option<InteractableId> {
        self.candidates.last().copied()
    }

    /// Target the actor is currently interacting with.
    pub fn engaged(&self) -> Option<InteractableId> {
        self.engaged
    }

    /// The actor entered `id`'s trigger volume.
    pub fn on_proximity_enter(&mut self, id: InteractableId, targets: &mut Interactables) {
        // Re-entering moves the target to the top.
        self.candidates.retain(|c| *c != id);
        self.candidates.push(id);
        if let Some(target) = targets.get_mut(id) {
            target.proximity_changed(1);
        }
    }

    /// The actor left `id`'s trigger volume.
    pub fn on_proximity_exit(&mut self, id: InteractableId, targets: &mut Interactables) {
        let before = self.candidates.len();
        self.candidates.retain(|c| *c != id);
        if self.candidates.len() != before
            && let Some(target) = targets.get_mut(id)
        {
            target.proximity_changed(-1);
        }
    }

    /// Uses the current target.
    pub fn try_interact(
        &mut self,
        ctx: &mut InteractionContext<'_>,
        targets: &mut Interactables,
    ) -> Result<InteractableId, Rejected> {
        ctx.gate.check_input(ctx.actor)?;
        if !self.cooldown.expired_or_not_running(ctx.tick) {
            return Err(Rejected::OnCooldown {
                remaining_ticks: self.cooldown.remaining_ticks(ctx.tick),
            });
        }
        let actual = ctx.state.current();
        if !actual.allows_interaction() {
            return Err(Rejected::WrongState {
                expected: GameState::Play,
                actual,
            });
        }
        let Some((id, target)) = self
            .current_target()
            .and_then(|id| targets.get_mut(id).map(|t| (id, t)))
        else {
            return Err(Rejected::NoTarget);
        };

        let cooldown = target.cooldown_ticks().unwrap_or(self.cooldown_ticks).max(1);
        self.cooldown = TickTimer::from_ticks(ctx.tick, cooldown);

        let actor = ctx.actor.owner;
        if let Some(user) = target.user()
            && user != actor
        {
            return Err(Rejected::TargetBusy { target: id, user });
        }

        let outcome = target.interact(actor);
        tracing::debug!(interactable = id.0, %actor, ?outcome, "interacted");
        if outcome == InteractOutcome::EnterInteract {
            self.engaged = Some(id);
            ctx.state.trigger_interact_state();
        }
        Ok(id)
    }

    /// Leaves the Interact state, releasing the engaged target.
    pub fn try_uninteract(
        &mut self,
        ctx: &mut InteractionContext<'_>,
        targets: &mut Interactables,
    ) -> Result<Option<InteractableId>, Rejected> {
        ctx.gate.check_input(ctx.actor)?;
        let actual = ctx.state.current();
        if actual != GameState::Interact {
            return Err(Rejected::WrongState {
                expected: GameState::Interact,
                actual,
            });
        }
        let released = self.engaged.take();
        if let Some(target) = released.and_then(|id| targets.get_mut(id)) {
            target.release(ctx.actor.owner);
        }
        ctx.state.trigger_play_state();
        Ok(released)
    }

    /// Per-tick entry point: ESCAPE leaves an interaction, INTERACT starts
    /// one. Returns `None` when neither button is pressed.
    pub fn process_input(
        &mut self,
        ctx: &mut InteractionContext<'_>,
        targets: &mut Interactables,
        sample: &InputSample,
    ) -> Option<Result<InteractionResult, Rejected>> {
        if sample.pressed(ButtonFlags::ESCAPE) && ctx.state.current() == GameState::Interact {
            return Some(
                self.try_uninteract(ctx, targets)
                    .map(InteractionResult::Released),
            );
        }
        if sample.pressed(ButtonFlags::INTERACT) {
            return Some(
                self.try_interact(ctx, targets)
                    .map(InteractionResult::Interacted),
            );
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
