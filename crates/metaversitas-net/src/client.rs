//! Composition root wiring the client core together.
//!
//! [`MetaverseClient`] owns one of everything and passes explicit
//! references between them. A [`TickScheduler`](crate::TickScheduler)
//! drives it by calling [`MetaverseClient::simulation_tick`] once per tick.

use glam::{Quat, Vec3};

use crate::backend::SessionBackend;
use crate::coordinator::{CoordinatorSettings, SessionCoordinator};
use crate::error::Rejected;
use crate::game_state::{GameState, GameStateMachine};
use crate::input::{InputCollector, InputSample};
use crate::interaction::{
    InteractableId, Interactables, InteractionContext, InteractionController, InteractionResult,
};
use crate::registry::ParticipantFields;
use crate::replication::ReplicationError;
use crate::scheduler::TickInfo;

/// Walking speed of an avatar in metres per second.
pub const WALK_SPEED: f32 = 3.0;

/// The local participant's client.
pub struct MetaverseClient<B: SessionBackend> {
    coordinator: SessionCoordinator<B>,
    state: GameStateMachine,
    interaction: InteractionController,
    input: InputCollector,
    targets: Interactables,
    allow_input: bool,
}

impl<B: SessionBackend> MetaverseClient<B> {
    pub fn new(
        backend: B,
        settings: CoordinatorSettings,
        cooldown_ticks: u32,
        mouse_sensitivity: f32,
    ) -> Self {
        Self {
            coordinator: SessionCoordinator::new(backend, settings),
            state: GameStateMachine::new(),
            interaction: InteractionController::new(cooldown_ticks),
            input: InputCollector::with_sensitivity(mouse_sensitivity),
            targets: Interactables::new(),
            allow_input: true,
        }
    }

    pub fn coordinator(&self) -> &SessionCoordinator<B> {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut SessionCoordinator<B> {
        &mut self.coordinator
    }

    pub fn game_state(&self) -> GameState {
        self.state.current()
    }

    pub fn state_machine_mut(&mut self) -> &mut GameStateMachine {
        &mut self.state
    }

    pub fn input_mut(&mut self) -> &mut InputCollector {
        &mut self.input
    }

    pub fn interaction(&self) -> &InteractionController {
        &self.interaction
    }

    pub fn targets(&self) -> &Interactables {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut Interactables {
        &mut self.targets
    }

    /// Suppresses input sampling entirely (e.g. while a modal is open).
    pub fn set_allow_input(&mut self, allow: bool) {
        self.allow_input = allow;
    }

    pub fn on_proximity_enter(&mut self, id: InteractableId) {
        self.interaction.on_proximity_enter(id, &mut self.targets);
    }

    pub fn on_proximity_exit(&mut self, id: InteractableId) {
        self.interaction.on_proximity_exit(id, &mut self.targets);
    }

    /// Play → Chatting. Returns whether the state changed.
    pub fn open_chat(&mut self) -> bool {
        if self.state.current() != GameState::Play {
            return false;
        }
        self.state.trigger_chatting_state();
        true
    }

    /// Chatting → Play. Returns whether the state changed.
    pub fn close_chat(&mut self) -> bool {
        if self.state.current() != GameState::Chatting {
            return false;
        }
        self.state.trigger_play_state();
        true
    }

    /// Play ↔ Pause. Ignored in every other state.
    pub fn toggle_pause(&mut self) -> bool {
        match self.state.current() {
            GameState::Play => {
                self.state.trigger_pause_state();
                true
            }
            GameState::Pause => {
                self.state.trigger_play_state();
                true
            }
            GameState::Intro | GameState::Interact | GameState::Chatting | GameState::End => false,
        }
    }

    /// One simulation tick: pump session events, sample input, move the
    /// local avatar, then run interaction.
    pub fn simulation_tick(
        &mut self,
        info: &TickInfo,
    ) -> Option<Result<InteractionResult, Rejected>> {
        self.coordinator.update(info.tick);

        let gate = self.coordinator.gate()?;
        let local = gate.local();
        let ownership = self.coordinator.registry().ownership(local)?;
        let sample = self.input.sample(self.state.current(), self.allow_input)?;

        if self.state.current().allows_movement() {
            let dt = 1.0 / info.tick_rate.max(1) as f32;
            if let Err(err) = self.apply_movement(&sample, dt) {
                tracing::debug!(%err, "movement not applied");
            }
        }

        let mut ctx = InteractionContext {
            gate: &gate,
            actor: &ownership,
            state: &mut self.state,
            tick: info.tick,
        };
        let result = self
            .interaction
            .process_input(&mut ctx, &mut self.targets, &sample);
        if let Some(Err(rejected)) = &result {
            tracing::debug!(%rejected, "interaction rejected");
        }
        result
    }

    fn apply_movement(
        &mut self,
        sample: &InputSample,
        dt: f32,
    ) -> Result<(), ReplicationError> {
        let Some(gate) = self.coordinator.gate() else {
            return Ok(());
        };
        let local = gate.local();
        let registry = self.coordinator.registry_mut();
        let Some(fields) = registry.fields(local) else {
            return Ok(());
        };
        let yaw = fields.get(ParticipantFields::YAW).copied().unwrap_or(0.0);
        let position = fields
            .get(ParticipantFields::POSITION)
            .copied()
            .unwrap_or(Vec3::ZERO);

        let yaw = yaw + sample.camera_yaw_delta;
        let local_move = Vec3::new(sample.movement.x, 0.0, sample.movement.y);
        let position = position + Quat::from_rotation_y(yaw) * local_move * WALK_SPEED * dt;

        registry.set_field(local, ParticipantFields::YAW, yaw, &gate)?;
        registry.set_field(local, ParticipantFields::CAMERA_YAW, yaw, &gate)?;
        registry.set_field(local, ParticipantFields::POSITION, position, &gate)?;
        registry.set_field(local, ParticipantFields::MOVE_X, axis(sample.movement.x), &gate)?;
        registry.set_field(local, ParticipantFields::MOVE_Y, axis(sample.movement.y), &gate)?;
        Ok(())
    }
}

/// Animation drive value for one movement axis.
fn axis(value: f32) -> i32 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}
