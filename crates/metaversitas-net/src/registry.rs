//! Networked entity store.
//!
//! Participants and the session entity live in a `bevy_ecs` [`World`].
//! A side index maps participant ids to entities so there is never more
//! than one live avatar per participant.

use std::collections::HashMap;

use bevy_ecs::prelude::*;
use glam::Vec3;

use crate::authority::{AuthorityGate, Ownership, ParticipantId};
use crate::error::Rejected;
use crate::replication::{
    ApplyReport, EntityUpdate, FieldHandle, FieldValue, NetworkId, ReplicatedEntity,
    ReplicationError,
};
use crate::session::SessionDescriptor;

/// Marks the avatar of a participant.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantTag(pub ParticipantId);

/// The per-session singleton spawned by the session owner.
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct SessionEntity(pub SessionDescriptor);

/// Replicated fields of every participant avatar, in declaration order.
pub struct ParticipantFields;

impl ParticipantFields {
    pub const POSITION: FieldHandle<Vec3> = FieldHandle::at(0);
    pub const YAW: FieldHandle<f32> = FieldHandle::at(1);
    /// Animation drive scalar, strafe axis.
    pub const MOVE_X: FieldHandle<i32> = FieldHandle::at(2);
    /// Animation drive scalar, forward axis.
    pub const MOVE_Y: FieldHandle<i32> = FieldHandle::at(3);
    pub const CAMERA_YAW: FieldHandle<f32> = FieldHandle::at(4);
    pub const DISPLAY_NAME: FieldHandle<String> = FieldHandle::at(5);

    /// Field set of a freshly spawned avatar.
    pub fn declare(display_name: &str) -> ReplicatedEntity {
        let mut entity = ReplicatedEntity::new();
        entity.declare("position", Vec3::ZERO);
        entity.declare("yaw", 0.0f32);
        entity.declare("move_x", 0i32);
        entity.declare("move_y", 0i32);
        entity.declare("camera_yaw", 0.0f32);
        entity.declare("display_name", display_name.to_string());
        entity
    }
}

/// World of networked entities known to this participant.
pub struct EntityRegistry {
    world: World,
    participants: HashMap<ParticipantId, Entity>,
    by_network_id: HashMap<NetworkId, Entity>,
    session: Option<Entity>,
    next_network_id: u64,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            participants: HashMap::new(),
            by_network_id: HashMap::new(),
            session: None,
            next_network_id: 1,
        }
    }

    /// Read-only access to the underlying world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Spawns the avatar of `id`, owned by `id`, with a locally allocated
    /// network id. Returns the existing entity if one is already live.
    pub fn spawn_participant(&mut self, id: ParticipantId, display_name: &str) -> Entity {
        if let Some(&entity) = self.participants.get(&id) {
            return entity;
        }
        let network_id = self.allocate_network_id();
        self.insert_participant(id, network_id, display_name)
    }

    /// Creates the local copy of an avatar spawned elsewhere.
    ///
    /// The runtime's network id is canonical: a live avatar of `id` filed
    /// under another id is re-keyed to `network_id`. Returns `None` when
    /// `network_id` already belongs to a different entity.
    pub fn spawn_remote_participant(
        &mut self,
        id: ParticipantId,
        network_id: NetworkId,
        display_name: &str,
    ) -> Option<Entity> {
        let existing = self.participants.get(&id).copied();
        if let Some(&mapped) = self.by_network_id.get(&network_id) {
            if existing == Some(mapped) {
                return Some(mapped);
            }
            tracing::warn!(
                participant = %id,
                network_id = network_id.0,
                "network id already names another entity"
            );
            return None;
        }
        let Some(entity) = existing else {
            return Some(self.insert_participant(id, network_id, display_name));
        };
        if let Some(mut current) = self.world.get_mut::<NetworkId>(entity) {
            self.by_network_id.remove(&*current);
            *current = network_id;
        }
        self.by_network_id.insert(network_id, entity);
        tracing::debug!(participant = %id, network_id = network_id.0, "participant re-keyed");
        Some(entity)
    }

    fn insert_participant(
        &mut self,
        id: ParticipantId,
        network_id: NetworkId,
        display_name: &str,
    ) -> Entity {
        let entity = self
            .world
            .spawn((
                ParticipantTag(id),
                Ownership::new(id),
                network_id,
                ParticipantFields::declare(display_name),
            ))
            .id();
        self.participants.insert(id, entity);
        self.by_network_id.insert(network_id, entity);
        tracing::info!(participant = %id, network_id = network_id.0, "participant spawned");
        entity
    }

    /// Locally requested despawn; needs state authority over the avatar.
    /// Returns `Ok(false)` if no avatar is live.
    pub fn despawn_participant(
        &mut self,
        id: ParticipantId,
        gate: &AuthorityGate,
    ) -> Result<bool, Rejected> {
        let Some(&entity) = self.participants.get(&id) else {
            return Ok(false);
        };
        if let Some(ownership) = self.world.get::<Ownership>(entity)
            && !gate.is_state_authority(ownership)
        {
            return Err(Rejected::NoAuthority {
                local: gate.local(),
                owner: ownership.owner,
            });
        }
        Ok(self.despawn_entity(entity))
    }

    /// The runtime destroyed an entity; drop the local copy.
    pub fn despawn_remote(&mut self, network_id: NetworkId) -> bool {
        match self.by_network_id.get(&network_id) {
            Some(&entity) => self.despawn_entity(entity),
            None => false,
        }
    }

    /// Destroys every entity the local participant holds state authority
    /// over. Returns how many were destroyed.
    pub fn despawn_owned_by(&mut self, gate: &AuthorityGate) -> usize {
        let mut query = self.world.query::<(Entity, &Ownership)>();
        let owned: Vec<Entity> = query
            .iter(&self.world)
            .filter(|(_, ownership)| gate.is_state_authority(ownership))
            .map(|(entity, _)| entity)
            .collect();
        owned
            .into_iter()
            .filter(|entity| self.despawn_entity(*entity))
            .count()
    }

    /// Forgets every entity. Used once the connection is gone.
    pub fn clear(&mut self) -> usize {
        let count = self.by_network_id.len();
        self.world.clear_entities();
        self.participants.clear();
        self.by_network_id.clear();
        self.session = None;
        count
    }

    fn despawn_entity(&mut self, entity: Entity) -> bool {
        if let Some(tag) = self.world.get::<ParticipantTag>(entity) {
            self.participants.remove(&tag.0);
            tracing::info!(participant = %tag.0, "participant despawned");
        }
        if let Some(network_id) = self.world.get::<NetworkId>(entity) {
            self.by_network_id.remove(network_id);
        }
        if self.session == Some(entity) {
            self.session = None;
        }
        self.world.despawn(entity)
    }

    /// Spawns the session entity, once. Later calls return the existing
    /// entity and ignore `descriptor`.
    pub fn spawn_session(&mut self, descriptor: SessionDescriptor, owner: ParticipantId) -> Entity {
        if let Some(entity) = self.session {
            return entity;
        }
        let network_id = self.allocate_network_id();
        let room = descriptor.room_name.clone();
        let entity = self
            .world
            .spawn((SessionEntity(descriptor), Ownership::new(owner), network_id))
            .id();
        self.session = Some(entity);
        self.by_network_id.insert(network_id, entity);
        tracing::info!(%room, "session entity spawned");
        entity
    }

    /// Descriptor of the live session entity.
    pub fn session(&self) -> Option<&SessionDescriptor> {
        self.session
            .and_then(|entity| self.world.get::<SessionEntity>(entity))
            .map(|s| &s.0)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn participant(&self, id: ParticipantId) -> Option<Entity> {
        self.participants.get(&id).copied()
    }

    /// Live participant ids in ascending order.
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.participants.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn network_id(&self, id: ParticipantId) -> Option<NetworkId> {
        self.participant(id)
            .and_then(|entity| self.world.get::<NetworkId>(entity))
            .copied()
    }

    pub fn ownership(&self, id: ParticipantId) -> Option<Ownership> {
        self.participant(id)
            .and_then(|entity| self.world.get::<Ownership>(entity))
            .copied()
    }

    /// Replicated fields of a participant's avatar.
    pub fn fields(&self, id: ParticipantId) -> Option<&ReplicatedEntity> {
        self.participant(id)
            .and_then(|entity| self.world.get::<ReplicatedEntity>(entity))
    }

    /// Mutable fields together with the avatar's ownership, for gated
    /// writes.
    pub fn fields_mut(
        &mut self,
        id: ParticipantId,
    ) -> Option<(Ownership, Mut<'_, ReplicatedEntity>)> {
        let entity = self.participant(id)?;
        let ownership = *self.world.get::<Ownership>(entity)?;
        let fields = self.world.get_mut::<ReplicatedEntity>(entity)?;
        Some((ownership, fields))
    }

    /// Gated write of one avatar field.
    pub fn set_field<T: FieldValue>(
        &mut self,
        id: ParticipantId,
        handle: FieldHandle<T>,
        value: T,
        gate: &AuthorityGate,
    ) -> Result<bool, ReplicationError> {
        let (ownership, mut fields) = self
            .fields_mut(id)
            .ok_or(Rejected::UnknownParticipant(id))?;
        fields.set(handle, value, gate, &ownership)
    }

    /// Outbound diffs of every entity the local participant may author.
    pub fn collect_changes(
        &mut self,
        gate: &AuthorityGate,
        tick: u64,
    ) -> Result<Vec<EntityUpdate>, ReplicationError> {
        let mut query = self
            .world
            .query::<(&NetworkId, &Ownership, &mut ReplicatedEntity)>();
        let mut updates = Vec::new();
        for (network_id, ownership, mut fields) in query.iter_mut(&mut self.world) {
            if !gate.can_write(ownership) {
                continue;
            }
            if let Some(update) = fields.collect_changes(*network_id, tick)? {
                updates.push(update);
            }
        }
        Ok(updates)
    }

    /// Applies a remote update. Returns `None` for unknown entities.
    pub fn apply_update(&mut self, update: &EntityUpdate) -> Option<ApplyReport> {
        let entity = *self.by_network_id.get(&update.network_id)?;
        let mut fields = self.world.get_mut::<ReplicatedEntity>(entity)?;
        Some(fields.apply_update(update))
    }

    fn allocate_network_id(&mut self) -> NetworkId {
        // Skip ids already filed by remote spawns.
        loop {
            let id = NetworkId(self.next_network_id);
            self.next_network_id += 1;
            if !self.by_network_id.contains_key(&id) {
                return id;
            }
        }
    }
}
