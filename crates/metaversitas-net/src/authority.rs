//! Authority decisions for replicated entities.
//!
//! The remote runtime assigns every entity an owner. Whether the local
//! process may write to it depends on the session topology:
//!
//! - **Client/server**: the owner holds *input authority*, the host holds
//!   *state authority* over everything.
//! - **Shared**: the owner holds both.
//!
//! [`AuthorityGate`] answers both questions as a pure function and is the
//! single check every mutating entry point goes through.

use std::fmt;

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Rejected;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable identifier of a participant for the lifetime of a session.
#[derive(
    Component, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ParticipantId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant#{}", self.0)
    }
}

/// How the remote runtime arbitrates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// One participant hosts and is canonical for every entity.
    ClientServer {
        /// The hosting participant.
        host: ParticipantId,
    },
    /// Every participant is canonical for the entities it owns.
    Shared,
}

/// Ownership record attached to every networked entity.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    /// Participant whose input drives the entity.
    pub owner: ParticipantId,
}

impl Ownership {
    /// Entity owned by `owner`.
    pub fn new(owner: ParticipantId) -> Self {
        Self { owner }
    }
}

// ---------------------------------------------------------------------------
// AuthorityGate
// ---------------------------------------------------------------------------

/// Decides what the local participant may do to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityGate {
    local: ParticipantId,
    topology: Topology,
}

impl AuthorityGate {
    /// Gate for `local` within a session of the given `topology`.
    pub fn new(local: ParticipantId, topology: Topology) -> Self {
        Self { local, topology }
    }

    /// The local participant.
    pub fn local(&self) -> ParticipantId {
        self.local
    }

    /// The session topology.
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Whether the local participant is the session owner (host in
    /// client/server, nobody in particular in shared mode).
    pub fn is_host(&self) -> bool {
        matches!(self.topology, Topology::ClientServer { host } if host == self.local)
    }

    /// Local input drives this entity.
    pub fn is_input_authority(&self, ownership: &Ownership) -> bool {
        ownership.owner == self.local
    }

    /// Local process is canonical for this entity's state.
    pub fn is_state_authority(&self, ownership: &Ownership) -> bool {
        match self.topology {
            Topology::ClientServer { host } => host == self.local,
            Topology::Shared => ownership.owner == self.local,
        }
    }

    /// Either authority permits authoring a write.
    pub fn can_write(&self, ownership: &Ownership) -> bool {
        self.is_input_authority(ownership) || self.is_state_authority(ownership)
    }

    /// [`can_write`](Self::can_write) as a `Result` for `?` chains.
    pub fn check_write(&self, ownership: &Ownership) -> Result<(), Rejected> {
        if self.can_write(ownership) {
            Ok(())
        } else {
            Err(Rejected::NoAuthority {
                local: self.local,
                owner: ownership.owner,
            })
        }
    }

    /// Like [`check_write`](Self::check_write) but only input authority
    /// counts. Used for actions that must originate from the controlling
    /// participant, such as interacting.
    pub fn check_input(&self, ownership: &Ownership) -> Result<(), Rejected> {
        if self.is_input_authority(ownership) {
            Ok(())
        } else {
            Err(Rejected::NoAuthority {
                local: self.local,
                owner: ownership.owner,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
