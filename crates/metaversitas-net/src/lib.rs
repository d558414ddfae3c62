//! Client core of the Metaversitas multi-user virtual campus: session
//! lifecycle, ownership-gated field replication, interaction with campus
//! objects, and the fixed-tick loop that drives them.

pub mod authority;
pub mod backend;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod game_state;
pub mod input;
pub mod interaction;
pub mod profile;
pub mod registry;
pub mod replication;
pub mod scheduler;
pub mod session;

pub use authority::{AuthorityGate, Ownership, ParticipantId, Topology};
pub use backend::{
    EventSink, LoopbackBackend, RemoteConnection, ServiceEvent, ServiceFailure, SessionBackend,
    StartGameRequest, StartedSession,
};
pub use client::MetaverseClient;
pub use coordinator::{ActiveSession, CoordinatorSettings, SessionCoordinator};
pub use error::Rejected;
pub use game_state::{GameState, GameStateMachine, StateChange};
pub use input::{ButtonFlags, InputCollector, InputSample};
pub use interaction::{
    Apparatus, InformativeObject, Interactable, InteractableId, Interactables,
    InteractionController, InteractionResult,
};
pub use profile::{AuthSession, UniversityRole, UserProfile};
pub use registry::{EntityRegistry, ParticipantFields};
pub use replication::{EntityUpdate, FieldHandle, NetworkId, ReplicatedEntity, ReplicationError};
pub use scheduler::{Stage, TickInfo, TickScheduler, TickTimer};
pub use session::{
    ConnectionStatus, GameMode, MapIndex, PlayMode, SessionDescriptor, SessionInfo,
};
