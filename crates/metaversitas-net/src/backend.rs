//! Boundary to the remote multiplayer runtime.
//!
//! A [`SessionBackend`] opens [`RemoteConnection`]s. Requests go out as
//! plain method calls; every response or notification comes back as a
//! [`ServiceEvent`] pushed into an [`EventSink`], tagged with the
//! generation of the connection that produced it.
//!
//! [`LoopbackBackend`] is an in-process runtime that answers requests
//! immediately (or not at all, in manual mode) and records what it was
//! asked to do.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::authority::{ParticipantId, Topology};
use crate::replication::{EntityUpdate, NetworkId};
use crate::session::{GameMode, Properties, SessionInfo};

/// Reason string reported by the remote service for a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ServiceFailure {
    pub reason: String,
}

impl ServiceFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Result of a successful start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartedSession {
    /// Id the runtime assigned to the local participant.
    pub local: ParticipantId,
    pub topology: Topology,
    /// Host in client/server, master client in shared mode.
    pub session_owner: ParticipantId,
}

/// Parameters of a start request.
#[derive(Debug, Clone, PartialEq)]
pub struct StartGameRequest {
    pub mode: GameMode,
    /// Fixed service region; `None` means best region.
    pub region: Option<String>,
    pub lobby_id: String,
    pub room_name: String,
    pub properties: Properties,
    pub player_limit: u32,
    /// Refuse to create the room if it does not exist yet.
    pub disable_client_session_creation: bool,
    pub provide_input: bool,
}

/// Everything the remote runtime can tell the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent {
    StartGameCompleted(Result<StartedSession, ServiceFailure>),
    LobbyJoinCompleted(Result<(), ServiceFailure>),
    SessionListUpdated(Vec<SessionInfo>),
    ConnectedToServer,
    DisconnectedFromServer,
    ConnectFailed { reason: String },
    PlayerJoined(ParticipantId),
    PlayerLeft(ParticipantId),
    EntitySpawned {
        network_id: NetworkId,
        owner: ParticipantId,
        display_name: String,
    },
    EntityDespawned(NetworkId),
    FieldUpdates(Vec<EntityUpdate>),
    Shutdown { reason: String },
    CustomAuthResponse(Map<String, Value>),
}

/// A [`ServiceEvent`] stamped with its connection generation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: ServiceEvent,
}

/// Sending half handed to a connection when it is opened.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TaggedEvent>,
    generation: u64,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<TaggedEvent>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues an event. Returns `false` if the client is gone.
    pub fn send(&self, event: ServiceEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Factory for connections to the remote runtime.
pub trait SessionBackend {
    /// Opens a connection whose events go to `events`.
    fn connect(&mut self, events: EventSink) -> Box<dyn RemoteConnection>;
}

/// One live connection. Completion of every request arrives as an event.
pub trait RemoteConnection: Send {
    fn start_game(&mut self, request: StartGameRequest);
    fn join_lobby(&mut self, lobby_id: &str);
    /// Ships outbound field changes collected this tick.
    fn send_updates(&mut self, updates: Vec<EntityUpdate>);
    /// Closes the connection. No further events are expected.
    fn shutdown(&mut self);
}

// ---------------------------------------------------------------------------
// Loopback
// ---------------------------------------------------------------------------

/// A request observed by [`LoopbackBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoopbackRequest {
    StartGame(StartGameRequest),
    JoinLobby(String),
    SendUpdates(Vec<EntityUpdate>),
    Shutdown,
}

#[derive(Default)]
struct LoopbackState {
    connections: usize,
    requests: Vec<LoopbackRequest>,
    sinks: Vec<EventSink>,
    start_failure: Option<String>,
    lobby_failure: Option<String>,
    sessions: Vec<SessionInfo>,
    manual: bool,
}

/// In-process runtime. Clones share state, so a test can keep one clone
/// to inspect and script the one it handed to the coordinator.
#[derive(Clone, Default)]
pub struct LoopbackBackend {
    state: Arc<Mutex<LoopbackState>>,
}

/// Host id used by the loopback when the local participant joins as a
/// client.
pub const LOOPBACK_HOST: ParticipantId = ParticipantId(1);
/// Id given to a local participant joining as a client.
pub const LOOPBACK_CLIENT: ParticipantId = ParticipantId(2);
/// Network id the loopback host assigns to its own avatar.
pub const LOOPBACK_HOST_AVATAR: NetworkId = NetworkId(1);
/// Network id the loopback host assigns to a joining client's avatar.
pub const LOOPBACK_CLIENT_AVATAR: NetworkId = NetworkId(2);

impl LoopbackBackend {
    /// Backend that accepts every request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop answering requests; the test sends events through
    /// [`last_sink`](Self::last_sink) instead.
    pub fn manual(self) -> Self {
        self.lock().manual = true;
        self
    }

    pub fn failing_start(self, reason: impl Into<String>) -> Self {
        self.lock().start_failure = Some(reason.into());
        self
    }

    pub fn failing_lobby(self, reason: impl Into<String>) -> Self {
        self.lock().lobby_failure = Some(reason.into());
        self
    }

    /// Listing delivered after a lobby join.
    pub fn with_sessions(self, sessions: Vec<SessionInfo>) -> Self {
        self.lock().sessions = sessions;
        self
    }

    /// Connections opened so far.
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    pub fn requests(&self) -> Vec<LoopbackRequest> {
        self.lock().requests.clone()
    }

    /// Sink of the most recently opened connection.
    pub fn last_sink(&self) -> Option<EventSink> {
        self.lock().sinks.last().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionBackend for LoopbackBackend {
    fn connect(&mut self, events: EventSink) -> Box<dyn RemoteConnection> {
        let mut state = self.lock();
        state.connections += 1;
        state.sinks.push(events.clone());
        tracing::debug!(generation = events.generation(), "loopback connection opened");
        Box::new(LoopbackConnection {
            state: Arc::clone(&self.state),
            sink: events,
        })
    }
}

struct LoopbackConnection {
    state: Arc<Mutex<LoopbackState>>,
    sink: EventSink,
}

impl LoopbackConnection {
    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn started(mode: GameMode) -> StartedSession {
        match mode {
            GameMode::Client => StartedSession {
                local: LOOPBACK_CLIENT,
                topology: Topology::ClientServer {
                    host: LOOPBACK_HOST,
                },
                session_owner: LOOPBACK_HOST,
            },
            GameMode::Shared => StartedSession {
                local: LOOPBACK_HOST,
                topology: Topology::Shared,
                session_owner: LOOPBACK_HOST,
            },
            GameMode::Host | GameMode::AutoHostOrClient | GameMode::Server => StartedSession {
                local: LOOPBACK_HOST,
                topology: Topology::ClientServer {
                    host: LOOPBACK_HOST,
                },
                session_owner: LOOPBACK_HOST,
            },
        }
    }
}

impl RemoteConnection for LoopbackConnection {
    fn start_game(&mut self, request: StartGameRequest) {
        let mode = request.mode;
        let (manual, failure) = {
            let mut state = self.lock();
            state.requests.push(LoopbackRequest::StartGame(request));
            (state.manual, state.start_failure.clone())
        };
        if manual {
            return;
        }
        match failure {
            Some(reason) => {
                self.sink
                    .send(ServiceEvent::StartGameCompleted(Err(ServiceFailure::new(reason))));
            }
            None => {
                if mode == GameMode::Client {
                    self.sink.send(ServiceEvent::ConnectedToServer);
                }
                self.sink
                    .send(ServiceEvent::StartGameCompleted(Ok(Self::started(mode))));
                if mode == GameMode::Client {
                    // The host owns avatar creation and announces both.
                    for (owner, network_id) in [
                        (LOOPBACK_HOST, LOOPBACK_HOST_AVATAR),
                        (LOOPBACK_CLIENT, LOOPBACK_CLIENT_AVATAR),
                    ] {
                        self.sink.send(ServiceEvent::EntitySpawned {
                            network_id,
                            owner,
                            display_name: owner.to_string(),
                        });
                    }
                }
            }
        }
    }

    fn join_lobby(&mut self, lobby_id: &str) {
        let (manual, failure, sessions) = {
            let mut state = self.lock();
            state.requests.push(LoopbackRequest::JoinLobby(lobby_id.to_string()));
            (state.manual, state.lobby_failure.clone(), state.sessions.clone())
        };
        if manual {
            return;
        }
        match failure {
            Some(reason) => {
                self.sink
                    .send(ServiceEvent::LobbyJoinCompleted(Err(ServiceFailure::new(reason))));
            }
            None => {
                self.sink.send(ServiceEvent::LobbyJoinCompleted(Ok(())));
                self.sink.send(ServiceEvent::SessionListUpdated(sessions));
            }
        }
    }

    fn send_updates(&mut self, updates: Vec<EntityUpdate>) {
        self.lock().requests.push(LoopbackRequest::SendUpdates(updates));
    }

    fn shutdown(&mut self) {
        self.lock().requests.push(LoopbackRequest::Shutdown);
    }
}
