//! Session lifecycle: connecting, lobby browsing, starting a room, and
//! reacting to what the remote runtime reports.
//!
//! All requests are asynchronous. The coordinator issues them, records a
//! single pending operation, and resumes when the matching
//! [`ServiceEvent`] is pumped on a later simulation tick. Every event
//! carries the generation of the connection that produced it; tearing a
//! connection down bumps the generation so late events are dropped.

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

use crate::authority::{AuthorityGate, Ownership, ParticipantId, Topology};
use crate::backend::{
    EventSink, RemoteConnection, ServiceEvent, ServiceFailure, SessionBackend, StartGameRequest,
    StartedSession, TaggedEvent,
};
use crate::error::Rejected;
use crate::profile::{AuthSession, UserProfile};
use crate::registry::EntityRegistry;
use crate::session::{ConnectionStatus, GameMode, SessionDescriptor, SessionInfo};

type StatusObserver = Box<dyn FnMut(ConnectionStatus, Option<&str>) + Send>;
type SessionListCallback = Box<dyn FnMut(Option<&[SessionInfo]>) + Send>;

/// Static parameters of a [`SessionCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Preferred service region. Empty lets the service pick the best one.
    pub region: String,
    /// Custom lobby every room is listed in.
    pub lobby_id: String,
    /// Use the shared topology instead of client/server.
    pub shared_mode: bool,
    /// Upper bound on participants per room.
    pub player_limit: u32,
    /// Avatar name used until a profile arrives.
    pub display_name: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            region: String::new(),
            lobby_id: "metaversitas".to_string(),
            shared_mode: false,
            player_limit: 20,
            display_name: "Guest".to_string(),
        }
    }
}

#[derive(Debug)]
enum PendingOperation {
    Start {
        mode: GameMode,
        descriptor: SessionDescriptor,
    },
    Lobby,
}

/// The session the local participant is in.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    pub gate: AuthorityGate,
    pub mode: GameMode,
    pub descriptor: SessionDescriptor,
    pub session_owner: ParticipantId,
}

impl ActiveSession {
    pub fn local(&self) -> ParticipantId {
        self.gate.local()
    }

    pub fn is_session_owner(&self) -> bool {
        self.session_owner == self.gate.local()
    }
}

/// Drives [`ConnectionStatus`] and owns the connection to the runtime.
pub struct SessionCoordinator<B: SessionBackend> {
    backend: B,
    settings: CoordinatorSettings,
    connection: Option<Box<dyn RemoteConnection>>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    status: ConnectionStatus,
    status_tx: watch::Sender<ConnectionStatus>,
    status_observers: Vec<StatusObserver>,
    pending: Option<PendingOperation>,
    lobby_callback: Option<SessionListCallback>,
    sessions: Vec<SessionInfo>,
    session: Option<ActiveSession>,
    registry: EntityRegistry,
    profile: Option<(UserProfile, AuthSession)>,
}

impl<B: SessionBackend> SessionCoordinator<B> {
    pub fn new(backend: B, settings: CoordinatorSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        Self {
            backend,
            settings,
            connection: None,
            generation: 0,
            events_tx,
            events_rx,
            status: ConnectionStatus::default(),
            status_tx,
            status_observers: Vec::new(),
            pending: None,
            lobby_callback: None,
            sessions: Vec::new(),
            session: None,
            registry: EntityRegistry::new(),
            profile: None,
        }
    }

    // -- observation ------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Calls `observer(status, reason)` after every status change. The
    /// reason is only present for failures and shutdowns that report one.
    pub fn subscribe_status(
        &mut self,
        observer: impl FnMut(ConnectionStatus, Option<&str>) + Send + 'static,
    ) {
        self.status_observers.push(Box::new(observer));
    }

    /// Receiver that always holds the latest status.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn has_pending_operation(&self) -> bool {
        self.pending.is_some()
    }

    pub fn session(&self) -> Option<&ActiveSession> {
        self.session.as_ref()
    }

    pub fn gate(&self) -> Option<AuthorityGate> {
        self.session.as_ref().map(|s| s.gate)
    }

    pub fn local_participant(&self) -> Option<ParticipantId> {
        self.session.as_ref().map(ActiveSession::local)
    }

    /// Last session list received from the lobby.
    pub fn sessions(&self) -> &[SessionInfo] {
        &self.sessions
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref().map(|(p, _)| p)
    }

    pub fn auth_session(&self) -> Option<&AuthSession> {
        self.profile.as_ref().map(|(_, s)| s)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // -- operations -------------------------------------------------------

    /// Opens the connection unless one exists.
    pub fn connect(&mut self) {
        if self.connection.is_some() {
            return;
        }
        self.set_status(ConnectionStatus::Connecting, "");
        let sink = EventSink::new(self.events_tx.clone(), self.generation);
        self.connection = Some(self.backend.connect(sink));
    }

    /// Asks the runtime to start (or join) a room.
    pub fn start_session(
        &mut self,
        mode: GameMode,
        descriptor: SessionDescriptor,
        allow_client_session_creation: bool,
    ) -> Result<(), Rejected> {
        if self.pending.is_some() {
            return Err(Rejected::OperationPending);
        }
        self.connect();
        self.set_status(ConnectionStatus::Starting, "");

        let request = StartGameRequest {
            mode,
            region: (!self.settings.region.is_empty()).then(|| self.settings.region.clone()),
            lobby_id: self.settings.lobby_id.clone(),
            room_name: descriptor.room_name.clone(),
            properties: descriptor.to_properties(),
            player_limit: descriptor.capacity.min(self.settings.player_limit),
            disable_client_session_creation: !allow_client_session_creation,
            provide_input: mode.provides_input(),
        };
        tracing::info!(?mode, room = %descriptor.room_name, "starting session");
        self.pending = Some(PendingOperation::Start { mode, descriptor });
        if let Some(connection) = self.connection.as_mut() {
            connection.start_game(request);
        }
        Ok(())
    }

    /// Creates a room from `descriptor`, hosting it unless in shared mode.
    pub fn create_session(&mut self, descriptor: SessionDescriptor) -> Result<(), Rejected> {
        let shared = self.settings.shared_mode;
        let mode = if shared { GameMode::Shared } else { GameMode::Host };
        self.start_session(mode, descriptor, shared)
    }

    /// Joins a listed room. The room must be open with a free slot, and the
    /// password is checked locally.
    pub fn join_session(&mut self, info: &SessionInfo, password: &str) -> Result<(), Rejected> {
        if !info.can_join() {
            return Err(Rejected::SessionUnavailable(info.name.clone()));
        }
        let descriptor = info.descriptor();
        if !descriptor.verify_password(password) {
            return Err(Rejected::WrongPassword);
        }
        let mode = if self.settings.shared_mode {
            GameMode::Shared
        } else {
            GameMode::Client
        };
        self.start_session(mode, descriptor, false)
    }

    /// Joins `descriptor`'s room, creating it if nobody hosts it yet.
    pub fn auto_start(&mut self, descriptor: SessionDescriptor) -> Result<(), Rejected> {
        let mode = if self.settings.shared_mode {
            GameMode::Shared
        } else {
            GameMode::AutoHostOrClient
        };
        self.start_session(mode, descriptor, true)
    }

    /// Joins a lobby. `on_list_updated` receives every session list, or
    /// `None` once if joining fails.
    pub fn enter_lobby(
        &mut self,
        lobby_id: &str,
        on_list_updated: impl FnMut(Option<&[SessionInfo]>) + Send + 'static,
    ) -> Result<(), Rejected> {
        if self.pending.is_some() {
            return Err(Rejected::OperationPending);
        }
        self.connect();
        self.settings.lobby_id = lobby_id.to_string();
        self.lobby_callback = Some(Box::new(on_list_updated));
        self.set_status(ConnectionStatus::EnteringLobby, "");
        self.pending = Some(PendingOperation::Lobby);
        if let Some(connection) = self.connection.as_mut() {
            connection.join_lobby(lobby_id);
        }
        Ok(())
    }

    /// Closes the connection and forgets the session.
    pub fn disconnect(&mut self) {
        if self.connection.is_none() {
            return;
        }
        self.set_status(ConnectionStatus::Disconnected, "");
        self.teardown(true);
    }

    /// Applies queued events from the current connection. Returns how many
    /// were applied.
    pub fn pump_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(tagged) = self.events_rx.try_recv() {
            if tagged.generation != self.generation {
                tracing::debug!(
                    stale = tagged.generation,
                    current = self.generation,
                    "dropping event from closed connection"
                );
                continue;
            }
            self.handle_event(tagged.event);
            applied += 1;
        }
        applied
    }

    /// Per-tick work: apply events, then ship outbound field changes.
    pub fn update(&mut self, tick: u64) {
        self.pump_events();
        let Some(gate) = self.gate() else {
            return;
        };
        match self.registry.collect_changes(&gate, tick) {
            Ok(updates) if !updates.is_empty() => {
                if let Some(connection) = self.connection.as_mut() {
                    connection.send_updates(updates);
                }
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(%err, tick, "cannot collect replicated changes"),
        }
    }

    // -- event handling ---------------------------------------------------

    fn handle_event(&mut self, event: ServiceEvent) {
        match event {
            ServiceEvent::StartGameCompleted(Ok(started)) => self.on_started(started),
            ServiceEvent::StartGameCompleted(Err(failure)) => {
                self.pending = None;
                self.fail(failure);
            }
            ServiceEvent::LobbyJoinCompleted(Ok(())) => {
                self.pending = None;
                self.set_status(ConnectionStatus::InLobby, "");
            }
            ServiceEvent::LobbyJoinCompleted(Err(failure)) => {
                self.pending = None;
                let callback = self.lobby_callback.take();
                self.fail(failure);
                if let Some(mut callback) = callback {
                    callback(None);
                }
            }
            ServiceEvent::SessionListUpdated(list) => {
                let lobby_pending = matches!(self.pending, Some(PendingOperation::Lobby));
                if lobby_pending {
                    self.pending = None;
                }
                // Listings may keep arriving after a room started.
                if lobby_pending
                    || matches!(
                        self.status,
                        ConnectionStatus::EnteringLobby | ConnectionStatus::InLobby
                    )
                {
                    self.set_status(ConnectionStatus::InLobby, "");
                }
                if let Some(callback) = self.lobby_callback.as_mut() {
                    callback(Some(&list));
                }
                self.sessions = list;
            }
            ServiceEvent::ConnectedToServer => {
                // A pending request decides the status once it completes.
                if self.pending.is_none() {
                    self.set_status(ConnectionStatus::Connected, "");
                }
            }
            ServiceEvent::DisconnectedFromServer => self.disconnect(),
            ServiceEvent::ConnectFailed { reason } => {
                tracing::warn!(%reason, "connect failed");
                let callback = if matches!(self.pending, Some(PendingOperation::Lobby)) {
                    self.lobby_callback.take()
                } else {
                    None
                };
                self.disconnect();
                self.set_status(ConnectionStatus::Failed, &reason);
                if let Some(mut callback) = callback {
                    callback(None);
                }
            }
            ServiceEvent::PlayerJoined(participant) => self.on_player_joined(participant),
            ServiceEvent::PlayerLeft(participant) => self.on_player_left(participant),
            ServiceEvent::EntitySpawned {
                network_id,
                owner,
                display_name,
            } => {
                self.registry
                    .spawn_remote_participant(owner, network_id, &display_name);
            }
            ServiceEvent::EntityDespawned(network_id) => {
                self.registry.despawn_remote(network_id);
            }
            ServiceEvent::FieldUpdates(updates) => {
                for update in &updates {
                    if self.registry.apply_update(update).is_none() {
                        tracing::warn!(
                            network_id = update.network_id.0,
                            "update for unknown entity"
                        );
                    }
                }
            }
            ServiceEvent::Shutdown { reason } => {
                tracing::warn!(%reason, "runtime shut down");
                self.set_status(ConnectionStatus::Disconnected, &reason);
                self.teardown(false);
            }
            ServiceEvent::CustomAuthResponse(data) => self.on_auth_response(&data),
        }
    }

    fn on_started(&mut self, started: StartedSession) {
        let Some(PendingOperation::Start { mode, descriptor }) = self.pending.take() else {
            tracing::warn!("start completion without a pending start");
            return;
        };
        let session = ActiveSession {
            gate: AuthorityGate::new(started.local, started.topology),
            mode,
            descriptor,
            session_owner: started.session_owner,
        };
        if session.is_session_owner() {
            self.registry
                .spawn_session(session.descriptor.clone(), started.local);
        }
        // Clients wait for the host to spawn their avatar.
        let local_owned = Ownership::new(started.local);
        if mode.provides_input() && session.gate.is_state_authority(&local_owned) {
            let name = self.display_name().to_string();
            self.registry.spawn_participant(started.local, &name);
        }
        tracing::info!(local = %started.local, topology = ?started.topology, "session started");
        self.session = Some(session);
        self.set_status(ConnectionStatus::Started, "");
    }

    /// Host spawns every avatar; in shared mode each participant spawns
    /// only its own.
    fn on_player_joined(&mut self, participant: ParticipantId) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let spawns = match session.gate.topology() {
            Topology::ClientServer { .. } => session.gate.is_host(),
            Topology::Shared => participant == session.local(),
        };
        if spawns {
            let name = if participant == session.local() {
                self.display_name().to_string()
            } else {
                participant.to_string()
            };
            self.registry.spawn_participant(participant, &name);
        }
    }

    fn on_player_left(&mut self, participant: ParticipantId) {
        let Some(gate) = self.gate() else {
            return;
        };
        if !gate.is_host() {
            return;
        }
        if let Err(err) = self.registry.despawn_participant(participant, &gate) {
            tracing::warn!(%err, "cannot despawn departed participant");
        }
    }

    fn on_auth_response(&mut self, data: &Map<String, Value>) {
        match UserProfile::from_auth_response(data) {
            Ok((profile, auth)) => {
                tracing::info!(user = %profile.user_id, role = ?profile.role, "profile received");
                self.profile = Some((profile, auth));
            }
            Err(err) => tracing::error!(%err, "cannot parse authentication response"),
        }
    }

    fn display_name(&self) -> &str {
        self.profile()
            .map(UserProfile::display_name)
            .unwrap_or(self.settings.display_name.as_str())
    }

    // -- internals --------------------------------------------------------

    /// Reports a failed operation and drops the connection so the next
    /// request reconnects.
    fn fail(&mut self, failure: ServiceFailure) {
        tracing::warn!(reason = %failure.reason, "session operation failed");
        self.teardown(true);
        self.set_status(ConnectionStatus::Failed, &failure.reason);
    }

    fn teardown(&mut self, shutdown_connection: bool) {
        if let Some(mut connection) = self.connection.take()
            && shutdown_connection
        {
            connection.shutdown();
        }
        self.generation += 1;
        self.pending = None;
        self.lobby_callback = None;
        if let Some(session) = self.session.take() {
            let destroyed = self.registry.despawn_owned_by(&session.gate);
            tracing::info!(destroyed, "released owned entities");
        }
        self.registry.clear();
    }

    /// Idempotent: setting the current status again does nothing.
    fn set_status(&mut self, status: ConnectionStatus, reason: &str) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        let reason = reason.trim();
        let reason = (!reason.is_empty() && reason != "Ok").then_some(reason);
        tracing::info!(?status, reason = reason.unwrap_or(""), "connection status");
        self.status_tx.send_replace(status);
        for observer in &mut self.status_observers {
            observer(status, reason);
        }
        true
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
