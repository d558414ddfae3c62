//! Unit tests for the session coordinator, driven by the loopback backend.

use std::sync::{Arc, Mutex};

use serde_json::json;

use super::*;
use crate::backend::{
    LOOPBACK_CLIENT, LOOPBACK_CLIENT_AVATAR, LOOPBACK_HOST, LOOPBACK_HOST_AVATAR, LoopbackBackend,
    LoopbackRequest,
};
use crate::registry::ParticipantFields;
use crate::replication::{EntityUpdate, NetworkId};
use crate::session::{Properties, PropertyValue};

type StatusLog = Arc<Mutex<Vec<(ConnectionStatus, Option<String>)>>>;

/// Helper: coordinator over `backend` plus a log of status notifications.
fn coordinator_with(
    backend: LoopbackBackend,
    settings: CoordinatorSettings,
) -> (SessionCoordinator<LoopbackBackend>, StatusLog) {
    let mut coordinator = SessionCoordinator::new(backend, settings);
    let log: StatusLog = Arc::default();
    let sink = Arc::clone(&log);
    coordinator.subscribe_status(move |status, reason| {
        sink.lock()
            .unwrap()
            .push((status, reason.map(str::to_string)))
    });
    (coordinator, log)
}

fn coordinator(backend: LoopbackBackend) -> (SessionCoordinator<LoopbackBackend>, StatusLog) {
    coordinator_with(backend, CoordinatorSettings::default())
}

fn statuses(log: &StatusLog) -> Vec<ConnectionStatus> {
    log.lock().unwrap().iter().map(|(s, _)| *s).collect()
}

fn listing(name: &str, password: &str) -> SessionInfo {
    let descriptor = SessionDescriptor {
        password: password.to_string(),
        ..SessionDescriptor::named(name)
    };
    SessionInfo {
        name: name.to_string(),
        region: "asia".to_string(),
        player_count: 1,
        max_players: 20,
        is_open: true,
        properties: descriptor.to_properties(),
    }
}

#[test]
fn test_connect_twice_creates_one_connection() {
    let backend = LoopbackBackend::new();
    let (mut coordinator, log) = coordinator(backend.clone());

    coordinator.connect();
    coordinator.connect();

    assert_eq!(backend.connections(), 1);
    assert_eq!(statuses(&log), vec![ConnectionStatus::Connecting]);
}

#[test]
fn test_host_start_reports_status_sequence() {
    let (mut coordinator, log) = coordinator(LoopbackBackend::new());

    coordinator
        .start_session(GameMode::Host, SessionDescriptor::named("Room1"), true)
        .unwrap();
    coordinator.pump_events();

    assert_eq!(
        statuses(&log),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Starting,
            ConnectionStatus::Started
        ]
    );
    let registry = coordinator.registry();
    assert_eq!(registry.participant_count(), 1);
    assert!(registry.participant(LOOPBACK_HOST).is_some());
    assert_eq!(registry.session().unwrap().room_name, "Room1");
    assert_eq!(coordinator.local_participant(), Some(LOOPBACK_HOST));
    assert!(coordinator.session().unwrap().is_session_owner());
}

#[test]
fn test_start_request_carries_descriptor() {
    let backend = LoopbackBackend::new();
    let (mut coordinator, _) = coordinator(backend.clone());
    let descriptor = SessionDescriptor {
        capacity: 8,
        ..SessionDescriptor::named("Lab A")
    };

    coordinator.create_session(descriptor.clone()).unwrap();

    let requests = backend.requests();
    let [LoopbackRequest::StartGame(request)] = requests.as_slice() else {
        panic!("expected one start request, got {requests:?}");
    };
    assert_eq!(request.mode, GameMode::Host);
    assert_eq!(request.room_name, "Lab A");
    assert_eq!(request.lobby_id, "metaversitas");
    assert_eq!(request.player_limit, 8);
    assert_eq!(request.properties, descriptor.to_properties());
    assert!(request.disable_client_session_creation);
    assert_eq!(request.region, None);
}

#[test]
fn test_start_request_carries_region() {
    let backend = LoopbackBackend::new();
    let settings = CoordinatorSettings {
        region: "asia".into(),
        ..CoordinatorSettings::default()
    };
    let (mut coordinator, _) = coordinator_with(backend.clone(), settings);

    coordinator
        .create_session(SessionDescriptor::default())
        .unwrap();

    let Some(LoopbackRequest::StartGame(request)) = backend.requests().into_iter().next() else {
        panic!("expected a start request");
    };
    assert_eq!(request.region.as_deref(), Some("asia"));
}

#[test]
fn test_lobby_failure_invokes_callback_with_none_once() {
    let backend = LoopbackBackend::new().failing_lobby("Timeout");
    let (mut coordinator, log) = coordinator(backend.clone());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);

    coordinator
        .enter_lobby("roomA", move |list| {
            sink.lock().unwrap().push(list.map(<[SessionInfo]>::len))
        })
        .unwrap();
    coordinator.pump_events();
    coordinator.pump_events();

    assert_eq!(coordinator.status(), ConnectionStatus::Failed);
    assert_eq!(*calls.lock().unwrap(), vec![None]);
    assert_eq!(
        log.lock().unwrap().last().cloned(),
        Some((ConnectionStatus::Failed, Some("Timeout".to_string())))
    );

    // The failed connection was dropped; trying again reconnects.
    assert!(!coordinator.is_connected());
    coordinator.connect();
    assert_eq!(backend.connections(), 2);
}

#[test]
fn test_lobby_delivers_session_list() {
    let backend = LoopbackBackend::new().with_sessions(vec![listing("Room1", "")]);
    let (mut coordinator, log) = coordinator(backend);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);

    coordinator
        .enter_lobby("roomA", move |list| {
            sink.lock().unwrap().push(list.map(<[SessionInfo]>::len))
        })
        .unwrap();
    coordinator.pump_events();

    assert_eq!(*calls.lock().unwrap(), vec![Some(1)]);
    assert_eq!(coordinator.sessions().len(), 1);
    assert_eq!(coordinator.settings().lobby_id, "roomA");
    // Completion and listing both mean InLobby; notified once.
    assert_eq!(
        statuses(&log),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::EnteringLobby,
            ConnectionStatus::InLobby
        ]
    );
}

#[test]
fn test_second_operation_rejected_while_pending() {
    let backend = LoopbackBackend::new().manual();
    let (mut coordinator, _) = coordinator(backend.clone());

    coordinator
        .start_session(GameMode::Host, SessionDescriptor::default(), true)
        .unwrap();

    assert_eq!(
        coordinator.enter_lobby("roomA", |_| {}),
        Err(Rejected::OperationPending)
    );
    assert_eq!(
        coordinator.create_session(SessionDescriptor::default()),
        Err(Rejected::OperationPending)
    );
    assert_eq!(backend.requests().len(), 1);
}

#[test]
fn test_disconnect_discards_stale_events() {
    let backend = LoopbackBackend::new().manual();
    let (mut coordinator, _) = coordinator(backend.clone());
    coordinator
        .start_session(GameMode::Host, SessionDescriptor::default(), true)
        .unwrap();
    let stale = backend.last_sink().unwrap();

    coordinator.disconnect();
    assert!(stale.send(ServiceEvent::StartGameCompleted(Ok(StartedSession {
        local: LOOPBACK_HOST,
        topology: Topology::ClientServer {
            host: LOOPBACK_HOST
        },
        session_owner: LOOPBACK_HOST,
    }))));

    assert_eq!(coordinator.pump_events(), 0);
    assert_eq!(coordinator.status(), ConnectionStatus::Disconnected);
    assert_eq!(coordinator.registry().participant_count(), 0);
    assert!(!coordinator.has_pending_operation());
    assert_eq!(backend.requests().last(), Some(&LoopbackRequest::Shutdown));
}

#[test]
fn test_disconnect_destroys_owned_entities() {
    let (mut coordinator, _) = coordinator(LoopbackBackend::new());
    coordinator
        .start_session(GameMode::Host, SessionDescriptor::default(), true)
        .unwrap();
    coordinator.pump_events();
    assert_eq!(coordinator.registry().participant_count(), 1);

    coordinator.disconnect();

    assert_eq!(coordinator.registry().participant_count(), 0);
    assert!(coordinator.registry().session().is_none());
    assert!(coordinator.session().is_none());
}

#[test]
fn test_start_failure_reports_reason_and_allows_retry() {
    let backend = LoopbackBackend::new().failing_start("GameNotFound");
    let (mut coordinator, log) = coordinator(backend.clone());

    coordinator
        .start_session(GameMode::Client, SessionDescriptor::default(), false)
        .unwrap();
    coordinator.pump_events();

    assert_eq!(coordinator.status(), ConnectionStatus::Failed);
    assert_eq!(
        log.lock().unwrap().last().cloned(),
        Some((ConnectionStatus::Failed, Some("GameNotFound".to_string())))
    );
    assert!(coordinator.session().is_none());

    assert!(coordinator
        .start_session(GameMode::Client, SessionDescriptor::default(), false)
        .is_ok());
    assert_eq!(backend.connections(), 2);
}

#[test]
fn test_join_session_checks_password() {
    let backend = LoopbackBackend::new();
    let (mut coordinator, log) = coordinator(backend.clone());
    let info = listing("Kelas Fisika", "kunci");

    assert_eq!(
        coordinator.join_session(&info, "salah"),
        Err(Rejected::WrongPassword)
    );
    assert_eq!(backend.connections(), 0);
    assert_eq!(coordinator.status(), ConnectionStatus::Disconnected);

    coordinator.join_session(&info, "kunci").unwrap();
    coordinator.pump_events();

    assert_eq!(coordinator.status(), ConnectionStatus::Started);
    assert_eq!(
        statuses(&log),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Starting,
            ConnectionStatus::Started
        ]
    );
    let session = coordinator.session().unwrap();
    assert_eq!(session.local(), LOOPBACK_CLIENT);
    assert_eq!(session.mode, GameMode::Client);
    assert_eq!(session.descriptor.room_name, "Kelas Fisika");
    // Clients never spawn the session entity.
    assert!(coordinator.registry().session().is_none());
}

#[test]
fn test_join_session_rejects_full_or_closed_rooms() {
    let backend = LoopbackBackend::new();
    let (mut coordinator, log) = coordinator(backend.clone());
    let full = SessionInfo {
        player_count: 20,
        ..listing("Penuh", "")
    };
    let closed = SessionInfo {
        is_open: false,
        ..listing("Tutup", "")
    };

    assert_eq!(
        coordinator.join_session(&full, ""),
        Err(Rejected::SessionUnavailable("Penuh".into()))
    );
    assert_eq!(
        coordinator.join_session(&closed, ""),
        Err(Rejected::SessionUnavailable("Tutup".into()))
    );
    assert_eq!(backend.connections(), 0);
    assert!(backend.requests().is_empty());
    assert!(statuses(&log).is_empty());
}

#[test]
fn test_connect_failure_during_lobby_entry_answers_callback() {
    let backend = LoopbackBackend::new().manual();
    let (mut coordinator, log) = coordinator(backend.clone());
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);

    coordinator
        .enter_lobby("roomA", move |list| {
            sink.lock().unwrap().push(list.map(<[SessionInfo]>::len))
        })
        .unwrap();
    backend.last_sink().unwrap().send(ServiceEvent::ConnectFailed {
        reason: "ServerRefused".into(),
    });
    coordinator.pump_events();
    coordinator.pump_events();

    assert_eq!(coordinator.status(), ConnectionStatus::Failed);
    assert_eq!(*calls.lock().unwrap(), vec![None]);
    assert_eq!(
        log.lock().unwrap().last().cloned(),
        Some((ConnectionStatus::Failed, Some("ServerRefused".to_string())))
    );
    assert!(!coordinator.has_pending_operation());
}

#[test]
fn test_listing_after_start_keeps_started_status() {
    let backend = LoopbackBackend::new();
    let (mut coordinator, log) = coordinator(backend.clone());
    coordinator
        .start_session(GameMode::Host, SessionDescriptor::default(), true)
        .unwrap();
    coordinator.pump_events();

    backend
        .last_sink()
        .unwrap()
        .send(ServiceEvent::SessionListUpdated(vec![listing("Room9", "")]));
    coordinator.pump_events();

    assert_eq!(coordinator.status(), ConnectionStatus::Started);
    assert_eq!(statuses(&log).last(), Some(&ConnectionStatus::Started));
    assert!(coordinator.session().is_some());
    assert_eq!(coordinator.sessions().len(), 1);
}

#[test]
fn test_connected_notification_outside_operations() {
    let backend = LoopbackBackend::new().manual();
    let (mut coordinator, _) = coordinator(backend.clone());
    coordinator.connect();

    backend
        .last_sink()
        .unwrap()
        .send(ServiceEvent::ConnectedToServer);
    coordinator.pump_events();

    assert_eq!(coordinator.status(), ConnectionStatus::Connected);
}

#[test]
fn test_connect_failed_reports_reason() {
    let backend = LoopbackBackend::new().manual();
    let (mut coordinator, log) = coordinator(backend.clone());
    coordinator.connect();

    backend.last_sink().unwrap().send(ServiceEvent::ConnectFailed {
        reason: "ServerRefused".into(),
    });
    coordinator.pump_events();

    assert_eq!(
        statuses(&log),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Disconnected,
            ConnectionStatus::Failed
        ]
    );
    assert!(!coordinator.is_connected());
}

#[test]
fn test_host_spawns_joiners_and_despawns_leavers() {
    let backend = LoopbackBackend::new();
    let (mut coordinator, _) = coordinator(backend.clone());
    coordinator
        .start_session(GameMode::Host, SessionDescriptor::default(), true)
        .unwrap();
    coordinator.pump_events();
    let sink = backend.last_sink().unwrap();

    sink.send(ServiceEvent::PlayerJoined(ParticipantId(5)));
    coordinator.pump_events();
    assert_eq!(
        coordinator.registry().participant_ids(),
        vec![LOOPBACK_HOST, ParticipantId(5)]
    );

    sink.send(ServiceEvent::PlayerLeft(ParticipantId(5)));
    coordinator.pump_events();
    assert_eq!(coordinator.registry().participant_ids(), vec![LOOPBACK_HOST]);
}

#[test]
fn test_shared_mode_spawns_only_local_participant() {
    let backend = LoopbackBackend::new();
    let settings = CoordinatorSettings {
        shared_mode: true,
        ..CoordinatorSettings::default()
    };
    let (mut coordinator, _) = coordinator_with(backend.clone(), settings);
    coordinator
        .create_session(SessionDescriptor::default())
        .unwrap();
    coordinator.pump_events();
    assert_eq!(coordinator.session().unwrap().mode, GameMode::Shared);

    backend
        .last_sink()
        .unwrap()
        .send(ServiceEvent::PlayerJoined(ParticipantId(9)));
    coordinator.pump_events();

    assert_eq!(coordinator.registry().participant_ids(), vec![LOOPBACK_HOST]);
}

fn yaw_update(network_id: NetworkId, tick: u64, yaw: f32) -> EntityUpdate {
    EntityUpdate {
        network_id,
        tick,
        fields: vec![("yaw".into(), postcard::to_allocvec(&yaw).unwrap())],
    }
}

fn shipped_updates(backend: &LoopbackBackend) -> Vec<Vec<EntityUpdate>> {
    backend
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            LoopbackRequest::SendUpdates(updates) => Some(updates),
            _ => None,
        })
        .collect()
}

#[test]
fn test_remote_entities_follow_spawn_and_field_events() {
    let backend = LoopbackBackend::new();
    let (mut coordinator, _) = coordinator(backend.clone());
    coordinator
        .join_session(&listing("Room1", ""), "")
        .unwrap();
    coordinator.pump_events();

    // The host announced both avatars under its own ids.
    let registry = coordinator.registry();
    assert_eq!(registry.network_id(LOOPBACK_HOST), Some(LOOPBACK_HOST_AVATAR));
    assert_eq!(registry.network_id(LOOPBACK_CLIENT), Some(LOOPBACK_CLIENT_AVATAR));

    let sink = backend.last_sink().unwrap();
    sink.send(ServiceEvent::FieldUpdates(vec![yaw_update(
        LOOPBACK_HOST_AVATAR,
        3,
        0.5,
    )]));
    coordinator.pump_events();

    let fields = coordinator.registry().fields(LOOPBACK_HOST).unwrap();
    assert_eq!(fields.get(ParticipantFields::YAW), Some(&0.5));
    let fields = coordinator.registry().fields(LOOPBACK_CLIENT).unwrap();
    assert_eq!(fields.get(ParticipantFields::YAW), Some(&0.0));

    sink.send(ServiceEvent::EntityDespawned(LOOPBACK_HOST_AVATAR));
    coordinator.pump_events();
    assert!(coordinator.registry().participant(LOOPBACK_HOST).is_none());
    assert!(coordinator.registry().participant(LOOPBACK_CLIENT).is_some());
}

#[test]
fn test_client_ships_updates_under_host_assigned_id() {
    let backend = LoopbackBackend::new().manual();
    let (mut coordinator, _) = coordinator(backend.clone());
    coordinator
        .join_session(&listing("Room1", ""), "")
        .unwrap();
    let sink = backend.last_sink().unwrap();

    sink.send(ServiceEvent::StartGameCompleted(Ok(StartedSession {
        local: LOOPBACK_CLIENT,
        topology: Topology::ClientServer {
            host: LOOPBACK_HOST,
        },
        session_owner: LOOPBACK_HOST,
    })));
    coordinator.pump_events();
    // No avatar until the host spawns one.
    assert_eq!(coordinator.registry().participant_count(), 0);

    sink.send(ServiceEvent::EntitySpawned {
        network_id: NetworkId(1),
        owner: LOOPBACK_HOST,
        display_name: "Dosen".into(),
    });
    sink.send(ServiceEvent::EntitySpawned {
        network_id: NetworkId(2),
        owner: LOOPBACK_CLIENT,
        display_name: "Mahasiswa".into(),
    });
    sink.send(ServiceEvent::FieldUpdates(vec![yaw_update(NetworkId(2), 4, 0.75)]));
    coordinator.pump_events();

    let registry = coordinator.registry();
    assert_eq!(registry.participant_count(), 2);
    assert_eq!(registry.network_id(LOOPBACK_HOST), Some(NetworkId(1)));
    assert_eq!(registry.network_id(LOOPBACK_CLIENT), Some(NetworkId(2)));
    let fields = registry.fields(LOOPBACK_CLIENT).unwrap();
    assert_eq!(fields.get(ParticipantFields::YAW), Some(&0.75));

    let gate = coordinator.gate().unwrap();
    coordinator
        .registry_mut()
        .set_field(LOOPBACK_CLIENT, ParticipantFields::YAW, 1.5, &gate)
        .unwrap();
    coordinator.update(6);

    let shipped = shipped_updates(&backend);
    assert!(!shipped.is_empty());
    assert!(
        shipped
            .iter()
            .flatten()
            .all(|update| update.network_id == NetworkId(2)),
        "client shipped an id it does not own: {shipped:?}"
    );
    let last = shipped.last().unwrap().last().unwrap();
    assert_eq!(last.tick, 6);
    let (_, bytes) = last.fields.iter().find(|(name, _)| name == "yaw").unwrap();
    assert_eq!(postcard::from_bytes::<f32>(bytes).unwrap(), 1.5);
}

#[test]
fn test_update_ships_changed_fields_once() {
    let backend = LoopbackBackend::new();
    let (mut coordinator, _) = coordinator(backend.clone());
    coordinator
        .start_session(GameMode::Host, SessionDescriptor::default(), true)
        .unwrap();
    coordinator.update(1);

    let gate = coordinator.gate().unwrap();
    coordinator
        .registry_mut()
        .set_field(LOOPBACK_HOST, ParticipantFields::YAW, 1.25, &gate)
        .unwrap();
    coordinator.update(2);
    coordinator.update(3);

    let shipped = shipped_updates(&backend);
    assert_eq!(shipped.len(), 2, "initial state, then the yaw change");
    assert_eq!(shipped[1].len(), 1);
    assert_eq!(shipped[1][0].tick, 2);
    assert_eq!(shipped[1][0].fields.len(), 1);
    assert_eq!(shipped[1][0].fields[0].0, "yaw");
}

#[test]
fn test_shutdown_event_reports_reason() {
    let backend = LoopbackBackend::new();
    let (mut coordinator, log) = coordinator(backend.clone());
    coordinator
        .start_session(GameMode::Host, SessionDescriptor::default(), true)
        .unwrap();
    coordinator.pump_events();

    backend.last_sink().unwrap().send(ServiceEvent::Shutdown {
        reason: "HostMigration".into(),
    });
    coordinator.pump_events();

    assert_eq!(
        log.lock().unwrap().last().cloned(),
        Some((
            ConnectionStatus::Disconnected,
            Some("HostMigration".to_string())
        ))
    );
    assert!(!coordinator.is_connected());
    assert_eq!(coordinator.registry().participant_count(), 0);
}

#[test]
fn test_ok_reason_is_not_surfaced() {
    let backend = LoopbackBackend::new().manual();
    let (mut coordinator, log) = coordinator(backend.clone());
    coordinator.connect();

    backend.last_sink().unwrap().send(ServiceEvent::Shutdown {
        reason: "Ok".into(),
    });
    coordinator.pump_events();

    assert_eq!(
        log.lock().unwrap().last().cloned(),
        Some((ConnectionStatus::Disconnected, None))
    );
}

#[test]
fn test_auth_response_sets_profile() {
    let backend = LoopbackBackend::new();
    let (mut coordinator, _) = coordinator(backend.clone());
    coordinator.connect();
    let sink = backend.last_sink().unwrap();

    let serde_json::Value::Object(good) = json!({
        "faculty_id": 2,
        "faculty_name": "MIPA",
        "full_name": "Rudi Hartono",
        "in_game_nickname": "rudi",
        "university_name": "Universitas Indonesia",
        "user_id": "u-77",
        "user_univ_role": "Dosen",
        "user_university_id": 1,
        "gender": "Male",
        "auth_cookie": "sid=xyz",
    }) else {
        unreachable!()
    };
    let mut bad = good.clone();
    bad.insert("gender".into(), json!("?"));

    sink.send(ServiceEvent::CustomAuthResponse(good));
    sink.send(ServiceEvent::CustomAuthResponse(bad));
    coordinator.pump_events();

    // The malformed second response leaves the first profile in place.
    let profile = coordinator.profile().unwrap();
    assert_eq!(profile.user_id, "u-77");
    assert_eq!(coordinator.auth_session().unwrap().cookie(), "sid=xyz");

    coordinator
        .start_session(GameMode::Host, SessionDescriptor::default(), true)
        .unwrap();
    coordinator.pump_events();
    let fields = coordinator.registry().fields(LOOPBACK_HOST).unwrap();
    assert_eq!(
        fields.get(ParticipantFields::DISPLAY_NAME).map(String::as_str),
        Some("rudi")
    );
}

#[test]
fn test_listing_properties_round_trip_through_join() {
    let mut properties = Properties::new();
    properties.insert("meet".into(), PropertyValue::Str("Pertemuan 2".into()));
    let info = SessionInfo {
        properties,
        ..listing("Room2", "")
    };
    let backend = LoopbackBackend::new();
    let (mut coordinator, _) = coordinator(backend.clone());

    coordinator.join_session(&info, "").unwrap();

    let requests = backend.requests();
    let Some(LoopbackRequest::StartGame(request)) = requests.first() else {
        panic!("expected a start request");
    };
    assert_eq!(request.mode, GameMode::Client);
    assert_eq!(
        request.properties.get("meet"),
        Some(&PropertyValue::Str("Pertemuan 2".into()))
    );
}

#[tokio::test]
async fn test_status_watch_sees_latest_status() {
    let (mut coordinator, _) = coordinator(LoopbackBackend::new());
    let mut watch = coordinator.status_watch();
    assert_eq!(*watch.borrow(), ConnectionStatus::Disconnected);

    coordinator
        .start_session(GameMode::Host, SessionDescriptor::default(), true)
        .unwrap();
    coordinator.pump_events();

    watch.changed().await.unwrap();
    assert_eq!(*watch.borrow_and_update(), ConnectionStatus::Started);
}
