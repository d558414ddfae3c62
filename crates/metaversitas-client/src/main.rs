//! Headless Metaversitas client.
//!
//! Loads `config.ron`, applies CLI overrides, and drives a
//! [`MetaverseClient`] from a fixed-tick scheduler against the in-process
//! loopback service. With `network.auto_connect` it starts the configured
//! room straight away; otherwise it lists the lobby and joins the first
//! open room, creating one when the lobby is empty.
//!
//! Run with: `cargo run -p metaversitas-client -- --frames 600`

use std::time::{Duration, Instant};

use clap::Parser;
use metaversitas_config::{CliArgs, Config, default_config_dir};
use metaversitas_net::interaction::InteractableId;
use metaversitas_net::{
    Apparatus, ConnectionStatus, CoordinatorSettings, GameState, InformativeObject,
    LoopbackBackend, MapIndex, MetaverseClient, PlayMode, SessionDescriptor, Stage, TickScheduler,
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

type Client = MetaverseClient<LoopbackBackend>;

const NOTICE_BOARD: InteractableId = InteractableId(1);
const PENDULUM: InteractableId = InteractableId(2);

fn descriptor_from_config(config: &Config) -> SessionDescriptor {
    let session = &config.session;
    let start_map = session.start_map.parse::<MapIndex>().unwrap_or_else(|err| {
        warn!(%err, "falling back to the default map");
        MapIndex::default()
    });
    let play_mode = session.play_mode.parse::<PlayMode>().unwrap_or_else(|err| {
        warn!(%err, "falling back to the default play mode");
        PlayMode::LabFisika
    });
    SessionDescriptor {
        room_name: session.room_name.clone(),
        password: session.room_password.clone(),
        start_map,
        play_mode,
        meeting: session.meeting.clone(),
        capacity: config.network.player_limit,
        allow_late_join: session.allow_late_join,
        ..SessionDescriptor::default()
    }
}

fn build_client(config: &Config) -> Client {
    let settings = CoordinatorSettings {
        region: config.network.region.clone(),
        lobby_id: config.network.lobby_id.clone(),
        shared_mode: config.network.shared_mode,
        player_limit: config.network.player_limit,
        ..CoordinatorSettings::default()
    };
    let mut client = MetaverseClient::new(
        LoopbackBackend::new(),
        settings,
        config.interaction_cooldown_ticks(),
        config.input.mouse_sensitivity,
    );
    client.coordinator_mut().subscribe_status(|status, reason| {
        if let Some(reason) = reason {
            warn!(?status, reason, "session service reported a problem");
        }
    });
    client
        .state_machine_mut()
        .subscribe(|change| debug!(?change, "game state changed"));

    let targets = client.targets_mut();
    targets.insert(InformativeObject::new(NOTICE_BOARD));
    targets.insert(Apparatus::new(PENDULUM, "Bandul Sederhana"));
    client
}

/// Picks a room once the lobby list is in.
fn leave_lobby(client: &mut Client, descriptor: &SessionDescriptor) {
    let coordinator = client.coordinator_mut();
    if coordinator.status() != ConnectionStatus::InLobby || coordinator.has_pending_operation() {
        return;
    }
    let open_room = coordinator
        .sessions()
        .iter()
        .find(|info| info.can_join() && info.descriptor().verify_password(""))
        .cloned();
    let result = match open_room {
        Some(info) => {
            info!(room = %info.name, players = info.player_count, "joining listed room");
            coordinator.join_session(&info, "")
        }
        None => {
            info!(room = %descriptor.room_name, "lobby is empty; creating room");
            coordinator.create_session(descriptor.clone())
        }
    };
    if let Err(err) = result {
        warn!(%err, "could not leave the lobby");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = CliArgs::parse();
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error ({err}); using defaults");
            Config::default()
        }
    };
    config.apply_cli_overrides(&args);

    metaversitas_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );

    info!("Metaversitas headless client");
    info!(
        "Tick rate: {} Hz | Lobby: {} | Shared: {}",
        config.simulation.tick_rate, config.network.lobby_id, config.network.shared_mode
    );

    let descriptor = descriptor_from_config(&config);
    let mut client = build_client(&config);

    if config.network.auto_connect {
        if let Err(err) = client.coordinator_mut().auto_start(descriptor.clone()) {
            warn!(%err, "auto start refused");
        }
    } else {
        client.state_machine_mut().trigger_intro_state();
        let lobby = config.network.lobby_id.clone();
        let entered = client.coordinator_mut().enter_lobby(&lobby, |sessions| match sessions {
            Some(sessions) => info!(count = sessions.len(), "session list updated"),
            None => warn!("could not enter the lobby"),
        });
        if let Err(err) = entered {
            warn!(%err, "lobby request refused");
        }
    }

    let mut scheduler = TickScheduler::<Client>::with_tick_rate(config.simulation.tick_rate)
        .with_max_fixed_steps(config.simulation.max_fixed_steps);

    scheduler.add(Stage::Input, move |client, _| leave_lobby(client, &descriptor));
    scheduler.add(Stage::Simulation, |client, info| {
        if let Some(Ok(result)) = client.simulation_tick(info) {
            info!(?result, tick = info.tick, "interaction");
        }
    });
    scheduler.add(Stage::Render, |client, info| {
        if client.game_state() == GameState::Intro
            && client.coordinator().status() == ConnectionStatus::Started
        {
            client.state_machine_mut().trigger_play_state();
        }
        if info.tick > 0 && info.tick % u64::from(info.tick_rate) == 0 {
            debug!(
                tick = info.tick,
                participants = client.coordinator().registry().participant_count(),
                state = ?client.game_state(),
                "heartbeat"
            );
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(scheduler.tick_duration_secs()));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last = Instant::now();
    let mut frames = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("interrupted");
                break;
            }
        }
        let now = Instant::now();
        scheduler.run(&mut client, now.duration_since(last).as_secs_f64());
        last = now;

        frames += 1;
        if args.frames.is_some_and(|max| frames >= max) {
            break;
        }
    }

    client.coordinator_mut().disconnect();
    info!(frames, ticks = scheduler.tick(), "client stopped");
}
