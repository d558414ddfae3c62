//! Command-line argument parsing for the Metaversitas client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Metaversitas client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "metaversitas", about = "Metaversitas headless client")]
pub struct CliArgs {
    /// Room name for the auto session.
    #[arg(long)]
    pub room: Option<String>,

    /// Room password for the auto session.
    #[arg(long)]
    pub password: Option<String>,

    /// Use shared topology instead of client/server.
    #[arg(long)]
    pub shared: Option<bool>,

    /// Custom lobby to list sessions from.
    #[arg(long)]
    pub lobby: Option<String>,

    /// Simulation tick rate in Hz.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stop after this many frames instead of running until Ctrl-C.
    #[arg(long)]
    pub frames: Option<u64>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref room) = args.room {
            self.session.room_name = room.clone();
        }
        if let Some(ref password) = args.password {
            self.session.room_password = password.clone();
        }
        if let Some(shared) = args.shared {
            self.network.shared_mode = shared;
        }
        if let Some(ref lobby) = args.lobby {
            self.network.lobby_id = lobby.clone();
        }
        if let Some(rate) = args.tick_rate {
            self.simulation.tick_rate = rate;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
