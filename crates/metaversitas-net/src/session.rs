//! Session vocabulary: connection status, start modes, and the room
//! descriptor stored with every session listing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Connection state machine driven by [`crate::SessionCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    EnteringLobby,
    InLobby,
    Starting,
    Started,
}

/// How the local process joins the remote runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    /// Host the session (client/server topology, local state authority).
    Host,
    /// Join a hosted session.
    Client,
    /// Shared topology: every participant owns its own entities.
    Shared,
    /// Join if the room exists, otherwise host it.
    AutoHostOrClient,
    /// Dedicated server; provides no local input.
    Server,
}

impl GameMode {
    /// Whether the local process feeds input to the runtime.
    pub fn provides_input(self) -> bool {
        self != GameMode::Server
    }
}

/// Returned when a map or play mode name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{name}`")]
pub struct UnknownName {
    kind: &'static str,
    name: String,
}

/// Scenes a session can start in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MapIndex {
    Lobby,
    GameOver,
    Museum,
    #[default]
    LabFisika,
    Borobudur,
    Malioboro,
}

impl MapIndex {
    pub fn name(self) -> &'static str {
        match self {
            Self::Lobby => "Lobby",
            Self::GameOver => "GameOver",
            Self::Museum => "Museum",
            Self::LabFisika => "LabFisika",
            Self::Borobudur => "Borobudur",
            Self::Malioboro => "Malioboro",
        }
    }
}

impl FromStr for MapIndex {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::Lobby,
            Self::GameOver,
            Self::Museum,
            Self::LabFisika,
            Self::Borobudur,
            Self::Malioboro,
        ]
        .into_iter()
        .find(|m| m.name().eq_ignore_ascii_case(s))
        .ok_or_else(|| UnknownName {
            kind: "map",
            name: s.to_string(),
        })
    }
}

impl fmt::Display for MapIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Activity selected when creating a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlayMode {
    #[default]
    LabFisika,
    Candi,
    Museum,
    Malioboro,
}

impl PlayMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::LabFisika => "LabFisika",
            Self::Candi => "Candi",
            Self::Museum => "Museum",
            Self::Malioboro => "Malioboro",
        }
    }

    /// Map a room of this mode starts in.
    pub fn start_map(self) -> MapIndex {
        match self {
            Self::LabFisika => MapIndex::LabFisika,
            Self::Candi => MapIndex::Borobudur,
            Self::Museum => MapIndex::Museum,
            Self::Malioboro => MapIndex::Malioboro,
        }
    }
}

impl FromStr for PlayMode {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::LabFisika, Self::Candi, Self::Museum, Self::Malioboro]
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownName {
                kind: "play mode",
                name: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Property bag
// ---------------------------------------------------------------------------

/// Value stored in a session's property bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl PropertyValue {
    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

pub type Properties = BTreeMap<String, PropertyValue>;

const KEY_MAP: &str = "map";
const KEY_MODE: &str = "mode";
const KEY_PASSWORD: &str = "pass";
const KEY_MEETING: &str = "meet";
const KEY_LATE_JOIN: &str = "late";
const KEY_CAPACITY: &str = "cap";

/// Room parameters chosen by whoever creates the session. Immutable once
/// the session exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub room_name: String,
    /// Empty means no password.
    pub password: String,
    pub start_map: MapIndex,
    pub play_mode: PlayMode,
    /// Lecture label, e.g. "Pertemuan 1".
    pub meeting: String,
    pub capacity: u32,
    pub allow_late_join: bool,
    /// Extra properties carried alongside the well-known ones.
    pub extra: Properties,
}

impl Default for SessionDescriptor {
    fn default() -> Self {
        Self {
            room_name: "Room1".to_string(),
            password: String::new(),
            start_map: MapIndex::LabFisika,
            play_mode: PlayMode::LabFisika,
            meeting: String::new(),
            capacity: 20,
            allow_late_join: true,
            extra: Properties::new(),
        }
    }
}

impl SessionDescriptor {
    /// Descriptor for `room_name` with default parameters.
    pub fn named(room_name: impl Into<String>) -> Self {
        Self {
            room_name: room_name.into(),
            ..Self::default()
        }
    }

    /// Property bag stored with the session by the remote service.
    pub fn to_properties(&self) -> Properties {
        let mut props = self.extra.clone();
        props.insert(KEY_MAP.into(), PropertyValue::Str(self.start_map.name().into()));
        props.insert(KEY_MODE.into(), PropertyValue::Str(self.play_mode.name().into()));
        props.insert(KEY_PASSWORD.into(), PropertyValue::Str(self.password.clone()));
        props.insert(KEY_MEETING.into(), PropertyValue::Str(self.meeting.clone()));
        props.insert(KEY_LATE_JOIN.into(), PropertyValue::Bool(self.allow_late_join));
        props.insert(KEY_CAPACITY.into(), PropertyValue::Int(self.capacity as i64));
        props
    }

    /// Rebuilds a descriptor from a listing. Missing or malformed
    /// well-known keys fall back to defaults; unknown keys land in `extra`.
    pub fn from_properties(room_name: impl Into<String>, props: &Properties) -> Self {
        let defaults = Self::default();
        let get = |key: &str| props.get(key);
        let mut extra = props.clone();
        for key in [
            KEY_MAP,
            KEY_MODE,
            KEY_PASSWORD,
            KEY_MEETING,
            KEY_LATE_JOIN,
            KEY_CAPACITY,
        ] {
            extra.remove(key);
        }

        Self {
            room_name: room_name.into(),
            password: get(KEY_PASSWORD)
                .and_then(PropertyValue::as_str)
                .map(str::to_string)
                .unwrap_or(defaults.password),
            start_map: get(KEY_MAP)
                .and_then(PropertyValue::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.start_map),
            play_mode: get(KEY_MODE)
                .and_then(PropertyValue::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.play_mode),
            meeting: get(KEY_MEETING)
                .and_then(PropertyValue::as_str)
                .map(str::to_string)
                .unwrap_or(defaults.meeting),
            capacity: get(KEY_CAPACITY)
                .and_then(PropertyValue::as_int)
                .and_then(|c| u32::try_from(c).ok())
                .unwrap_or(defaults.capacity),
            allow_late_join: get(KEY_LATE_JOIN)
                .and_then(PropertyValue::as_bool)
                .unwrap_or(defaults.allow_late_join),
            extra,
        }
    }

    /// `true` if the room has no password or `attempt` matches it.
    pub fn verify_password(&self, attempt: &str) -> bool {
        self.password.is_empty() || self.password == attempt
    }
}

/// One entry of a lobby's session list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub region: String,
    pub player_count: u32,
    pub max_players: u32,
    pub is_open: bool,
    pub properties: Properties,
}

impl SessionInfo {
    /// Descriptor as the room's creator configured it.
    pub fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor::from_properties(self.name.clone(), &self.properties)
    }

    /// Room is open and not full.
    pub fn can_join(&self) -> bool {
        self.is_open && self.player_count < self.max_players
    }
}
