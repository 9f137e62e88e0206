//! Room configuration and state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Configuration for one room instance.
///
/// Durations are written as (fractional) seconds in config files. Missing
/// fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Name shown in the room browser.
    pub name: String,

    /// Whether the room shows up in listings.
    pub visible: bool,

    /// Maximum connected clients.
    pub max_players: usize,

    /// Tick rate in Hz.
    pub tick_rate_hz: u32,

    /// Number of stages the rotation cycles through.
    pub stage_count: u32,

    /// How long every player must stay ready before the race loads.
    #[serde(with = "secs")]
    pub lobby_ready_delay: Duration,

    /// How long clients get to load the stage before stragglers are kicked.
    #[serde(with = "secs")]
    pub stage_load_timeout: Duration,

    /// Spacing between heartbeat probes.
    #[serde(with = "secs")]
    pub heartbeat_interval: Duration,

    /// Ticks a probe may stay unanswered before the client is dropped.
    pub max_missed_heartbeat_ticks: u32,

    /// How often the room re-advertises itself to the room browser.
    #[serde(with = "secs")]
    pub list_ping_interval: Duration,

    /// How long disposal waits for connections to close.
    #[serde(with = "secs")]
    pub dispose_grace: Duration,

    /// Per-frame write timeout; a stalled socket counts as a fault.
    #[serde(with = "secs")]
    pub send_timeout: Duration,

    /// Whispered to every client on join. Empty for the stock greeting.
    pub motd: String,

    /// Game version clients must report in their handshake.
    pub game_version: f32,

    /// Whether clients must be testing builds.
    pub testing_build: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            name: "Raceway".to_string(),
            visible: true,
            max_players: 8,
            tick_rate_hz: raceway_tick::DEFAULT_TICK_RATE_HZ,
            stage_count: 5,
            lobby_ready_delay: Duration::from_secs(3),
            stage_load_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            max_missed_heartbeat_ticks: 1000,
            list_ping_interval: Duration::from_secs(600),
            dispose_grace: Duration::from_secs(5),
            send_timeout: Duration::from_secs(10),
            motd: String::new(),
            game_version: 0.91,
            testing_build: false,
        }
    }
}

/// `Duration` as an `f64` number of seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// RoomState
// ---------------------------------------------------------------------------

/// Whether the room is gathering players or running a race.
///
/// ```text
/// Lobby ──(ready / auto start / forceStart)──▶ Racing
///   ▲                                            │
///   └──(all finished / vote / admin / empty)─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoomState {
    #[default]
    Lobby,
    Racing,
}

impl RoomState {
    pub fn is_racing(self) -> bool {
        self == RoomState::Racing
    }
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lobby => write!(f, "Lobby"),
            Self::Racing => write!(f, "Racing"),
        }
    }
}
