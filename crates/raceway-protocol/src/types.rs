//! Data types shared by clients and the room server.
//!
//! Identities, the match settings block, and the snapshot a client
//! receives after its handshake.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifier of a room within one server process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// Stable identity a game client picks for itself and sends in
/// `ClientJoined`. Serialized as the bare UUID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// A fresh random identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Which local input device a player is bound to. One client can host
/// several players (split screen), each on its own slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlSlot {
    Keyboard,
    Joystick1,
    Joystick2,
    Joystick3,
    Joystick4,
}

impl fmt::Display for ControlSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Index into the character catalog.
pub type CharacterId = u32;

// ---------------------------------------------------------------------------
// Tiers and rotation modes
// ---------------------------------------------------------------------------

/// Classification of playable characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Normal,
    Odd,
    Hyperspeed,
}

/// Returned when an admin types a mode name that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseModeError {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `Display`, `FromStr` and a `NAMES` list for a fieldless enum
/// whose variant names double as their admin-facing spelling.
macro_rules! named_modes {
    ($ty:ident, $kind:literal, [$($variant:ident),+ $(,)?]) => {
        impl $ty {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Variant names joined with `|`, for usage strings.
            pub const NAMES: &'static str = named_modes!(@join $($variant),+);

            /// The variant's name.
            pub fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => stringify!($variant)),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $ty {
            type Err = ParseModeError;

            /// Case-insensitive match on the variant name.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|m| m.name().eq_ignore_ascii_case(s))
                    .ok_or_else(|| ParseModeError {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }
    };
    (@join $first:ident $(, $rest:ident)*) => {
        concat!(stringify!($first) $(, "|", stringify!($rest))*)
    };
}

/// Which character tiers players may pick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum AllowedTiers {
    #[default]
    All,
    NormalOnly,
    OddOnly,
    HyperspeedOnly,
    NoHyperspeed,
}

named_modes!(
    AllowedTiers,
    "tier filter",
    [All, NormalOnly, OddOnly, HyperspeedOnly, NoHyperspeed]
);

impl AllowedTiers {
    /// Whether a character of `tier` may race under this filter.
    pub fn allows(self, tier: Tier) -> bool {
        match self {
            AllowedTiers::All => true,
            AllowedTiers::NormalOnly => tier == Tier::Normal,
            AllowedTiers::OddOnly => tier == Tier::Odd,
            AllowedTiers::HyperspeedOnly => tier == Tier::Hyperspeed,
            AllowedTiers::NoHyperspeed => tier != Tier::Hyperspeed,
        }
    }

    /// Player-facing sentence describing the filter.
    pub fn description(self) -> &'static str {
        match self {
            AllowedTiers::All => "All characters are allowed.",
            AllowedTiers::NormalOnly => {
                "Only characters from the Normal tier are allowed."
            }
            AllowedTiers::OddOnly => {
                "Only characters from the Odd tier are allowed."
            }
            AllowedTiers::HyperspeedOnly => {
                "Only characters from the Hyperspeed tier are allowed."
            }
            AllowedTiers::NoHyperspeed => {
                "Any character NOT from the Hyperspeed tier is allowed."
            }
        }
    }
}

/// How the stage changes each time the room returns to the lobby.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum StageRotationMode {
    #[default]
    None,
    Random,
    Sequenced,
}

named_modes!(StageRotationMode, "stage rotation mode", [None, Random, Sequenced]);

/// How the allowed tiers change each time the room returns to the lobby.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum TierRotationMode {
    #[default]
    None,
    Cycle,
    Random,
    WeightedRandom,
}

named_modes!(
    TierRotationMode,
    "tier rotation mode",
    [None, Cycle, Random, WeightedRandom]
);

// ---------------------------------------------------------------------------
// Match settings
// ---------------------------------------------------------------------------

/// Room-wide race configuration. Times are whole seconds.
///
/// Missing fields take their defaults when deserializing, so a settings
/// file written by an older build still loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    pub stage_id: u32,
    pub laps: u32,
    /// Countdown before an automatic start; 0 disables auto start.
    pub auto_start_time: u32,
    pub auto_start_min_players: u32,
    pub stage_rotation_mode: StageRotationMode,
    pub allowed_tiers: AllowedTiers,
    pub tier_rotation_mode: TierRotationMode,
    /// Fraction of clients that must vote before returning to the lobby.
    pub vote_ratio: f64,
    /// Idle time before a racer is disqualified; 0 disables it.
    pub disqualification_time: u32,
    /// Delay between the last finisher and the return to the lobby;
    /// 0 disables the automatic return.
    pub auto_return_time: u32,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            stage_id: 0,
            laps: 2,
            auto_start_time: 60,
            auto_start_min_players: 2,
            stage_rotation_mode: StageRotationMode::None,
            allowed_tiers: AllowedTiers::All,
            tier_rotation_mode: TierRotationMode::None,
            vote_ratio: 1.0,
            disqualification_time: 120,
            auto_return_time: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake and snapshot
// ---------------------------------------------------------------------------

/// What a client reports about itself in the `Connect` handshake.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub version: f32,
    pub is_testing: bool,
}

/// One client as seen in a [`MatchState`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    pub client_id: ClientId,
    pub name: String,
}

/// One player as seen in a [`MatchState`] snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub client_id: ClientId,
    pub ctrl: ControlSlot,
    pub ready: bool,
    pub character: CharacterId,
}

/// Full room snapshot sent in reply to a successful handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    pub clients: Vec<ClientState>,
    pub players: Vec<PlayerState>,
    pub settings: MatchSettings,
    pub in_race: bool,
    /// Seconds until auto start, or 0 when the countdown is not running.
    pub auto_start_time_left: f64,
}

// ---------------------------------------------------------------------------
// Chat and room listing
// ---------------------------------------------------------------------------

/// Who authored a chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatKind {
    Player,
    System,
}

/// A row in the room browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomListEntry {
    pub id: RoomId,
    pub name: String,
    pub max_players: usize,
    pub current_players: usize,
    pub in_game: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_serializes_as_plain_number() {
        assert_eq!(serde_json::to_string(&RoomId(99)).unwrap(), "99");
        assert_eq!(RoomId(3).to_string(), "R-3");
    }

    #[test]
    fn test_client_id_serializes_as_uuid_string() {
        let id = ClientId(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_allowed_tiers_filter() {
        assert!(AllowedTiers::All.allows(Tier::Hyperspeed));
        assert!(AllowedTiers::NormalOnly.allows(Tier::Normal));
        assert!(!AllowedTiers::NormalOnly.allows(Tier::Odd));
        assert!(AllowedTiers::OddOnly.allows(Tier::Odd));
        assert!(AllowedTiers::HyperspeedOnly.allows(Tier::Hyperspeed));
        assert!(!AllowedTiers::HyperspeedOnly.allows(Tier::Normal));
        assert!(AllowedTiers::NoHyperspeed.allows(Tier::Odd));
        assert!(!AllowedTiers::NoHyperspeed.allows(Tier::Hyperspeed));
    }

    #[test]
    fn test_mode_names_and_parsing() {
        assert_eq!(StageRotationMode::NAMES, "None|Random|Sequenced");
        assert_eq!(
            TierRotationMode::NAMES,
            "None|Cycle|Random|WeightedRandom"
        );
        assert_eq!(
            "sequenced".parse::<StageRotationMode>().unwrap(),
            StageRotationMode::Sequenced
        );
        assert_eq!(
            "NoHyperspeed".parse::<AllowedTiers>().unwrap(),
            AllowedTiers::NoHyperspeed
        );
        let err = "Sideways".parse::<TierRotationMode>().unwrap_err();
        assert_eq!(err.value, "Sideways");
        assert_eq!(TierRotationMode::WeightedRandom.to_string(), "WeightedRandom");
    }

    #[test]
    fn test_match_settings_defaults() {
        let s = MatchSettings::default();
        assert_eq!(s.laps, 2);
        assert_eq!(s.auto_start_time, 60);
        assert_eq!(s.auto_start_min_players, 2);
        assert_eq!(s.vote_ratio, 1.0);
        assert_eq!(s.disqualification_time, 120);
        assert_eq!(s.auto_return_time, 15);
    }

    #[test]
    fn test_match_settings_fill_missing_fields() {
        let s: MatchSettings =
            serde_json::from_str(r#"{ "laps": 5, "allowed_tiers": "OddOnly" }"#)
                .unwrap();
        assert_eq!(s.laps, 5);
        assert_eq!(s.allowed_tiers, AllowedTiers::OddOnly);
        assert_eq!(s.auto_start_time, 60);
    }

    #[test]
    fn test_room_list_entry_json_format() {
        let entry = RoomListEntry {
            id: RoomId(1),
            name: "Green Hill".into(),
            max_players: 8,
            current_players: 3,
            in_game: true,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["current_players"], 3);
        assert_eq!(json["in_game"], true);
    }
}
