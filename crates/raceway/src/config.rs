//! Server configuration, loaded from a JSON file.

use std::path::{Path, PathBuf};

use raceway_room::RoomConfig;
use serde::{Deserialize, Serialize};

use crate::RacewayError;

/// Environment variable that overrides [`ServerConfig::bind`].
pub const BIND_ENV: &str = "RACEWAY_BIND";

pub const DEFAULT_BIND: &str = "0.0.0.0:25000";

/// One room to create at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomEntry {
    #[serde(flatten)]
    pub room: RoomConfig,

    /// Where the room's match settings are persisted. Without one,
    /// settings reset to defaults on every start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Rooms created at startup. An empty list gets one default room.
    pub rooms: Vec<RoomEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            rooms: vec![RoomEntry::default()],
        }
    }
}

impl ServerConfig {
    /// Reads the config at `path`, or defaults when no path is given, then
    /// applies the `RACEWAY_BIND` override.
    pub fn load(path: Option<&Path>) -> Result<Self, RacewayError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Ok(bind) = std::env::var(BIND_ENV) {
            if bind.trim().is_empty() {
                tracing::warn!("{BIND_ENV} is empty, keeping {}", config.bind);
            } else {
                config.bind = bind;
            }
        }
        if config.rooms.is_empty() {
            config.rooms.push(RoomEntry::default());
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, RacewayError> {
        let text = std::fs::read_to_string(path).map_err(|source| RacewayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| RacewayError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_one_room() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.rooms.len(), 1);
        assert_eq!(config.rooms[0].settings_file, None);
    }

    #[test]
    fn test_parses_rooms_with_settings_files() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "bind": "127.0.0.1:9000",
                "rooms": [
                    { "name": "Main", "max_players": 12, "settings_file": "main.json" },
                    { "name": "Practice", "visible": false }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(config.rooms[0].room.name, "Main");
        assert_eq!(config.rooms[0].room.max_players, 12);
        assert_eq!(config.rooms[0].settings_file, Some(PathBuf::from("main.json")));
        assert!(!config.rooms[1].room.visible);
        assert_eq!(config.rooms[1].room.stage_count, RoomConfig::default().stage_count);
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let err = ServerConfig::from_file(Path::new("/nonexistent/raceway.json")).unwrap_err();
        assert!(matches!(err, RacewayError::ConfigRead { .. }));
    }
}
