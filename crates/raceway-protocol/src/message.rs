//! Match messages: the structured body of a `Match` frame.
//!
//! [`MatchMessage`] is a closed enum, internally tagged by `"type"`. A
//! tag that is not listed here fails to decode; nothing on the wire can
//! make the server construct a type it did not name.

use serde::{Deserialize, Serialize};

use crate::types::{CharacterId, ChatKind, ClientId, ControlSlot, MatchSettings};

/// Every lobby and race event a client or the room can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MatchMessage {
    /// A validated connection introduces its client.
    ClientJoined { client_id: ClientId, name: String },

    /// Server only: a client is gone along with all its players.
    ClientLeft { client_id: ClientId },

    PlayerJoined {
        client_id: ClientId,
        ctrl: ControlSlot,
        character: CharacterId,
    },

    PlayerLeft {
        client_id: ClientId,
        ctrl: ControlSlot,
    },

    CharacterChanged {
        client_id: ClientId,
        ctrl: ControlSlot,
        character: CharacterId,
    },

    ChangedReady {
        client_id: ClientId,
        ctrl: ControlSlot,
        ready: bool,
    },

    /// Server only. Clients that send it are ignored.
    SettingsChanged { settings: MatchSettings },

    /// Server: load the stage. Clients never send this.
    LoadRace,

    /// Client: stage loaded. Server: everyone loaded, go.
    StartRace,

    /// Client: vote to return to the lobby. Server: back to the lobby.
    LoadLobby,

    /// Server only: the auto-start countdown started or stopped.
    AutoStartTimer { enabled: bool },

    Chat {
        from: String,
        kind: ChatKind,
        text: String,
    },

    CheckpointPassed {
        client_id: ClientId,
        ctrl: ControlSlot,
        checkpoint: u32,
        lap_time: f64,
    },

    PlayerRespawn {
        client_id: ClientId,
        ctrl: ControlSlot,
        new_rings: i32,
        old_rings: i32,
        time_penalty: f64,
    },

    DoneRacing {
        client_id: ClientId,
        ctrl: ControlSlot,
        race_time: f64,
        disqualified: bool,
    },

    /// Server only: disqualification warning. `time_left == 0` cancels a
    /// warning that was already shown.
    RaceTimeout {
        client_id: ClientId,
        ctrl: ControlSlot,
        time_left: f64,
    },
}

impl MatchMessage {
    /// The `"type"` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            MatchMessage::ClientJoined { .. } => "ClientJoined",
            MatchMessage::ClientLeft { .. } => "ClientLeft",
            MatchMessage::PlayerJoined { .. } => "PlayerJoined",
            MatchMessage::PlayerLeft { .. } => "PlayerLeft",
            MatchMessage::CharacterChanged { .. } => "CharacterChanged",
            MatchMessage::ChangedReady { .. } => "ChangedReady",
            MatchMessage::SettingsChanged { .. } => "SettingsChanged",
            MatchMessage::LoadRace => "LoadRace",
            MatchMessage::StartRace => "StartRace",
            MatchMessage::LoadLobby => "LoadLobby",
            MatchMessage::AutoStartTimer { .. } => "AutoStartTimer",
            MatchMessage::Chat { .. } => "Chat",
            MatchMessage::CheckpointPassed { .. } => "CheckpointPassed",
            MatchMessage::PlayerRespawn { .. } => "PlayerRespawn",
            MatchMessage::DoneRacing { .. } => "DoneRacing",
            MatchMessage::RaceTimeout { .. } => "RaceTimeout",
        }
    }

    /// A system chat line from the server.
    pub fn system_chat(text: impl Into<String>) -> Self {
        MatchMessage::Chat {
            from: "Server".to_string(),
            kind: ChatKind::System,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn guid() -> ClientId {
        ClientId(Uuid::from_u128(7))
    }

    #[test]
    fn test_unit_variants_carry_only_the_tag() {
        let json = serde_json::to_value(&MatchMessage::StartRace).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "StartRace" }));
    }

    #[test]
    fn test_player_joined_json_format() {
        let msg = MatchMessage::PlayerJoined {
            client_id: guid(),
            ctrl: ControlSlot::Joystick2,
            character: 4,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "PlayerJoined");
        assert_eq!(json["ctrl"], "Joystick2");
        assert_eq!(json["character"], 4);
        assert_eq!(json["client_id"], guid().to_string());
    }

    #[test]
    fn test_done_racing_decodes_from_client_json() {
        let json = format!(
            r#"{{"type":"DoneRacing","client_id":"{}","ctrl":"Keyboard","race_time":93.5,"disqualified":false}}"#,
            guid()
        );
        let msg: MatchMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(
            msg,
            MatchMessage::DoneRacing {
                client_id: guid(),
                ctrl: ControlSlot::Keyboard,
                race_time: 93.5,
                disqualified: false,
            }
        );
        assert_eq!(msg.kind(), "DoneRacing");
    }

    #[test]
    fn test_unknown_tag_fails_to_decode() {
        let result =
            serde_json::from_str::<MatchMessage>(r#"{"type":"GiveAdmin"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_system_chat_comes_from_server() {
        match MatchMessage::system_chat("hello") {
            MatchMessage::Chat { from, kind, text } => {
                assert_eq!(from, "Server");
                assert_eq!(kind, ChatKind::System);
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
