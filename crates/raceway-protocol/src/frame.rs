//! Binary framing.
//!
//! ```text
//! +-----+--------------------------------------------+
//! | tag | payload (depends on tag)                   |
//! +-----+--------------------------------------------+
//!
//! Connect         client: codec(ClientInfo)   server: codec(MatchState)
//! Validate        server: accepted u8 | utf-8 reason
//! Disconnect      utf-8 reason (may be empty)
//! PlayerMovement  opaque bytes, relayed untouched
//! Heartbeat       i64 LE unix millis
//! Match           i64 LE unix millis | codec(MatchMessage)
//! ```
//!
//! [`ClientFrame`] is what a game client sends, [`ServerFrame`] is what
//! the room sends back. Both sides can encode and decode both so tests
//! and tools can play either role.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::Codec;
use crate::message::MatchMessage;
use crate::types::{ClientInfo, MatchState};
use crate::ProtocolError;

const STAMP_LEN: usize = 8;

/// The tag byte at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Connect = 0,
    Validate = 1,
    Disconnect = 2,
    PlayerMovement = 3,
    Heartbeat = 4,
    Match = 5,
}

impl TryFrom<u8> for FrameKind {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => FrameKind::Connect,
            1 => FrameKind::Validate,
            2 => FrameKind::Disconnect,
            3 => FrameKind::PlayerMovement,
            4 => FrameKind::Heartbeat,
            5 => FrameKind::Match,
            other => return Err(ProtocolError::UnknownKind(other)),
        })
    }
}

/// Milliseconds since the Unix epoch, used for frame timestamps.
pub fn timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Frames a game client sends to the room.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Handshake. `None` when the client info could not be read; the room
    /// still answers it, with a rejection.
    Connect(Option<ClientInfo>),
    Disconnect { reason: Option<String> },
    PlayerMovement(Vec<u8>),
    /// Reply to a heartbeat probe, echoing the probe's timestamp.
    Heartbeat { sent_at: i64 },
    Match { sent_at: i64, message: MatchMessage },
}

/// Frames the room sends to a game client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Snapshot sent after a successful handshake.
    Connect(MatchState),
    Validate { accepted: bool, reason: String },
    Disconnect { reason: String },
    /// Another client's movement, byte-for-byte.
    PlayerMovement(Vec<u8>),
    /// Heartbeat probe.
    Heartbeat { sent_at: i64 },
    Match { sent_at: i64, message: MatchMessage },
}

impl ClientFrame {
    pub fn kind(&self) -> FrameKind {
        match self {
            ClientFrame::Connect(_) => FrameKind::Connect,
            ClientFrame::Disconnect { .. } => FrameKind::Disconnect,
            ClientFrame::PlayerMovement(_) => FrameKind::PlayerMovement,
            ClientFrame::Heartbeat { .. } => FrameKind::Heartbeat,
            ClientFrame::Match { .. } => FrameKind::Match,
        }
    }

    /// Builds a `Match` frame stamped with the current time.
    pub fn matched(message: MatchMessage) -> Self {
        ClientFrame::Match {
            sent_at: timestamp_millis(),
            message,
        }
    }

    pub fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![self.kind() as u8];
        match self {
            ClientFrame::Connect(Some(info)) => {
                out.extend(codec.encode(info)?);
            }
            ClientFrame::Connect(None) => {}
            ClientFrame::Disconnect { reason } => {
                if let Some(reason) = reason {
                    out.extend_from_slice(reason.as_bytes());
                }
            }
            ClientFrame::PlayerMovement(data) => out.extend_from_slice(data),
            ClientFrame::Heartbeat { sent_at } => {
                out.extend_from_slice(&sent_at.to_le_bytes());
            }
            ClientFrame::Match { sent_at, message } => {
                out.extend_from_slice(&sent_at.to_le_bytes());
                out.extend(codec.encode(message)?);
            }
        }
        Ok(out)
    }

    /// Decodes one client frame.
    ///
    /// # Errors
    /// Unknown tags, server-only kinds, short headers, bad UTF-8 and
    /// undecodable match messages are all errors. An undecodable handshake
    /// is not: it becomes `Connect(None)`.
    pub fn decode<C: Codec>(codec: &C, data: &[u8]) -> Result<Self, ProtocolError> {
        let (kind, payload) = split(data)?;
        Ok(match kind {
            FrameKind::Connect => ClientFrame::Connect(codec.decode(payload).ok()),
            FrameKind::Disconnect => ClientFrame::Disconnect {
                reason: if payload.is_empty() {
                    None
                } else {
                    Some(text(payload)?)
                },
            },
            FrameKind::PlayerMovement => {
                ClientFrame::PlayerMovement(payload.to_vec())
            }
            FrameKind::Heartbeat => ClientFrame::Heartbeat {
                sent_at: stamp(kind, payload)?.0,
            },
            FrameKind::Match => {
                let (sent_at, body) = stamp(kind, payload)?;
                ClientFrame::Match {
                    sent_at,
                    message: codec.decode(body)?,
                }
            }
            FrameKind::Validate => {
                return Err(ProtocolError::UnexpectedKind(kind));
            }
        })
    }
}

impl ServerFrame {
    pub fn kind(&self) -> FrameKind {
        match self {
            ServerFrame::Connect(_) => FrameKind::Connect,
            ServerFrame::Validate { .. } => FrameKind::Validate,
            ServerFrame::Disconnect { .. } => FrameKind::Disconnect,
            ServerFrame::PlayerMovement(_) => FrameKind::PlayerMovement,
            ServerFrame::Heartbeat { .. } => FrameKind::Heartbeat,
            ServerFrame::Match { .. } => FrameKind::Match,
        }
    }

    /// Builds a `Match` frame stamped with the current time.
    pub fn matched(message: MatchMessage) -> Self {
        ServerFrame::Match {
            sent_at: timestamp_millis(),
            message,
        }
    }

    pub fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>, ProtocolError> {
        let mut out = vec![self.kind() as u8];
        match self {
            ServerFrame::Connect(state) => out.extend(codec.encode(state)?),
            ServerFrame::Validate { accepted, reason } => {
                out.push(u8::from(*accepted));
                out.extend_from_slice(reason.as_bytes());
            }
            ServerFrame::Disconnect { reason } => {
                out.extend_from_slice(reason.as_bytes());
            }
            ServerFrame::PlayerMovement(data) => out.extend_from_slice(data),
            ServerFrame::Heartbeat { sent_at } => {
                out.extend_from_slice(&sent_at.to_le_bytes());
            }
            ServerFrame::Match { sent_at, message } => {
                out.extend_from_slice(&sent_at.to_le_bytes());
                out.extend(codec.encode(message)?);
            }
        }
        Ok(out)
    }

    pub fn decode<C: Codec>(codec: &C, data: &[u8]) -> Result<Self, ProtocolError> {
        let (kind, payload) = split(data)?;
        Ok(match kind {
            FrameKind::Connect => ServerFrame::Connect(codec.decode(payload)?),
            FrameKind::Validate => {
                let (&flag, reason) =
                    payload.split_first().ok_or(ProtocolError::Truncated {
                        kind,
                        needed: 1,
                        got: 0,
                    })?;
                ServerFrame::Validate {
                    accepted: flag != 0,
                    reason: text(reason)?,
                }
            }
            FrameKind::Disconnect => ServerFrame::Disconnect {
                reason: text(payload)?,
            },
            FrameKind::PlayerMovement => {
                ServerFrame::PlayerMovement(payload.to_vec())
            }
            FrameKind::Heartbeat => ServerFrame::Heartbeat {
                sent_at: stamp(kind, payload)?.0,
            },
            FrameKind::Match => {
                let (sent_at, body) = stamp(kind, payload)?;
                ServerFrame::Match {
                    sent_at,
                    message: codec.decode(body)?,
                }
            }
        })
    }
}

fn split(data: &[u8]) -> Result<(FrameKind, &[u8]), ProtocolError> {
    let (&tag, payload) = data.split_first().ok_or(ProtocolError::EmptyFrame)?;
    Ok((FrameKind::try_from(tag)?, payload))
}

fn stamp(kind: FrameKind, payload: &[u8]) -> Result<(i64, &[u8]), ProtocolError> {
    if payload.len() < STAMP_LEN {
        return Err(ProtocolError::Truncated {
            kind,
            needed: STAMP_LEN,
            got: payload.len(),
        });
    }
    let (head, rest) = payload.split_at(STAMP_LEN);
    let mut buf = [0u8; STAMP_LEN];
    buf.copy_from_slice(head);
    Ok((i64::from_le_bytes(buf), rest))
}

fn text(payload: &[u8]) -> Result<String, ProtocolError> {
    Ok(String::from_utf8(payload.to_vec())?)
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientId, ControlSlot, JsonCodec, MatchSettings};

    #[test]
    fn test_frame_kind_tags() {
        assert_eq!(FrameKind::Connect as u8, 0);
        assert_eq!(FrameKind::Match as u8, 5);
        assert_eq!(FrameKind::try_from(3).unwrap(), FrameKind::PlayerMovement);
        assert!(matches!(
            FrameKind::try_from(9),
            Err(ProtocolError::UnknownKind(9))
        ));
    }

    #[test]
    fn test_heartbeat_layout_is_tag_then_le_stamp() {
        let bytes = ServerFrame::Heartbeat { sent_at: 0x0102 }
            .encode(&JsonCodec)
            .unwrap();
        assert_eq!(bytes, vec![4, 0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_match_frame_decodes() {
        let frame = ClientFrame::Match {
            sent_at: 1234,
            message: MatchMessage::ChangedReady {
                client_id: ClientId::random(),
                ctrl: ControlSlot::Keyboard,
                ready: true,
            },
        };
        let bytes = frame.encode(&JsonCodec).unwrap();
        assert_eq!(bytes[0], FrameKind::Match as u8);
        assert_eq!(ClientFrame::decode(&JsonCodec, &bytes).unwrap(), frame);
    }

    #[test]
    fn test_unreadable_handshake_becomes_connect_none() {
        let frame = ClientFrame::decode(&JsonCodec, b"\0{oops").unwrap();
        assert_eq!(frame, ClientFrame::Connect(None));
    }

    #[test]
    fn test_empty_disconnect_has_no_reason() {
        let frame = ClientFrame::decode(&JsonCodec, &[2]).unwrap();
        assert_eq!(frame, ClientFrame::Disconnect { reason: None });
    }

    #[test]
    fn test_client_may_not_send_validate() {
        let result = ClientFrame::decode(&JsonCodec, &[1, 1]);
        assert!(matches!(
            result,
            Err(ProtocolError::UnexpectedKind(FrameKind::Validate))
        ));
    }

    #[test]
    fn test_truncated_and_empty_frames() {
        assert!(matches!(
            ClientFrame::decode(&JsonCodec, &[]),
            Err(ProtocolError::EmptyFrame)
        ));
        assert!(matches!(
            ClientFrame::decode(&JsonCodec, &[5, 1, 2, 3]),
            Err(ProtocolError::Truncated { needed: 8, got: 3, .. })
        ));
    }

    #[test]
    fn test_forged_match_tag_is_a_decode_error() {
        let mut bytes = vec![5];
        bytes.extend_from_slice(&0i64.to_le_bytes());
        bytes.extend_from_slice(br#"{"type":"Evil"}"#);
        assert!(matches!(
            ClientFrame::decode(&JsonCodec, &bytes),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_movement_payload_is_untouched() {
        let raw = vec![3, 0xde, 0xad, 0xbe, 0xef];
        let frame = ClientFrame::decode(&JsonCodec, &raw).unwrap();
        let ClientFrame::PlayerMovement(data) = frame else {
            panic!("expected movement");
        };
        let relayed = ServerFrame::PlayerMovement(data)
            .encode(&JsonCodec)
            .unwrap();
        assert_eq!(relayed, raw);
    }

    #[test]
    fn test_validate_and_snapshot_frames() {
        let reject = ServerFrame::Validate {
            accepted: false,
            reason: "wrong version".into(),
        };
        let bytes = reject.encode(&JsonCodec).unwrap();
        assert_eq!(&bytes[..2], &[1, 0]);
        assert_eq!(ServerFrame::decode(&JsonCodec, &bytes).unwrap(), reject);

        let snapshot = ServerFrame::Connect(MatchState {
            clients: vec![],
            players: vec![],
            settings: MatchSettings::default(),
            in_race: false,
            auto_start_time_left: 0.0,
        });
        let bytes = snapshot.encode(&JsonCodec).unwrap();
        assert_eq!(ServerFrame::decode(&JsonCodec, &bytes).unwrap(), snapshot);
    }
}
