//! Wire protocol for Raceway.
//!
//! - **Frames** ([`ClientFrame`], [`ServerFrame`], [`FrameKind`]): one tag
//!   byte plus a kind-specific payload.
//! - **Match messages** ([`MatchMessage`]): the closed set of lobby and
//!   race events carried inside `Match` frames.
//! - **Types** ([`MatchSettings`], [`MatchState`], tiers, rotation modes).
//! - **Codec** ([`Codec`], [`JsonCodec`]): how structured payloads become
//!   bytes.
//!
//! The protocol layer knows nothing about sockets or rooms.
//!
//! ```text
//! Transport (bytes) → Protocol (frames) → Room (state machine)
//! ```

mod codec;
mod error;
mod frame;
mod message;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use frame::{ClientFrame, FrameKind, ServerFrame, timestamp_millis};
pub use message::MatchMessage;
pub use types::{
    AllowedTiers, CharacterId, ChatKind, ClientId, ClientInfo, ClientState,
    ControlSlot, MatchSettings, MatchState, ParseModeError, PlayerState,
    RoomId, RoomListEntry, StageRotationMode, Tier, TierRotationMode,
};
