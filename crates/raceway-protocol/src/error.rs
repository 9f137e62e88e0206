//! Error types for the protocol layer.

use crate::FrameKind;

/// Errors that can occur while encoding or decoding frames.
///
/// None of these are fatal for a connection: the room logs them and drops
/// the offending frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a JSON payload failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Parsing a JSON payload failed. This is also what an unknown
    /// match-message `"type"` tag turns into.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A frame arrived with no tag byte at all.
    #[error("empty frame")]
    EmptyFrame,

    /// The tag byte does not name any known frame kind.
    #[error("unknown frame kind {0}")]
    UnknownKind(u8),

    /// A known kind arrived in a direction that never carries it, e.g. a
    /// client sending `Validate`.
    #[error("unexpected {0:?} frame")]
    UnexpectedKind(FrameKind),

    /// The payload is shorter than its fixed-size header.
    #[error("{kind:?} frame truncated: need {needed} bytes, got {got}")]
    Truncated {
        kind: FrameKind,
        needed: usize,
        got: usize,
    },

    /// A text payload is not valid UTF-8.
    #[error("invalid utf-8 text: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The frame decoded but breaks a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
