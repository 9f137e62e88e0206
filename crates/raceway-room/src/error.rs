//! Error types for the room layer.

use raceway_protocol::{ClientId, ControlSlot, ProtocolError, RoomId};
use raceway_transport::ConnectionId;

/// Errors that can occur while a room handles a message or a registry
/// operation.
///
/// Message handlers return these to the tick loop, which logs them and
/// moves on to the next message.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection is not attached to this room.
    #[error("connection {0} is not attached")]
    UnknownConnection(ConnectionId),

    /// A match message arrived before the handshake was accepted.
    #[error("connection {0} has not completed the handshake")]
    NotValidated(ConnectionId),

    /// A match message that needs a joined client arrived before
    /// `ClientJoined`.
    #[error("connection {0} has not joined as a client")]
    NotJoined(ConnectionId),

    /// A message named a client other than the one on its connection.
    #[error("connection claims client {claimed} but belongs to {actual:?}")]
    IdentityMismatch {
        claimed: ClientId,
        actual: Option<ClientId>,
    },

    #[error("no player {ctrl} for client {client_id}")]
    UnknownPlayer {
        client_id: ClientId,
        ctrl: ControlSlot,
    },

    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The room's command channel is closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    /// The settings store failed to load or save.
    #[error("settings store: {0}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
}
