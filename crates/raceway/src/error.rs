//! Unified error type for the server.

use std::path::PathBuf;

use raceway_protocol::ProtocolError;
use raceway_room::RoomError;
use raceway_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
#[derive(Debug, thiserror::Error)]
pub enum RacewayError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Room(#[from] RoomError),

    /// The config file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`ServerConfig`](crate::ServerConfig).
    #[error("invalid config in {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The room listing could not be serialized.
    #[error("failed to encode room list: {0}")]
    Listing(#[from] serde_json::Error),
}
