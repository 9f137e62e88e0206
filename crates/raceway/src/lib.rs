//! # Raceway
//!
//! Server for multiplayer racing rooms. Clients connect over WebSocket,
//! gather in a lobby, race, and return; each room runs as its own actor
//! on a fixed tick.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use raceway::prelude::*;
//!
//! # async fn start() -> Result<(), RacewayError> {
//! let server = RacewayServer::builder()
//!     .bind("0.0.0.0:25000")
//!     .room(RoomConfig::default())
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

pub mod config;
mod error;
mod route;
mod server;
pub mod store;

pub use config::{RoomEntry, ServerConfig};
pub use error::RacewayError;
pub use server::{RacewayServer, RacewayServerBuilder};
pub use store::JsonFileStore;

/// Re-exports for servers and test clients.
pub mod prelude {
    pub use crate::{
        JsonFileStore, RacewayError, RacewayServer, RacewayServerBuilder, RoomEntry, ServerConfig,
    };
    pub use raceway_protocol::{
        AllowedTiers, ChatKind, ClientFrame, ClientId, ClientInfo, ControlSlot, JsonCodec,
        MatchMessage, MatchSettings, MatchState, RoomId, RoomListEntry, ServerFrame,
        StageRotationMode, TierRotationMode,
    };
    pub use raceway_room::{RoomConfig, RoomManager, RoomState, SHUTDOWN_REASON};
}
