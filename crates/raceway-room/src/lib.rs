//! Race rooms for Raceway.
//!
//! Each room runs as an isolated Tokio task (actor model) that owns its
//! clients, players, settings and connections, and advances them on a
//! fixed-rate tick.
//!
//! # Key types
//!
//! - [`Room`]: the lobby/race state machine, drivable by hand in tests
//! - [`RoomManager`]: creates rooms, lists them, routes connections
//! - [`RoomHandle`]: talks to a running room task
//! - [`RoomConfig`]: per-room settings (capacity, timeouts, tick rate)
//! - [`SettingsStore`]: where match settings are loaded from and saved to
//! - [`Clock`]: time source, swapped for [`ManualClock`] in tests

mod catalog;
mod clock;
mod config;
mod console;
mod error;
mod handle;
mod link;
mod manager;
mod queue;
mod registry;
mod room;
mod rotation;
mod store;
mod timer;

pub use catalog::{CHARACTER_COUNT, first_allowed, is_allowed, tier_of};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RoomConfig, RoomState};
pub use error::RoomError;
pub use handle::{RoomHandle, RoomInfo};
pub use link::SHUTDOWN_REASON;
pub use manager::RoomManager;
pub use queue::{OutboundQueue, Priority};
pub use registry::{Client, DISQUALIFIED_POSITION, Player};
pub use room::Room;
pub use rotation::{next_stage, next_tiers, votes_required};
pub use store::{MemoryStore, SettingsStore};
pub use timer::Stopwatch;
