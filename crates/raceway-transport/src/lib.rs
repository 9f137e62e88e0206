//! Transport abstraction layer for Raceway.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the message-oriented socket a game client talks through. The room layer
//! never touches a socket directly; it only sees a [`Connection`].
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`
//!
//! The [`memory`] transport is always available. It backs the room tests
//! and can embed a room in-process without any networking.

#![allow(async_fn_in_trait)]

mod error;
pub mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs across all transports.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide unique `ConnectionId`.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What a single [`Connection::recv`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// One complete message, reassembled up to its end-of-message boundary.
    Frame(Vec<u8>),
    /// The peer closed the connection, optionally telling us why.
    Closed { reason: Option<String> },
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A single duplex connection that carries whole binary messages.
///
/// The returned futures are `Send` so a room can drive sends and receives
/// from spawned tasks without knowing the concrete transport.
///
/// `send` and `recv` may run concurrently from different tasks; callers
/// must not run two `send`s at once on the same connection.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one binary message to the remote peer.
    fn send(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next complete message from the remote peer.
    fn recv(&self) -> impl Future<Output = Result<Received, Self::Error>> + Send;

    /// Closes the connection, passing `reason` to the peer if the
    /// transport supports it.
    fn close(
        &self,
        reason: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
