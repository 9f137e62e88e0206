//! `RacewayServer` builder and accept loop.
//!
//! Ties the layers together: WebSocket transport → path routing → room
//! actors. Each accepted socket is routed on its own task.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use raceway_protocol::RoomId;
use raceway_room::{RoomConfig, RoomManager, SettingsStore};
use raceway_transport::{Transport, WebSocketTransport};
use tokio::sync::Mutex;

use crate::config::{DEFAULT_BIND, RoomEntry, ServerConfig};
use crate::route::handle_connection;
use crate::store::JsonFileStore;
use crate::RacewayError;

/// Builder for configuring and starting a Raceway server.
///
/// # Example
///
/// ```rust,ignore
/// let server = RacewayServer::builder()
///     .bind("0.0.0.0:25000")
///     .room(RoomConfig::default())
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct RacewayServerBuilder {
    bind_addr: String,
    rooms: Vec<RoomEntry>,
}

impl RacewayServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: DEFAULT_BIND.to_string(),
            rooms: Vec::new(),
        }
    }

    /// Starts from a loaded [`ServerConfig`].
    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            bind_addr: config.bind,
            rooms: config.rooms,
        }
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Adds a room whose settings are not persisted.
    pub fn room(mut self, config: RoomConfig) -> Self {
        self.rooms.push(RoomEntry {
            room: config,
            settings_file: None,
        });
        self
    }

    /// Adds a room described by a config file entry.
    pub fn room_entry(mut self, entry: RoomEntry) -> Self {
        self.rooms.push(entry);
        self
    }

    /// Binds the listener and starts every room. With no rooms
    /// configured, one default room is created.
    pub async fn build(mut self) -> Result<RacewayServer, RacewayError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        if self.rooms.is_empty() {
            self.rooms.push(RoomEntry::default());
        }
        let mut manager = RoomManager::new();
        for entry in self.rooms {
            let store = entry
                .settings_file
                .map(|path| Box::new(JsonFileStore::new(path)) as Box<dyn SettingsStore>);
            manager.create_room(entry.room, store);
        }

        Ok(RacewayServer {
            transport,
            rooms: Arc::new(Mutex::new(manager)),
        })
    }
}

impl Default for RacewayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Raceway server with its rooms already running.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct RacewayServer {
    transport: WebSocketTransport,
    rooms: Arc<Mutex<RoomManager>>,
}

impl RacewayServer {
    pub fn builder() -> RacewayServerBuilder {
        RacewayServerBuilder::new()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Ids of the running rooms, lowest first.
    pub async fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.lock().await.room_ids()
    }

    /// Shared access to the room registry.
    pub fn rooms(&self) -> Arc<Mutex<RoomManager>> {
        Arc::clone(&self.rooms)
    }

    /// Accepts connections until Ctrl-C, then disposes every room.
    pub async fn run(self) -> Result<(), RacewayError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Accepts connections until `shutdown` completes, then disposes every
    /// room: settings are saved and each client is told the server is
    /// shutting down.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), RacewayError> {
        let addr = self.local_addr().ok();
        tracing::info!(?addr, "Raceway server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let rooms = Arc::clone(&self.rooms);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, rooms).await {
                                tracing::debug!(error = %e, "connection routing failed");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                () = &mut shutdown => break,
            }
        }

        tracing::info!("shutting down");
        self.rooms.lock().await.shutdown_all().await;
        Ok(())
    }
}
