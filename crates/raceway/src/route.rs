//! Routing of freshly accepted sockets by their request path.
//!
//! | Path          | Effect                                          |
//! |---------------|-------------------------------------------------|
//! | `/rooms`      | one JSON frame listing visible rooms, then close |
//! | `/rooms/<id>` | attach to room `<id>`                            |
//! | `/`           | attach to the lowest-numbered room               |

use std::sync::Arc;

use raceway_protocol::RoomId;
use raceway_room::RoomManager;
use raceway_transport::{Connection, WebSocketConnection};
use tokio::sync::Mutex;

use crate::RacewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    List,
    Room(RoomId),
    Default,
    Unknown,
}

impl Route {
    pub(crate) fn parse(path: &str) -> Self {
        let path = path.trim_end_matches('/');
        if path.is_empty() {
            return Route::Default;
        }
        match path.strip_prefix("/rooms") {
            Some("") => Route::List,
            Some(rest) => rest
                .strip_prefix('/')
                .and_then(|id| id.parse().ok())
                .map_or(Route::Unknown, |id| Route::Room(RoomId(id))),
            None => Route::Unknown,
        }
    }
}

/// Sends the socket wherever its path points.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    rooms: Arc<Mutex<RoomManager>>,
) -> Result<(), RacewayError> {
    let route = Route::parse(conn.path());
    tracing::debug!(conn_id = %conn.id(), path = conn.path(), ?route, "routing connection");

    let room_id = match route {
        Route::List => {
            let listing = rooms.lock().await.list_rooms();
            let bytes = serde_json::to_vec(&listing)?;
            conn.send(&bytes).await?;
            conn.close("Room list sent").await?;
            return Ok(());
        }
        Route::Room(id) => id,
        Route::Default => {
            let first = rooms.lock().await.room_ids().first().copied();
            match first {
                Some(id) => id,
                None => {
                    conn.close("No rooms available").await?;
                    return Ok(());
                }
            }
        }
        Route::Unknown => {
            conn.close("Unknown path").await?;
            return Ok(());
        }
    };

    // Holding the lock across attach keeps the room from being destroyed
    // in between.
    let manager = rooms.lock().await;
    if let Err(e) = manager.room_info(room_id) {
        drop(manager);
        tracing::debug!(%room_id, error = %e, "connection for unknown room");
        conn.close("Room not found").await?;
        return Ok(());
    }
    let conn_id = manager.attach(room_id, conn)?;
    tracing::info!(%conn_id, %room_id, "connection attached to room");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routes() {
        assert_eq!(Route::parse("/"), Route::Default);
        assert_eq!(Route::parse(""), Route::Default);
        assert_eq!(Route::parse("/rooms"), Route::List);
        assert_eq!(Route::parse("/rooms/"), Route::List);
        assert_eq!(Route::parse("/rooms/7"), Route::Room(RoomId(7)));
        assert_eq!(Route::parse("/rooms/seven"), Route::Unknown);
        assert_eq!(Route::parse("/roomsx"), Route::Unknown);
        assert_eq!(Route::parse("/admin"), Route::Unknown);
    }
}
