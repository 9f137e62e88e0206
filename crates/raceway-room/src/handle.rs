//! Room actor: a [`Room`] driven by its own Tokio task.
//!
//! The task owns the room outright. The outside world reaches it through a
//! [`RoomHandle`], which queues commands on an mpsc channel and reads room
//! metadata from a watch channel, so no lock is ever held on room state.

use std::time::Duration;

use raceway_protocol::{RoomId, RoomListEntry};
use raceway_tick::{TickConfig, TickScheduler};
use raceway_transport::{Connection, ConnectionId};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::link::Link;
use crate::{Room, RoomError};

/// A snapshot of room metadata, as shown in the room browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    /// Hidden rooms are reachable by id but not listed.
    pub visible: bool,
    pub max_players: usize,
    pub current_players: usize,
    pub in_game: bool,
}

impl RoomInfo {
    pub fn to_list_entry(&self) -> RoomListEntry {
        RoomListEntry {
            id: self.id,
            name: self.name.clone(),
            max_players: self.max_players,
            current_players: self.current_players,
            in_game: self.in_game,
        }
    }
}

/// Commands sent to a room actor through its channel.
pub(crate) enum RoomCommand {
    /// Admit a connection that is already wrapped in a link.
    Attach(Link),

    /// Dispose the room and stop. `done` fires once every connection has
    /// closed or the grace period ran out.
    Shutdown { done: oneshot::Sender<()> },
}

/// Handle to a running room actor.
///
/// Cheap to clone; the [`RoomManager`](crate::RoomManager) holds one per
/// room.
#[derive(Clone)]
pub struct RoomHandle {
    id: RoomId,
    sender: mpsc::UnboundedSender<RoomCommand>,
    info: watch::Receiver<RoomInfo>,
    cancel: watch::Receiver<bool>,
    send_timeout: Duration,
}

impl RoomHandle {
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Latest published metadata.
    pub fn info(&self) -> RoomInfo {
        self.info.borrow().clone()
    }

    /// Hands a new connection to the room. Its receive task starts right
    /// away; the room picks it up on its next loop iteration.
    pub fn attach<C: Connection>(&self, conn: C) -> Result<ConnectionId, RoomError> {
        let link = Link::spawn(conn, self.cancel.clone(), self.send_timeout);
        let conn_id = link.id();
        self.sender
            .send(RoomCommand::Attach(link))
            .map_err(|_| RoomError::Unavailable(self.id))?;
        Ok(conn_id)
    }

    /// Disposes the room and waits until it is gone.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Shutdown { done: done_tx })
            .map_err(|_| RoomError::Unavailable(self.id))?;
        done_rx.await.map_err(|_| RoomError::Unavailable(self.id))
    }

    /// Whether the room task is still running.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Spawns the room's task and returns a handle to it.
pub(crate) fn spawn_room(room: Room) -> RoomHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = TickScheduler::new(TickConfig::with_rate(room.config().tick_rate_hz));
    let handle = RoomHandle {
        id: room.id(),
        sender: tx,
        info: room.subscribe(),
        cancel: room.cancel_signal(),
        send_timeout: room.config().send_timeout,
    };
    tokio::spawn(run(room, rx, scheduler));
    handle
}

async fn run(
    mut room: Room,
    mut commands: mpsc::UnboundedReceiver<RoomCommand>,
    mut scheduler: TickScheduler,
) {
    info!(room_id = %room.id(), tick_rate_hz = scheduler.tick_rate_hz(), "room actor started");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(RoomCommand::Attach(link)) => {
                    room.adopt(link);
                }
                Some(RoomCommand::Shutdown { done }) => {
                    room.dispose().await;
                    let _ = done.send(());
                    break;
                }
                None => {
                    debug!(room_id = %room.id(), "all handles dropped");
                    room.dispose().await;
                    break;
                }
            },
            _ = scheduler.wait_for_tick() => {
                room.tick();
                scheduler.record_tick_end();
            }
        }
    }

    info!(room_id = %room.id(), "room actor stopped");
}
