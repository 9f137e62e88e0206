//! Room-owned wrapper around one client connection.
//!
//! A [`Link`] owns two queues and nothing else the room can see:
//!
//! - **inbound**: decoded [`ClientFrame`]s in arrival order, filled by a
//!   receive task and drained by the room with [`Link::try_recv`].
//! - **outbound**: encoded frames ordered by [`Priority`], drained to the
//!   socket by a send task. At most one send task runs per link, so writes
//!   never interleave.
//!
//! Peer closes and transport faults come back to the room as a synthetic
//! `Disconnect` frame, so every teardown goes through the same path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use raceway_protocol::{ClientFrame, JsonCodec, ProtocolError, ServerFrame};
use raceway_transport::{Connection, ConnectionId, Received};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::queue::{OutboundQueue, Priority};

/// Reason sent to every client when its room goes away.
pub const SHUTDOWN_REASON: &str = "Server is shutting down";

enum Outgoing {
    Frame(Vec<u8>),
    /// Close the transport; everything queued behind it is discarded.
    Close(String),
}

/// Type-erased view of a [`Pipe`], so the room can hold links over any
/// transport in one map.
trait Outlet: Send + Sync + 'static {
    fn enqueue(self: Arc<Self>, bytes: Vec<u8>, priority: Priority);
    fn disconnect(self: Arc<Self>, reason: &str);
    fn is_closing(&self) -> bool;
    fn abort(&self);
}

struct Pipe<C: Connection> {
    conn: C,
    queue: Mutex<OutboundQueue<Outgoing>>,
    /// Set while a send task owns the queue.
    sending: AtomicBool,
    /// Set after the first transport fault; later frames are skipped.
    broken: AtomicBool,
    closing: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    inbound: mpsc::UnboundedSender<ClientFrame>,
    send_timeout: Duration,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl<C: Connection> Pipe<C> {
    fn push(self: &Arc<Self>, item: Outgoing, priority: Priority) {
        self.queue.lock().push(item, priority);
        self.kick();
    }

    /// Starts a send task unless one is already running.
    fn kick(self: &Arc<Self>) {
        if self
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let handle = tokio::spawn(Arc::clone(self).drain());
            let mut tasks = self.tasks.lock();
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle.abort_handle());
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.queue.lock().pop();
            let Some(item) = next else {
                self.sending.store(false, Ordering::Release);
                // A push can land between the failed pop and the store.
                // Whoever wins the flag back drains it.
                if self.queue.lock().is_empty()
                    || self
                        .sending
                        .compare_exchange(
                            false,
                            true,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_err()
                {
                    return;
                }
                continue;
            };

            match item {
                Outgoing::Frame(bytes) => self.send_one(&bytes).await,
                Outgoing::Close(reason) => {
                    match tokio::time::timeout(
                        self.send_timeout,
                        self.conn.close(&reason),
                    )
                    .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(conn_id = %self.conn.id(), error = %e, "close failed");
                        }
                        Err(_) => {
                            debug!(conn_id = %self.conn.id(), "close timed out");
                        }
                    }
                    self.queue.lock().clear();
                    self.closed.send_replace(true);
                    debug!(conn_id = %self.conn.id(), %reason, "link closed");
                    // `sending` stays set so nothing is written after close.
                    return;
                }
            }
        }
    }

    async fn send_one(&self, bytes: &[u8]) {
        if self.broken.load(Ordering::Acquire) {
            return;
        }
        let reason =
            match tokio::time::timeout(self.send_timeout, self.conn.send(bytes))
                .await
            {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("Send failed: {e}"),
                Err(_) => "Send timed out".to_string(),
            };
        if self.broken.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(conn_id = %self.conn.id(), %reason, "outbound fault");
        if !*self.closing.borrow() {
            let _ = self.inbound.send(ClientFrame::Disconnect {
                reason: Some(reason),
            });
        }
    }

    fn begin_close(self: &Arc<Self>, reason: &str) {
        if self.closing.send_replace(true) {
            return;
        }
        let goodbye = ServerFrame::Disconnect {
            reason: reason.to_string(),
        };
        match goodbye.encode(&JsonCodec) {
            Ok(bytes) => self
                .queue
                .lock()
                .push(Outgoing::Frame(bytes), Priority::CONTROL),
            Err(e) => warn!(error = %e, "failed to encode disconnect frame"),
        }
        self.push(Outgoing::Close(reason.to_string()), Priority::CONTROL);
    }
}

impl<C: Connection> Outlet for Pipe<C> {
    fn enqueue(self: Arc<Self>, bytes: Vec<u8>, priority: Priority) {
        if *self.closing.borrow() {
            trace!(conn_id = %self.conn.id(), "link closing, frame dropped");
            return;
        }
        self.push(Outgoing::Frame(bytes), priority);
    }

    fn disconnect(self: Arc<Self>, reason: &str) {
        self.begin_close(reason);
    }

    fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    fn abort(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.closed.send_replace(true);
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // A dropped sender counts as cancellation too.
    let _ = rx.wait_for(|v| *v).await;
}

async fn receive<C: Connection>(
    pipe: Arc<Pipe<C>>,
    mut room_cancel: watch::Receiver<bool>,
) {
    let mut closing = pipe.closing.subscribe();
    loop {
        let received = tokio::select! {
            _ = cancelled(&mut room_cancel) => {
                pipe.begin_close(SHUTDOWN_REASON);
                return;
            }
            _ = cancelled(&mut closing) => return,
            received = pipe.conn.recv() => received,
        };

        let frame = match received {
            Ok(Received::Frame(bytes)) => {
                match ClientFrame::decode(&JsonCodec, &bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(conn_id = %pipe.conn.id(), error = %e, "dropping undecodable frame");
                        continue;
                    }
                }
            }
            Ok(Received::Closed { reason }) => {
                debug!(conn_id = %pipe.conn.id(), ?reason, "peer closed");
                let _ = pipe.inbound.send(ClientFrame::Disconnect { reason });
                return;
            }
            Err(e) => {
                let _ = pipe.inbound.send(ClientFrame::Disconnect {
                    reason: Some(format!("Connection error: {e}")),
                });
                return;
            }
        };

        if pipe.inbound.send(frame).is_err() {
            // The room no longer holds this link.
            pipe.begin_close("Connection abandoned");
            return;
        }
    }
}

/// One client connection as the room sees it.
pub(crate) struct Link {
    id: ConnectionId,
    outlet: Arc<dyn Outlet>,
    inbound: mpsc::UnboundedReceiver<ClientFrame>,
    closed: watch::Receiver<bool>,
    /// Passed the version handshake.
    pub validated: bool,
    /// When the outstanding heartbeat probe was sent.
    pub heartbeat_sent: Option<Instant>,
    /// Round trip of the last answered probe.
    pub ping: Option<Duration>,
    /// Ticks spent waiting on the outstanding probe.
    pub missed_ticks: u32,
}

impl Link {
    /// Wraps `conn` and starts its receive task. When `room_cancel` turns
    /// true (or its sender is dropped) the link says goodbye and closes.
    pub fn spawn<C: Connection>(
        conn: C,
        room_cancel: watch::Receiver<bool>,
        send_timeout: Duration,
    ) -> Self {
        let id = conn.id();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let (closing_tx, _) = watch::channel(false);

        let pipe = Arc::new(Pipe {
            conn,
            queue: Mutex::new(OutboundQueue::new()),
            sending: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            closing: closing_tx,
            closed: closed_tx,
            inbound: inbound_tx,
            send_timeout,
            tasks: Mutex::new(Vec::new()),
        });
        let reader = tokio::spawn(receive(Arc::clone(&pipe), room_cancel));
        pipe.tasks.lock().push(reader.abort_handle());
        debug!(conn_id = %id, "link opened");

        Self {
            id,
            outlet: pipe,
            inbound: inbound_rx,
            closed: closed_rx,
            validated: false,
            heartbeat_sent: None,
            ping: None,
            missed_ticks: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues already-encoded bytes.
    pub fn enqueue(&self, bytes: Vec<u8>, priority: Priority) {
        Arc::clone(&self.outlet).enqueue(bytes, priority);
    }

    pub fn send(
        &self,
        frame: &ServerFrame,
        priority: Priority,
    ) -> Result<(), ProtocolError> {
        self.enqueue(frame.encode(&JsonCodec)?, priority);
        Ok(())
    }

    /// Next inbound frame, if one is waiting.
    pub fn try_recv(&mut self) -> Option<ClientFrame> {
        self.inbound.try_recv().ok()
    }

    /// Drops pending output, sends a `Disconnect` frame and closes.
    /// Only the first call has any effect.
    pub fn disconnect(&self, reason: &str) {
        Arc::clone(&self.outlet).disconnect(reason);
    }

    pub fn is_closing(&self) -> bool {
        self.outlet.is_closing()
    }

    /// Turns true once the transport has been closed.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    /// Kills the link's tasks without waiting for the socket.
    pub fn abort(&self) {
        self.outlet.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raceway_protocol::{ClientInfo, Codec};
    use raceway_transport::memory::{self, MemoryPeer};

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn open() -> (Link, MemoryPeer, watch::Sender<bool>) {
        let (conn, peer) = memory::pair();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let link = Link::spawn(conn, cancel_rx, Duration::from_secs(5));
        (link, peer, cancel_tx)
    }

    fn decode(bytes: &[u8]) -> ServerFrame {
        ServerFrame::decode(&JsonCodec, bytes).unwrap()
    }

    #[tokio::test]
    async fn test_outbound_respects_priority_then_fifo() {
        let (link, mut peer, _cancel) = open();

        link.enqueue(vec![3, b'a'], Priority(5));
        link.enqueue(vec![3, b'b'], Priority(1));
        link.enqueue(vec![3, b'c'], Priority(5));
        settle().await;

        assert_eq!(
            peer.drain(),
            vec![vec![3, b'b'], vec![3, b'a'], vec![3, b'c']]
        );
    }

    #[tokio::test]
    async fn test_inbound_frames_arrive_in_order() {
        let (mut link, peer, _cancel) = open();

        let info = ClientInfo {
            version: 0.91,
            is_testing: false,
        };
        peer.send(ClientFrame::Connect(Some(info)).encode(&JsonCodec).unwrap())
            .unwrap();
        peer.send(vec![3, 9, 9]).unwrap();
        settle().await;

        assert_eq!(link.try_recv(), Some(ClientFrame::Connect(Some(info))));
        assert_eq!(link.try_recv(), Some(ClientFrame::PlayerMovement(vec![9, 9])));
        assert_eq!(link.try_recv(), None);
    }

    #[tokio::test]
    async fn test_garbage_is_dropped_and_link_stays_open() {
        let (mut link, peer, _cancel) = open();

        peer.send(vec![42, 1, 2]).unwrap();
        peer.send(JsonCodec.encode(&"junk").unwrap()).unwrap();
        peer.send(vec![4, 1, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        settle().await;

        assert_eq!(link.try_recv(), Some(ClientFrame::Heartbeat { sent_at: 1 }));
        assert!(!link.is_closing());
    }

    #[tokio::test]
    async fn test_peer_close_becomes_disconnect_frame() {
        let (mut link, peer, _cancel) = open();
        peer.close(Some("alt-f4")).unwrap();
        settle().await;

        assert_eq!(
            link.try_recv(),
            Some(ClientFrame::Disconnect {
                reason: Some("alt-f4".into())
            })
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (link, mut peer, _cancel) = open();
        link.enqueue(vec![3, 1], Priority::MOVEMENT);
        link.disconnect("Kicked by server");
        link.disconnect("second call");
        link.enqueue(vec![3, 2], Priority::CONTROL);
        settle().await;

        let frames = peer.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            decode(&frames[0]),
            ServerFrame::Disconnect {
                reason: "Kicked by server".into()
            }
        );
        assert_eq!(peer.close_reason().as_deref(), Some("Kicked by server"));
        assert!(*link.closed_signal().borrow());
    }

    #[tokio::test]
    async fn test_room_cancel_closes_gracefully() {
        let (link, mut peer, cancel) = open();
        cancel.send_replace(true);
        settle().await;

        let frames = peer.drain();
        assert_eq!(
            decode(&frames[0]),
            ServerFrame::Disconnect {
                reason: SHUTDOWN_REASON.into()
            }
        );
        assert!(link.is_closing());
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_send_fault_reports_disconnect() {
        let (mut link, peer, _cancel) = open();
        drop(peer);
        settle().await;
        // Dropping the peer closes its side; the receive task reports that
        // first, then the failed write is reported too.
        link.enqueue(vec![3, 7], Priority::NORMAL);
        settle().await;

        let mut reasons = Vec::new();
        while let Some(frame) = link.try_recv() {
            if let ClientFrame::Disconnect { reason } = frame {
                reasons.push(reason);
            }
        }
        assert_eq!(reasons.first(), Some(&None));
        assert!(
            reasons
                .iter()
                .flatten()
                .any(|r| r.starts_with("Send failed"))
        );
    }
}
