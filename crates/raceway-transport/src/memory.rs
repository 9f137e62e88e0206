//! In-process transport built on Tokio channels.
//!
//! [`pair`] returns the server half (a [`MemoryConnection`], which
//! implements [`Connection`]) and the client half (a [`MemoryPeer`]).
//! Everything the server sends shows up at the peer and vice versa,
//! with no sockets involved.

use tokio::sync::{mpsc, watch, Mutex};

use crate::{Connection, ConnectionId, Received, TransportError};

enum PeerEvent {
    Data(Vec<u8>),
    Close(Option<String>),
}

/// Creates a connected server/client pair.
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (to_peer, from_server) = mpsc::unbounded_channel();
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(None);

    let conn = MemoryConnection {
        id: ConnectionId::next(),
        to_peer,
        from_peer: Mutex::new(from_peer),
        closed: closed_tx,
    };
    let peer = MemoryPeer {
        to_server,
        from_server,
        closed: closed_rx,
    };
    (conn, peer)
}

/// Server half of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    to_peer: mpsc::UnboundedSender<Vec<u8>>,
    from_peer: Mutex<mpsc::UnboundedReceiver<PeerEvent>>,
    /// `Some(reason)` once the server side has closed.
    closed: watch::Sender<Option<String>>,
}

impl Connection for MemoryConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if self.closed.borrow().is_some() {
            return Err(TransportError::ConnectionClosed(
                "connection already closed".into(),
            ));
        }
        self.to_peer.send(data.to_vec()).map_err(|_| {
            TransportError::ConnectionClosed("peer dropped".into())
        })
    }

    async fn recv(&self) -> Result<Received, Self::Error> {
        match self.from_peer.lock().await.recv().await {
            Some(PeerEvent::Data(data)) => Ok(Received::Frame(data)),
            Some(PeerEvent::Close(reason)) => Ok(Received::Closed { reason }),
            None => Ok(Received::Closed { reason: None }),
        }
    }

    async fn close(&self, reason: &str) -> Result<(), Self::Error> {
        self.closed.send_replace(Some(reason.to_string()));
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Client half of an in-memory connection.
pub struct MemoryPeer {
    to_server: mpsc::UnboundedSender<PeerEvent>,
    from_server: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: watch::Receiver<Option<String>>,
}

impl MemoryPeer {
    /// Sends one message to the server.
    pub fn send(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.to_server.send(PeerEvent::Data(data)).map_err(|_| {
            TransportError::ConnectionClosed("server dropped".into())
        })
    }

    /// Closes the connection from the client side.
    pub fn close(&self, reason: Option<&str>) -> Result<(), TransportError> {
        self.to_server
            .send(PeerEvent::Close(reason.map(str::to_string)))
            .map_err(|_| {
                TransportError::ConnectionClosed("server dropped".into())
            })
    }

    /// Waits for the next message from the server. `None` once the
    /// server half has been dropped and everything was read.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_server.recv().await
    }

    /// Returns the next message if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.from_server.try_recv().ok()
    }

    /// Takes every message that is already waiting, oldest first.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Ok(data) = self.from_server.try_recv() {
            out.push(data);
        }
        out
    }

    /// Whether the server has closed its half.
    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }

    /// The reason the server gave when closing, if it has.
    pub fn close_reason(&self) -> Option<String> {
        self.closed.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_data_flows_both_ways() {
        let (conn, mut peer) = pair();

        conn.send(b"to client").await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), b"to client");

        peer.send(b"to server".to_vec()).unwrap();
        assert_eq!(
            conn.recv().await.unwrap(),
            Received::Frame(b"to server".to_vec())
        );
    }

    #[tokio::test]
    async fn test_peer_close_carries_reason() {
        let (conn, peer) = pair();
        peer.close(Some("bye")).unwrap();
        assert_eq!(
            conn.recv().await.unwrap(),
            Received::Closed {
                reason: Some("bye".into())
            }
        );
    }

    #[tokio::test]
    async fn test_dropped_peer_reads_as_closed() {
        let (conn, peer) = pair();
        drop(peer);
        assert_eq!(
            conn.recv().await.unwrap(),
            Received::Closed { reason: None }
        );
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (conn, peer) = pair();
        conn.close("done").await.unwrap();
        assert!(peer.is_closed());
        assert_eq!(peer.close_reason().as_deref(), Some("done"));
        assert!(conn.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_drain_returns_messages_in_order() {
        let (conn, mut peer) = pair();
        for i in 0..3u8 {
            conn.send(&[i]).await.unwrap();
        }
        assert_eq!(peer.drain(), vec![vec![0], vec![1], vec![2]]);
        assert!(peer.try_recv().is_none());
    }
}
