//! Priority-ordered outbound queue.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Send priority. Lower values go out first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Disconnects, race start, handshake replies.
    pub const CONTROL: Priority = Priority(0);
    /// Lobby/race state changes and heartbeat probes.
    pub const STATE: Priority = Priority(10);
    pub const CLIENT_LEFT: Priority = Priority(20);
    /// Ordinary relays, chat, settings.
    pub const NORMAL: Priority = Priority(50);
    /// Movement relays; first to wait under load.
    pub const MOVEMENT: Priority = Priority(200);
}

struct Entry<T> {
    priority: Priority,
    seq: u64,
    item: T,
}

impl<T> Entry<T> {
    // BinaryHeap is a max-heap: invert so the lowest priority value and
    // then the oldest entry compare greatest.
    fn key(&self) -> (Reverse<Priority>, Reverse<u64>) {
        (Reverse(self.priority), Reverse(self.seq))
    }
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Min-priority queue with FIFO order among equal priorities.
pub struct OutboundQueue<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> OutboundQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, item: T, priority: Priority) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority,
            seq,
            item,
        });
    }

    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|e| e.item)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

impl<T> Default for OutboundQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_priority_value_pops_first() {
        let mut q = OutboundQueue::new();
        q.push("a", Priority(5));
        q.push("b", Priority(1));
        q.push("c", Priority(5));

        assert_eq!(q.pop(), Some("b"));
        assert_eq!(q.pop(), Some("a"));
        assert_eq!(q.pop(), Some("c"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_equal_priorities_keep_insertion_order() {
        let mut q = OutboundQueue::new();
        for i in 0..100 {
            q.push(i, Priority::NORMAL);
        }
        let out: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(out, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_control_overtakes_movement_backlog() {
        let mut q = OutboundQueue::new();
        for _ in 0..10 {
            q.push("move", Priority::MOVEMENT);
        }
        q.push("disconnect", Priority::CONTROL);
        assert_eq!(q.len(), 11);
        assert_eq!(q.pop(), Some("disconnect"));
        q.clear();
        assert!(q.is_empty());
    }
}
