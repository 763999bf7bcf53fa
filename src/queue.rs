//! `UQueue`: a bounded multi-producer, single-consumer handoff used to
//! move ubufs (or any other owned payload) across a thread boundary
//! without the sender blocking.
//!
//! The teacher crate hands audio-thread-bound state to and from its
//! realtime thread over `crossbeam-channel` bounded channels rather than
//! a hand-rolled ring buffer; `UQueue` wraps that same channel for the
//! general case described in spec.md §2 ("UPool / ULifo / UQueue"). The
//! one path in the graph that is actually latency-critical enough to
//! warrant a lock-free SPSC ring is the pump's wakeup path, which uses
//! `rtrb` directly (see `pump.rs`) instead of going through `UQueue`.

use crate::error::UError;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

/// The producer half. Cloneable: any number of threads may hold one.
#[derive(Clone)]
pub struct UQueueSender<T> {
    tx: Sender<T>,
}

/// The consumer half. Not `Clone` — a `UQueue` has exactly one consumer.
pub struct UQueueReceiver<T> {
    rx: Receiver<T>,
}

impl<T> UQueueSender<T> {
    /// Non-blocking push. Returns `UError::Busy` if the queue is full
    /// (matches spec.md's "a full UQueue is a Busy condition, not an
    /// error the producer should treat as fatal").
    pub fn try_push(&self, value: T) -> Result<(), UError> {
        self.tx.try_send(value).map_err(|err| match err {
            TrySendError::Full(_) => UError::Busy,
            TrySendError::Disconnected(_) => UError::Invalid,
        })
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> UQueueReceiver<T> {
    /// Non-blocking pop. Returns `Ok(None)` when empty rather than an
    /// error: an empty queue is the steady-state condition, not a fault.
    pub fn try_pop(&self) -> Result<Option<T>, UError> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(UError::Invalid),
        }
    }

    /// Drain everything currently queued, in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create a bounded queue of the given capacity. `capacity == 0` yields a
/// rendezvous channel (every push blocks until a matching pop) which is
/// rarely what a pipe wants; pipes should pick a capacity sized to their
/// expected burst depth.
pub fn uqueue<T>(capacity: usize) -> (UQueueSender<T>, UQueueReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (UQueueSender { tx }, UQueueReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trip() {
        let (tx, rx) = uqueue::<u32>(4);
        tx.try_push(1).unwrap();
        tx.try_push(2).unwrap();
        assert_eq!(rx.try_pop().unwrap(), Some(1));
        assert_eq!(rx.try_pop().unwrap(), Some(2));
        assert_eq!(rx.try_pop().unwrap(), None);
    }

    #[test]
    fn full_queue_reports_busy() {
        let (tx, _rx) = uqueue::<u32>(1);
        tx.try_push(1).unwrap();
        assert_eq!(tx.try_push(2), Err(UError::Busy));
    }

    #[test]
    fn multi_producer_fifo_order() {
        let (tx, rx) = uqueue::<u32>(8);
        let tx2 = tx.clone();
        tx.try_push(1).unwrap();
        tx2.try_push(2).unwrap();
        assert_eq!(rx.drain(), vec![1, 2]);
    }

    #[test]
    fn disconnected_receiver_reports_invalid() {
        let (tx, rx) = uqueue::<u32>(1);
        drop(rx);
        assert_eq!(tx.try_push(1), Err(UError::Invalid));
    }
}
