//! Bounded blocking channels with cooperative shutdown and one-shot error hand-off.
//!
//! Pipeline stages communicate through these channels only. A producer finishing cleanly
//! calls [`ClosableQueue::close`], which lets consumers drain whatever is still queued and
//! then observe [`Disconnected::Closed`]. A failing stage calls [`ClosableQueue::close_error`]
//! instead: pending items are dropped, every blocked or future caller is woken with
//! [`Disconnected::Failed`], and the stored error is handed out to exactly one of them so a
//! single root cause travels up to the orchestrator.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Reason a channel operation did not transfer an item.
#[derive(Debug, PartialEq, Eq)]
pub enum Disconnected<E> {
    /// The channel was closed cleanly and is fully drained.
    Closed,
    /// The channel was shut down by a failure. The first observer receives the stored
    /// error; later observers only learn that the channel failed.
    Failed(Option<E>),
}

impl<E> Disconnected<E> {
    /// Extracts the stored error, if this observer was the one it was handed to.
    pub fn into_error(self) -> Option<E> {
        match self {
            Disconnected::Closed => None,
            Disconnected::Failed(error) => error,
        }
    }
}

enum Shutdown<E> {
    Open,
    Closed,
    Failed(Option<E>),
}

impl<E> Shutdown<E> {
    /// Takes the stored error out of a failed channel, leaving the failed marker behind.
    fn take_failure(&mut self) -> Disconnected<E> {
        match self {
            Shutdown::Failed(error) => Disconnected::Failed(error.take()),
            _ => unreachable!("channel is not in a failed state"),
        }
    }
}

struct QueueState<T, E> {
    items: VecDeque<T>,
    shutdown: Shutdown<E>,
}

/// Bounded multi-producer multi-consumer FIFO channel.
///
/// `push` blocks while the queue is full and open; `pop` blocks while it is empty and open.
/// After a clean [`close`](ClosableQueue::close) consumers still drain the remaining items.
/// After [`close_error`](ClosableQueue::close_error) no further item is handed out.
pub struct ClosableQueue<T, E> {
    state: Mutex<QueueState<T, E>>,
    capacity: usize,
    has_items: Condvar,
    has_space: Condvar,
}

impl<T, E> ClosableQueue<T, E> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of queued items, must be non-zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");

        return ClosableQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutdown: Shutdown::Open,
            }),
            capacity,
            has_items: Condvar::new(),
            has_space: Condvar::new(),
        };
    }

    /// Appends an item, blocking while the queue is full.
    /// Fails once the queue has been closed or shut down by an error.
    pub fn push(&self, item: T) -> Result<(), Disconnected<E>> {
        let mut state = self.state.lock().unwrap();

        loop {
            match state.shutdown {
                Shutdown::Open => {
                    if state.items.len() < self.capacity {
                        state.items.push_back(item);
                        self.has_items.notify_one();
                        return Ok(());
                    }
                    state = self.has_space.wait(state).unwrap();
                }
                Shutdown::Closed => return Err(Disconnected::Closed),
                Shutdown::Failed(_) => return Err(state.shutdown.take_failure()),
            }
        }
    }

    /// Removes the oldest item, blocking while the queue is empty and open.
    /// After a clean close the remaining items are still handed out; after a failure
    /// pending items are discarded and the failure is reported immediately.
    pub fn pop(&self) -> Result<T, Disconnected<E>> {
        let mut state = self.state.lock().unwrap();

        loop {
            if let Shutdown::Failed(_) = state.shutdown {
                return Err(state.shutdown.take_failure());
            }

            if let Some(item) = state.items.pop_front() {
                self.has_space.notify_one();
                return Ok(item);
            }

            match state.shutdown {
                Shutdown::Open => state = self.has_items.wait(state).unwrap(),
                Shutdown::Closed => return Err(Disconnected::Closed),
                Shutdown::Failed(_) => unreachable!("failed state is handled above"),
            }
        }
    }

    /// Closes the queue cleanly: producers fail from now on, consumers drain what is left.
    /// Closing an already shut down queue has no effect.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();

        if let Shutdown::Open = state.shutdown {
            state.shutdown = Shutdown::Closed;
        }
        self.wake_all();
    }

    /// Shuts the queue down with an error, waking every blocked caller.
    /// The first stored error wins; a failure overrides a clean close.
    pub fn close_error(&self, error: E) {
        let mut state = self.state.lock().unwrap();

        match state.shutdown {
            Shutdown::Open | Shutdown::Closed => state.shutdown = Shutdown::Failed(Some(error)),
            Shutdown::Failed(_) => {}
        }
        self.wake_all();
    }

    /// Takes a stored error no channel user picked up. Intended for the orchestrator
    /// after all stages have been joined.
    pub fn failure(&self) -> Option<E> {
        let mut state = self.state.lock().unwrap();

        match &mut state.shutdown {
            Shutdown::Failed(error) => error.take(),
            _ => None,
        }
    }

    /// Number of currently queued items.
    pub fn len(&self) -> usize {
        return self.state.lock().unwrap().items.len();
    }

    /// Checks whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    fn wake_all(&self) {
        self.has_items.notify_all();
        self.has_space.notify_all();
    }
}

struct SlotState<T, E> {
    item: Option<T>,
    shutdown: Shutdown<E>,
}

/// Single-slot rendezvous channel for strict one-producer/one-consumer edges.
///
/// Behaves like a [`ClosableQueue`] of capacity 1 but keeps the item inline instead of
/// in a deque. The shutdown contract is identical.
pub struct SingleSlotHandoff<T, E> {
    state: Mutex<SlotState<T, E>>,
    has_item: Condvar,
    has_space: Condvar,
}

impl<T, E> SingleSlotHandoff<T, E> {
    /// Creates an empty hand-off slot.
    pub fn new() -> Self {
        return SingleSlotHandoff {
            state: Mutex::new(SlotState {
                item: None,
                shutdown: Shutdown::Open,
            }),
            has_item: Condvar::new(),
            has_space: Condvar::new(),
        };
    }

    /// Stores an item, blocking while the slot is occupied.
    pub fn push(&self, item: T) -> Result<(), Disconnected<E>> {
        let mut state = self.state.lock().unwrap();

        loop {
            match state.shutdown {
                Shutdown::Open => {
                    if state.item.is_none() {
                        state.item = Some(item);
                        self.has_item.notify_one();
                        return Ok(());
                    }
                    state = self.has_space.wait(state).unwrap();
                }
                Shutdown::Closed => return Err(Disconnected::Closed),
                Shutdown::Failed(_) => return Err(state.shutdown.take_failure()),
            }
        }
    }

    /// Takes the stored item, blocking while the slot is empty and open.
    pub fn pop(&self) -> Result<T, Disconnected<E>> {
        let mut state = self.state.lock().unwrap();

        loop {
            if let Shutdown::Failed(_) = state.shutdown {
                return Err(state.shutdown.take_failure());
            }

            if let Some(item) = state.item.take() {
                self.has_space.notify_one();
                return Ok(item);
            }

            match state.shutdown {
                Shutdown::Open => state = self.has_item.wait(state).unwrap(),
                Shutdown::Closed => return Err(Disconnected::Closed),
                Shutdown::Failed(_) => unreachable!("failed state is handled above"),
            }
        }
    }

    /// Closes the slot cleanly; a pending item is still handed out.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();

        if let Shutdown::Open = state.shutdown {
            state.shutdown = Shutdown::Closed;
        }
        self.has_item.notify_all();
        self.has_space.notify_all();
    }

    /// Shuts the slot down with an error; a pending item is discarded.
    pub fn close_error(&self, error: E) {
        let mut state = self.state.lock().unwrap();

        match state.shutdown {
            Shutdown::Open | Shutdown::Closed => {
                state.item = None;
                state.shutdown = Shutdown::Failed(Some(error));
            }
            Shutdown::Failed(_) => {}
        }
        self.has_item.notify_all();
        self.has_space.notify_all();
    }

    /// Takes a stored error no channel user picked up.
    pub fn failure(&self) -> Option<E> {
        let mut state = self.state.lock().unwrap();

        match &mut state.shutdown {
            Shutdown::Failed(error) => error.take(),
            _ => None,
        }
    }
}

impl<T, E> Default for SingleSlotHandoff<T, E> {
    fn default() -> Self {
        return SingleSlotHandoff::new();
    }
}
