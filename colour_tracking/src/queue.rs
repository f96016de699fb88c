// THEORY:
// Stages talk to each other only through `Queue`s. A queue carries `Item`s, which
// are either a unit of work or the shutdown sentinel. Folding the sentinel into the
// element type means a single `pop` tells a worker everything it needs to know,
// and the sentinel is naturally ordered after every frame pushed before it.
//
// A `Queue` owns both ends of a crossbeam channel. Cloning it clones both ends, so
// any stage can push and pop and the channel can never disconnect while a stage
// still holds it. Shutdown is therefore always an explicit sentinel, never a
// dropped sender.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};

/// Element of every pipeline queue.
#[derive(Debug)]
pub enum Item<T> {
    Frame(T),
    Shutdown,
}

impl<T> Item<T> {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Item::Shutdown)
    }

    pub fn into_frame(self) -> Option<T> {
        match self {
            Item::Frame(frame) => Some(frame),
            Item::Shutdown => None,
        }
    }
}

/// Result of a non-blocking push.
#[derive(Debug)]
pub enum PushError<T> {
    /// The queue is at capacity; the item is handed back.
    Full(Item<T>),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> Item<T> {
        match self {
            PushError::Full(item) => item,
        }
    }
}

/// FIFO hand-off between pipeline stages.
#[derive(Debug)]
pub struct Queue<T> {
    sender: Sender<Item<T>>,
    receiver: Receiver<Item<T>>,
    capacity: Option<usize>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> Queue<T> {
    pub fn unbounded() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            capacity: None,
        }
    }

    /// A queue holding at most `capacity` items. Capacity 0 is a rendezvous channel.
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity: Some(capacity),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Blocks until there is room.
    pub fn push(&self, item: Item<T>) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.sender.send(item);
    }

    pub fn push_frame(&self, frame: T) {
        self.push(Item::Frame(frame));
    }

    pub fn push_shutdown(&self) {
        self.push(Item::Shutdown);
    }

    /// Pushes without blocking; on a full queue the item comes back.
    pub fn try_push(&self, item: Item<T>) -> Result<(), PushError<T>> {
        match self.sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                Err(PushError::Full(item))
            }
        }
    }

    /// Like [`Queue::try_push`] for a frame, returning the frame itself on failure.
    pub fn try_push_frame(&self, frame: T) -> Result<(), T> {
        match self.sender.try_send(Item::Frame(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(Item::Frame(frame)))
            | Err(TrySendError::Disconnected(Item::Frame(frame))) => Err(frame),
            // Only a frame was sent, so only a frame can come back.
            Err(_) => Ok(()),
        }
    }

    pub fn push_timeout(&self, item: Item<T>, timeout: Duration) -> Result<(), Item<T>> {
        match self.sender.send_timeout(item, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(item)) | Err(SendTimeoutError::Disconnected(item)) => {
                Err(item)
            }
        }
    }

    /// Blocks until an item arrives.
    pub fn pop(&self) -> Item<T> {
        // Unreachable disconnect is reported as shutdown so callers still exit.
        self.receiver.recv().unwrap_or(Item::Shutdown)
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<Item<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Item::Shutdown),
        }
    }

    pub fn try_pop(&self) -> Option<Item<T>> {
        self.receiver.try_recv().ok()
    }
}
