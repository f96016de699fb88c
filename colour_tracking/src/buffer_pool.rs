// THEORY:
// The buffer pool is the pipeline's back-pressure. It owns a fixed population of
// `FrameBuffer`s and the frame source may only capture while one is free, so the
// frames in flight never outnumber the pool however far the workers fall behind.
//
// Buffers leave the pool as `PooledFrame` loans. A loan derefs to its buffer and,
// when dropped (a panic unwind included), resets it and puts it back. Nothing
// downstream has to remember to return a buffer.
//
// The free list and the loan count live under one lock, and the loan count is
// derived from the free list's length. Any observer therefore sees
// `available + in_flight == size`, not just a quiet pool.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::core_modules::frame_buffer::FrameBuffer;
use crate::error::{Result, TrackingError};

/// A consistent reading of a pool's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub available: usize,
    pub in_flight: usize,
}

struct PoolInner {
    name: String,
    size: usize,
    free: Mutex<Vec<FrameBuffer>>,
    returned: Condvar,
}

impl PoolInner {
    fn give_back(&self, mut buffer: FrameBuffer) {
        buffer.reset();
        let mut free = self.free.lock();
        if free.len() == self.size {
            error!(
                pool = %self.name,
                buffer = buffer.id(),
                "free list overflow, buffer discarded"
            );
            debug_assert!(false, "buffer pool free list overflow");
            return;
        }
        free.push(buffer);
        drop(free);
        self.returned.notify_one();
    }

    fn counts(&self) -> PoolCounts {
        let available = self.free.lock().len();
        PoolCounts {
            available,
            in_flight: self.size - available,
        }
    }
}

/// Shared handle on a buffer pool. Clones refer to the same pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts();
        f.debug_struct("BufferPool")
            .field("name", &self.inner.name)
            .field("size", &self.size())
            .field("available", &counts.available)
            .field("in_flight", &counts.in_flight)
            .finish()
    }
}

impl BufferPool {
    /// Creates `size` empty buffers.
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self> {
        Self::with_capacity(name, size, 0)
    }

    /// Creates `size` buffers whose raw storage is pre-allocated to `capacity` bytes.
    pub fn with_capacity(name: impl Into<String>, size: usize, capacity: usize) -> Result<Self> {
        let name = name.into();
        if size == 0 {
            return Err(TrackingError::Config(format!(
                "buffer pool '{name}' needs at least one buffer"
            )));
        }

        // Popped from the back, so buffer 0 goes out first.
        let free = (0..size)
            .rev()
            .map(|id| FrameBuffer::with_capacity(id, capacity))
            .collect();

        debug!(pool = %name, size, capacity, "buffer pool created");
        Ok(Self {
            inner: Arc::new(PoolInner {
                name,
                size,
                free: Mutex::new(free),
                returned: Condvar::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Buffers currently sitting in the free list.
    pub fn available(&self) -> usize {
        self.counts().available
    }

    /// Buffers currently on loan.
    pub fn in_flight(&self) -> usize {
        self.counts().in_flight
    }

    /// Free and loaned buffers, read together.
    pub fn counts(&self) -> PoolCounts {
        self.inner.counts()
    }

    fn loan(&self, buffer: FrameBuffer) -> PooledFrame {
        PooledFrame {
            buffer: Some(buffer),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Blocks until a buffer is free.
    pub fn acquire(&self) -> PooledFrame {
        let mut free = self.inner.free.lock();
        loop {
            if let Some(buffer) = free.pop() {
                return self.loan(buffer);
            }
            self.inner.returned.wait(&mut free);
        }
    }

    pub fn try_acquire(&self) -> Option<PooledFrame> {
        let buffer = self.inner.free.lock().pop()?;
        Some(self.loan(buffer))
    }

    /// Waits at most `timeout` for a buffer. A timeout means every buffer is in flight.
    pub fn acquire_timeout(&self, timeout: Duration) -> Option<PooledFrame> {
        let deadline = Instant::now() + timeout;
        let mut free = self.inner.free.lock();
        loop {
            if let Some(buffer) = free.pop() {
                return Some(self.loan(buffer));
            }
            if self.inner.returned.wait_until(&mut free, deadline).timed_out() && free.is_empty() {
                drop(free);
                debug!(
                    pool = %self.inner.name,
                    in_flight = self.inner.size,
                    elapsed_ms = timeout.as_millis() as u64,
                    "no free buffer, back-pressure"
                );
                return None;
            }
        }
    }

    /// Returns a loan explicitly. Equivalent to dropping it.
    pub fn release(&self, frame: PooledFrame) {
        if !Arc::ptr_eq(&self.inner, &frame.pool) {
            error!(
                pool = %self.inner.name,
                owner = %frame.pool.name,
                "buffer released into a pool it was not taken from"
            );
            debug_assert!(false, "buffer released into a foreign pool");
        }
        drop(frame);
    }

    pub fn owns(&self, frame: &PooledFrame) -> bool {
        Arc::ptr_eq(&self.inner, &frame.pool)
    }
}

/// A buffer on loan from a [`BufferPool`].
pub struct PooledFrame {
    buffer: Option<FrameBuffer>,
    pool: Arc<PoolInner>,
}

impl fmt::Debug for PooledFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledFrame")
            .field("pool", &self.pool.name)
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl Deref for PooledFrame {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        // Only `Drop` takes the buffer out.
        self.buffer.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut FrameBuffer {
        self.buffer.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.give_back(buffer);
        }
    }
}
