// THEORY:
// The `FrameSource` is the head of the pipeline: one dedicated thread that keeps
// the capture queue fed. It is throttled by the buffer pool, not by a timer. When
// every buffer is in flight the source waits (with a short timeout so it can
// notice a stop request), which is exactly the back-pressure the workers need.
//
// The camera itself is a collaborator behind `FrameCapture`. The source does not
// care whether it is a real device, a directory of images, or a test closure. A
// failed capture is not fatal: the buffer goes back to the pool, the failure is
// counted and the loop carries on. Finite collaborators report `Exhausted` and the
// source winds down on its own.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer_pool::{BufferPool, PooledFrame};
use crate::core_modules::frame_buffer::FrameBuffer;
use crate::error::{CaptureError, Result, TrackingError};
use crate::queue::Queue;

/// Default wait for a free buffer before re-checking the stop flag.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(200);

/// What a single capture attempt produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// The buffer holds a new frame.
    Captured,
    /// The collaborator has no more frames.
    Exhausted,
}

pub type CaptureResult = std::result::Result<CaptureStatus, CaptureError>;

/// The camera boundary: fill `frame.raw` (and `frame.format`) with the next frame.
pub trait FrameCapture: Send + 'static {
    fn capture(&mut self, frame: &mut FrameBuffer) -> CaptureResult;
}

impl<F> FrameCapture for F
where
    F: FnMut(&mut FrameBuffer) -> CaptureResult + Send + 'static,
{
    fn capture(&mut self, frame: &mut FrameBuffer) -> CaptureResult {
        self(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureStats {
    pub captured: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct SourceState {
    stop: AtomicBool,
    finished: AtomicBool,
    captured: AtomicU64,
    failures: AtomicU64,
    last_error: Mutex<Option<CaptureError>>,
}

pub struct FrameSource {
    name: String,
    state: Arc<SourceState>,
    handle: Option<JoinHandle<()>>,
    closed: bool,
}

impl FrameSource {
    /// Spawns the capture thread. Frames are pushed to `output` in capture order.
    pub fn start<C: FrameCapture>(
        name: impl Into<String>,
        pool: BufferPool,
        output: Queue<PooledFrame>,
        capture: C,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let state = Arc::new(SourceState::default());
        let thread_state = Arc::clone(&state);
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                capture_loop(&thread_name, &pool, &output, capture, acquire_timeout, &thread_state)
            })
            .map_err(|source| TrackingError::Spawn {
                name: name.clone(),
                source,
            })?;

        info!(source = %name, "frame source started");
        Ok(Self {
            name,
            state,
            handle: Some(handle),
            closed: false,
        })
    }

    /// Asks the capture thread to stop after its current frame.
    pub fn stop(&self) {
        self.state.stop.store(true, Ordering::Release);
    }

    /// True once the collaborator has run out of frames.
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            captured: self.state.captured.load(Ordering::Acquire),
            failures: self.state.failures.load(Ordering::Acquire),
        }
    }

    /// Stops and joins the capture thread.
    ///
    /// Reports the capture failures, if any, on the first call only.
    pub fn close(&mut self) -> Result<CaptureStats> {
        if self.closed {
            return Ok(self.stats());
        }
        self.closed = true;
        self.stop();

        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| TrackingError::ThreadPanicked(self.name.clone()))?;
        }

        let stats = self.stats();
        info!(
            source = %self.name,
            captured = stats.captured,
            failures = stats.failures,
            "frame source closed"
        );

        match self.state.last_error.lock().take() {
            Some(last) if stats.failures > 0 => Err(TrackingError::Capture {
                failures: stats.failures,
                last,
            }),
            _ => Ok(stats),
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(source = %self.name, %error, "frame source closed with errors");
        }
    }
}

fn capture_loop<C: FrameCapture>(
    name: &str,
    pool: &BufferPool,
    output: &Queue<PooledFrame>,
    mut capture: C,
    acquire_timeout: Duration,
    state: &SourceState,
) {
    let mut sequence = 0u64;

    while !state.stop.load(Ordering::Acquire) {
        let Some(mut frame) = pool.acquire_timeout(acquire_timeout) else {
            continue;
        };
        frame.captured_at = Some(Instant::now());
        frame.sequence = sequence;

        match capture.capture(&mut frame) {
            Ok(CaptureStatus::Captured) => {
                sequence += 1;
                state.captured.fetch_add(1, Ordering::AcqRel);
                output.push_frame(frame);
            }
            Ok(CaptureStatus::Exhausted) => {
                state.finished.store(true, Ordering::Release);
                info!(source = name, captured = sequence, "capture exhausted");
                break;
            }
            Err(error) => {
                let failures = state.failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(source = name, sequence, failures, %error, "capture failed");
                *state.last_error.lock() = Some(error);
            }
        }
    }

    debug!(source = name, "capture thread exiting");
}
