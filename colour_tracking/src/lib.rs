// THEORY:
// `colour_tracking` finds one coloured object in a stream of camera frames and
// reports where it is, relative to the image centre, fast enough to steer by.
// Everything a runner needs is re-exported from here.
//
// The crate has two halves:
// 1.  **`core_modules`**: the per-frame analysis. Pure functions of a frame and an
//     HSV range: pixel conversion, masking, region finding, moments, and the
//     `ColourTracker` that strings them together.
// 2.  **The pipeline**: the concurrent machinery that keeps those functions fed.
//     A `BufferPool` of reusable frames, a `FrameSource` thread, `WorkerPool`
//     stages joined by `Queue`s, and the `Pipeline` that shuts them down in order.
//
// `TrackingSession` assembles both halves into the tracking robot's brain.

pub mod buffer_pool;
pub mod config;
pub mod core_modules;
pub mod display;
pub mod error;
pub mod frame_source;
pub mod motion;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod worker_pool;

pub use buffer_pool::{BufferPool, PoolCounts, PooledFrame};
pub use config::{SessionConfig, TrackerSettings, TrackingConfig};
pub use core_modules::colour_tracker::{ColourTracker, Detection, MomentSource, TrackerConfig};
pub use core_modules::frame_buffer::{Contour, FrameBuffer, FrameFormat, Location, Point, Track};
pub use core_modules::hsv_range::{HsvRange, HsvTuning};
pub use display::{DisplaySink, SnapshotSink};
pub use error::{CaptureError, Result, TrackingError};
pub use frame_source::{CaptureResult, CaptureStats, CaptureStatus, FrameCapture, FrameSource};
pub use motion::{AimingController, MotionCommand, MotionController, MotionDriver, TrackHistory, TrackLogger};
pub use pipeline::{Pipeline, ThroughputReport};
pub use queue::{Item, Queue};
pub use session::{SessionReport, TrackingSession};
pub use worker_pool::WorkerPool;
