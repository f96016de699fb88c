// THEORY:
// A `TrackingSession` is the assembled robot brain:
//
//     FrameSource -> capture queue -> tracking pool -> (drop: buffer recycled)
//                                          |
//                                          +-> display queue (depth 1) -> display pool
//
// The tracking stage has no output queue. A frame that is not taken by the
// display branch is simply dropped at the end of the stage, which returns its
// buffer to the pool. The display branch is best effort: tracking never waits on
// it, so a slow display only ever costs display updates, never tracking rate.
//
// Shutdown order matters. The source is stopped first so nothing new enters the
// capture queue; then the pipeline closes its stages front to back, draining
// every frame that was already captured.

use std::sync::Arc;

use tracing::{info, trace, warn};

use crate::buffer_pool::{BufferPool, PooledFrame};
use crate::config::TrackingConfig;
use crate::core_modules::colour_tracker::ColourTracker;
use crate::core_modules::hsv_range::HsvTuning;
use crate::display::DisplaySink;
use crate::error::Result;
use crate::frame_source::{CaptureStats, FrameCapture, FrameSource};
use crate::motion::MotionController;
use crate::pipeline::{Pipeline, ThroughputReport};
use crate::queue::Queue;
use crate::worker_pool::WorkerPool;

/// Builds the tracking stage's processing function.
///
/// Every frame is tracked and its result (or the lost triple) is reported to
/// `motion`. With a display branch, the frame is offered to it without blocking;
/// if the branch is full the frame comes back for recycling.
pub fn tracking_processor(
    tracker: Arc<ColourTracker>,
    motion: Arc<dyn MotionController>,
) -> impl Fn(PooledFrame, &[Queue<PooledFrame>]) -> Option<PooledFrame> + Send + Sync + 'static {
    move |mut frame, branches| {
        tracker.track(&mut frame);
        let track = frame.track_or_lost();
        motion.track_object(track.x, track.y, track.area);

        let Some(display) = branches.first() else {
            return Some(frame);
        };
        match display.try_push_frame(frame) {
            Ok(()) => None,
            Err(frame) => {
                trace!(sequence = frame.sequence, "display busy, update dropped");
                Some(frame)
            }
        }
    }
}

/// Builds the display stage's processing function. Frames are dropped after showing.
pub fn display_processor(
    sink: Arc<dyn DisplaySink>,
) -> impl Fn(PooledFrame, &[Queue<PooledFrame>]) -> Option<PooledFrame> + Send + Sync + 'static {
    move |frame, _| {
        sink.show(&frame);
        None
    }
}

/// Final numbers of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionReport {
    pub capture: CaptureStats,
    pub throughput: ThroughputReport,
    pub displayed: Option<u64>,
}

pub struct TrackingSession {
    source: FrameSource,
    pipeline: Pipeline<PooledFrame>,
    pool: BufferPool,
    tracker: Arc<ColourTracker>,
    tune: bool,
    report: Option<SessionReport>,
}

impl TrackingSession {
    /// Builds every stage and starts capturing.
    ///
    /// `display` overrides the sink the config asks for with `display = true`.
    pub fn start<C: FrameCapture>(
        config: &TrackingConfig,
        capture: C,
        motion: Arc<dyn MotionController>,
        display: Option<Arc<dyn DisplaySink>>,
    ) -> Result<Self> {
        config.validate()?;
        let session = &config.session;
        let workers = session.worker_count();
        let display = display.or_else(|| session.display_sink());

        let tracker = Arc::new(ColourTracker::from_config(
            &config.tracker.resolve(display.is_some())?,
        ));
        let pool = BufferPool::new("frames", session.pool_size())?;
        let capture_queue = Queue::unbounded();

        let mut stages = Vec::with_capacity(2);
        let mut branches = Vec::new();
        let display_stage = match display {
            Some(sink) => {
                let display_queue = Queue::bounded(session.display_queue_depth);
                branches.push(display_queue.clone());
                Some(WorkerPool::new(
                    "display",
                    1,
                    display_processor(sink),
                    display_queue,
                    None,
                    vec![],
                )?)
            }
            None => None,
        };

        stages.push(WorkerPool::new(
            "tracking",
            workers,
            tracking_processor(Arc::clone(&tracker), motion),
            capture_queue.clone(),
            None,
            branches,
        )?);
        stages.extend(display_stage);
        let pipeline = Pipeline::new(stages);

        let source = FrameSource::start(
            "capture",
            pool.clone(),
            capture_queue,
            capture,
            session.acquire_timeout(),
        )?;

        info!(
            workers,
            pool = pool.size(),
            range = %tracker.describe_range(),
            "tracking session started"
        );
        Ok(Self {
            source,
            pipeline,
            pool,
            tracker,
            tune: config.tracker.tune,
            report: None,
        })
    }

    /// Live HSV tuning handle shared with the tracker.
    pub fn tuning(&self) -> &HsvTuning {
        self.tracker.tuning()
    }

    pub fn tracker(&self) -> &ColourTracker {
        &self.tracker
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// True once a finite capture collaborator has run dry.
    pub fn source_finished(&self) -> bool {
        self.source.is_finished()
    }

    /// Frames processed so far by the tracking stage.
    pub fn processed(&self) -> u64 {
        self.pipeline.count()
    }

    /// Stops capture, drains every stage and reports.
    ///
    /// Capture failures are returned as an error on the first call only; the
    /// pipeline is drained regardless. Later calls return the cached report.
    pub fn close(&mut self) -> Result<SessionReport> {
        if let Some(report) = self.report {
            return Ok(report);
        }

        let capture = self.source.close();
        let throughput = self.pipeline.close();
        let displayed = self.pipeline.stages().get(1).map(WorkerPool::count);

        let stats = match &capture {
            Ok(stats) => *stats,
            Err(_) => self.source.stats(),
        };
        let report = SessionReport {
            capture: stats,
            throughput,
            displayed,
        };
        self.report = Some(report);

        info!(
            captured = stats.captured,
            processed = throughput.processed,
            failures = stats.failures,
            available = self.pool.available(),
            "tracking session closed"
        );
        if self.tune {
            info!("{}", self.tracker.describe_range());
        }

        capture.map(|_| report)
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            warn!(%error, "tracking session closed with errors");
        }
    }
}
