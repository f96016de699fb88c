// THEORY:
// The `Pipeline` is the workflow manager: an ordered list of worker-pool stages
// and nothing else. It does no work of its own. Its job is lifecycle: closing the
// stages front to back, so each stage has drained everything the previous one
// produced before it is asked to stop, and producing one throughput report for
// the whole run.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::info;

use crate::worker_pool::WorkerPool;

/// Items processed by the first stage over the pipeline's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    pub processed: u64,
    pub elapsed: Duration,
}

impl ThroughputReport {
    pub fn fps(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.processed as f64 / seconds
        } else {
            0.0
        }
    }
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {} items in {:.2} seconds at {:.2} fps",
            self.processed,
            self.elapsed.as_secs_f64(),
            self.fps()
        )
    }
}

pub struct Pipeline<T: Send + 'static> {
    stages: Vec<WorkerPool<T>>,
    started: Instant,
    report: Option<ThroughputReport>,
}

impl<T: Send + 'static> Pipeline<T> {
    pub fn new(stages: Vec<WorkerPool<T>>) -> Self {
        info!(stages = stages.len(), "pipeline started");
        Self {
            stages,
            started: Instant::now(),
            report: None,
        }
    }

    pub fn stages(&self) -> &[WorkerPool<T>] {
        &self.stages
    }

    /// Items processed so far by the first stage.
    pub fn count(&self) -> u64 {
        self.stages.first().map_or(0, WorkerPool::count)
    }

    pub fn is_closed(&self) -> bool {
        self.report.is_some()
    }

    /// Closes every stage in order and returns the throughput report.
    ///
    /// Later calls return the report from the first one.
    pub fn close(&mut self) -> ThroughputReport {
        if let Some(report) = self.report {
            return report;
        }

        for stage in &mut self.stages {
            stage.close();
        }

        let report = ThroughputReport {
            processed: self.count(),
            elapsed: self.started.elapsed(),
        };
        info!(
            processed = report.processed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "{report}"
        );
        self.report = Some(report);
        report
    }
}

impl<T: Send + 'static> Drop for Pipeline<T> {
    fn drop(&mut self) {
        self.close();
    }
}
