// THEORY:
// A `WorkerPool` is N OS threads sharing one input queue and one processing
// function. Each worker repeats: pop, process, forward. There is no scheduler;
// whichever worker is idle takes the next item, so a slow frame on one thread
// never stalls the others.
//
// Shutdown is a relay. The sentinel is pushed once into the input queue. The
// worker that pops it puts it straight back for its siblings and exits; the last
// worker to exit forwards a single sentinel to the output queue. Because every
// worker only exits after its own in-progress item has been forwarded, the
// downstream stage sees that sentinel after every frame this stage produced.
//
// Key principles:
// 1.  **Nothing is lost**: items move by value. A processor that panics still
//     drops its item, and a pooled buffer returns home on drop.
// 2.  **Handing off**: the processor may route an item somewhere else (a branch
//     queue) by returning `None`. Otherwise the returned item goes to the output
//     queue, or is dropped when there is no output.
// 3.  **Idempotent close**: `close` may be called any number of times, and `Drop`
//     calls it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{Result, TrackingError};
use crate::queue::{Item, Queue};

/// Processing function shared by every worker of a pool.
///
/// Receives the item and the pool's branch queues. Returning `None` means the item
/// was handed elsewhere and nothing is forwarded.
pub type Processor<T> = Arc<dyn Fn(T, &[Queue<T>]) -> Option<T> + Send + Sync>;

// How long `close` waits on a full input queue before re-checking the workers.
const SHUTDOWN_PUSH_RETRY: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct PoolState {
    live: AtomicUsize,
    shutdown_seen: AtomicBool,
}

struct Worker {
    id: usize,
    processed: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

pub struct WorkerPool<T: Send + 'static> {
    name: String,
    processor: Processor<T>,
    input: Queue<T>,
    output: Option<Queue<T>>,
    branches: Arc<[Queue<T>]>,
    state: Arc<PoolState>,
    workers: Vec<Worker>,
    closed: bool,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new<F>(
        name: impl Into<String>,
        workers: usize,
        processor: F,
        input: Queue<T>,
        output: Option<Queue<T>>,
        branches: Vec<Queue<T>>,
    ) -> Result<Self>
    where
        F: Fn(T, &[Queue<T>]) -> Option<T> + Send + Sync + 'static,
    {
        let name = name.into();
        if workers == 0 {
            return Err(TrackingError::Config(format!(
                "worker pool '{name}' needs at least one worker"
            )));
        }

        let mut pool = Self {
            name,
            processor: Arc::new(processor),
            input,
            output,
            branches: branches.into(),
            state: Arc::new(PoolState::default()),
            workers: Vec::with_capacity(workers),
            closed: false,
        };
        pool.add_workers(workers)?;
        info!(pool = %pool.name, workers, "worker pool started");
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> &Queue<T> {
        &self.input
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Items processed by each worker, in spawn order.
    pub fn counts(&self) -> Vec<u64> {
        self.workers
            .iter()
            .map(|worker| worker.processed.load(Ordering::Relaxed))
            .collect()
    }

    /// Items processed by the whole pool.
    pub fn count(&self) -> u64 {
        self.counts().iter().sum()
    }

    /// Spawns `n` more workers on the same queues.
    pub fn add_workers(&mut self, n: usize) -> Result<()> {
        if self.closed || self.state.shutdown_seen.load(Ordering::Acquire) {
            warn!(pool = %self.name, "cannot add workers to a pool that is shutting down");
            return Ok(());
        }

        for _ in 0..n {
            let id = self.workers.len();
            let thread_name = format!("{}-{id}", self.name);
            let processed = Arc::new(AtomicU64::new(0));
            let context = WorkerContext {
                pool: self.name.clone(),
                id,
                processor: Arc::clone(&self.processor),
                input: self.input.clone(),
                output: self.output.clone(),
                branches: Arc::clone(&self.branches),
                state: Arc::clone(&self.state),
                processed: Arc::clone(&processed),
            };

            self.state.live.fetch_add(1, Ordering::AcqRel);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || context.run())
                .map_err(|source| {
                    self.state.live.fetch_sub(1, Ordering::AcqRel);
                    TrackingError::Spawn {
                        name: thread_name,
                        source,
                    }
                })?;

            self.workers.push(Worker {
                id,
                processed,
                handle: Some(handle),
            });
        }
        Ok(())
    }

    /// Sends the shutdown sentinel (unless one already arrived) and joins every worker.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if !self.state.shutdown_seen.load(Ordering::Acquire) {
            let mut sentinel = Item::Shutdown;
            loop {
                match self.input.push_timeout(sentinel, SHUTDOWN_PUSH_RETRY) {
                    Ok(()) => break,
                    Err(returned) => {
                        if self.workers.iter().all(Worker::is_finished) {
                            break;
                        }
                        sentinel = returned;
                    }
                }
            }
        }

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    error!(pool = %self.name, worker = worker.id, "worker thread panicked");
                }
            }
        }

        info!(pool = %self.name, processed = self.count(), "worker pool closed");
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.close();
    }
}

struct WorkerContext<T: Send + 'static> {
    pool: String,
    id: usize,
    processor: Processor<T>,
    input: Queue<T>,
    output: Option<Queue<T>>,
    branches: Arc<[Queue<T>]>,
    state: Arc<PoolState>,
    processed: Arc<AtomicU64>,
}

impl<T: Send + 'static> WorkerContext<T> {
    fn run(self) {
        debug!(pool = %self.pool, worker = self.id, "worker running");

        loop {
            let item = match self.input.pop() {
                Item::Frame(item) => item,
                Item::Shutdown => {
                    self.shut_down();
                    break;
                }
            };

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                (self.processor)(item, &self.branches)
            }));
            self.processed.fetch_add(1, Ordering::Relaxed);

            match result {
                Ok(Some(item)) => {
                    if let Some(output) = &self.output {
                        output.push_frame(item);
                    }
                }
                Ok(None) => {}
                Err(_) => {
                    error!(pool = %self.pool, worker = self.id, "processor panicked, item recycled");
                }
            }
        }

        debug!(pool = %self.pool, worker = self.id, "worker exited");
    }

    fn shut_down(&self) {
        self.state.shutdown_seen.store(true, Ordering::Release);
        let remaining = self.state.live.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining > 0 {
            self.input.push_shutdown();
        } else if let Some(output) = &self.output {
            output.push_shutdown();
        }
    }
}
