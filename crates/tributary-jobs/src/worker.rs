//! Rate-limited, bounded-concurrency job worker.
//!
//! One poll loop per worker asks the limiter how many jobs to fetch, fetches
//! them from the durable cursor, and hands each to its own task without
//! waiting for it. Every task acknowledges its job on success and
//! terminates it on failure or panic.
//!
//! ```text
//!   Idle --setup()--> Ready --start()--> Running --stop()--> Stopping --> Stopped
//! ```

use crate::config::WorkerOptions;
use crate::error::{JobError, JobResult};
use crate::job::Delivery;
use crate::log::{CursorConfig, JobHandle, JobSource, LogConfig, LogService, DEFAULT_DEDUPLICATE_WINDOW};
use crate::metrics::WorkerMetrics;
use crate::subject;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use tributary_resilience::RateLimiter;

/// User-supplied job processor.
pub type JobProcessor = Arc<dyn Fn(Delivery) -> BoxFuture<'static, JobResult<()>> + Send + Sync>;

/// Boxes an async closure into a [`JobProcessor`].
///
/// ```rust,ignore
/// let processor = tributary_jobs::processor(|delivery| async move {
///     let email: SendEmail = delivery.json()?;
///     send(email).await
/// });
/// ```
pub fn processor<F, Fut>(f: F) -> JobProcessor
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult<()>> + Send + 'static,
{
    Arc::new(move |delivery| f(delivery).boxed())
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Constructed, not set up.
    Idle,
    /// Log and cursor registered.
    Ready,
    /// Poll loop running.
    Running,
    /// `stop()` in progress.
    Stopping,
    /// Loop finished and all jobs drained.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Ready => "ready",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Worker statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Worker (log and cursor) name.
    pub name: String,

    /// Lifecycle state.
    pub state: WorkerState,

    /// Configured concurrency target.
    pub concurrency: usize,

    /// Jobs currently being processed.
    pub in_flight: usize,

    /// Jobs acknowledged.
    pub acknowledged: u64,

    /// Jobs terminated.
    pub terminated: u64,

    /// Fetches that failed and were treated as empty.
    pub fetch_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    acknowledged: AtomicU64,
    terminated: AtomicU64,
    fetch_errors: AtomicU64,
}

/// Holds one in-flight slot for the lifetime of a processing task.
struct InFlightGuard {
    counters: Arc<Counters>,
    queue: Arc<str>,
}

impl InFlightGuard {
    fn acquire(counters: &Arc<Counters>, queue: &Arc<str>) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        WorkerMetrics::update_in_flight(queue, now);
        Self {
            counters: Arc::clone(counters),
            queue: Arc::clone(queue),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let now = self.counters.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        WorkerMetrics::update_in_flight(&self.queue, now);
    }
}

/// Everything the poll loop and its job tasks share.
struct PollContext {
    queue: Arc<str>,
    source: Arc<dyn JobSource>,
    processor: JobProcessor,
    concurrency: usize,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl PollContext {
    async fn run(self, mut limiter: Box<dyn RateLimiter>, mut shutdown_rx: broadcast::Receiver<()>) {
        while self.running.load(Ordering::SeqCst) {
            let in_flight = self.counters.in_flight.load(Ordering::SeqCst);
            let budget = self.concurrency.saturating_sub(in_flight);
            let permitted = limiter.get(budget);

            if permitted > 0 {
                match self.source.fetch(permitted).await {
                    Ok(batch) => {
                        if !batch.is_empty() {
                            debug!(queue = %self.queue, count = batch.len(), permitted, "Fetched jobs");
                            WorkerMetrics::jobs_fetched(&self.queue, batch.len());
                        }
                        for handle in batch {
                            limiter.inc();
                            self.dispatch(handle);
                        }
                    }
                    Err(e) => {
                        self.counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                        WorkerMetrics::fetch_failed(&self.queue);
                        warn!(queue = %self.queue, error = %e, "Fetch failed, treating as empty batch");
                    }
                }
            }

            let wait = limiter.timeout();
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = shutdown_rx.recv() => {
                    debug!(queue = %self.queue, "Poll loop woken by shutdown");
                    break;
                }
            }
        }
    }

    fn dispatch(&self, handle: Box<dyn JobHandle>) {
        let guard = InFlightGuard::acquire(&self.counters, &self.queue);
        let meta = &handle.delivery().meta;
        let span = tracing::info_span!(
            "job",
            queue = %self.queue,
            subject = %handle.delivery().subject,
            sequence = meta.sequence,
            delivery_count = meta.delivery_count,
        );

        let processor = Arc::clone(&self.processor);
        let counters = Arc::clone(&self.counters);
        let queue = Arc::clone(&self.queue);

        tokio::spawn(
            async move {
                process(handle, processor, &counters, &queue).await;
                drop(guard);
            }
            .instrument(span),
        );
    }
}

/// Runs the processor for one job and finalizes the job exactly once.
async fn process(handle: Box<dyn JobHandle>, processor: JobProcessor, counters: &Counters, queue: &str) {
    let delivery = handle.delivery().clone();
    let started = Instant::now();
    debug!("Processing job");

    let outcome = AssertUnwindSafe(async move { processor(delivery).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic.as_ref()))));

    match outcome {
        Ok(()) => match handle.acknowledge().await {
            Ok(()) => {
                counters.acknowledged.fetch_add(1, Ordering::Relaxed);
                WorkerMetrics::job_acknowledged(queue, started.elapsed());
                debug!(duration_ms = started.elapsed().as_millis() as u64, "Job acknowledged");
            }
            Err(e) => error!(error = %e, "Failed to acknowledge job"),
        },
        Err(err) => {
            let reason = if matches!(err, JobError::Panicked(_)) {
                "panicked"
            } else {
                "failed"
            };
            warn!(error = %err, reason, "Job failed, terminating");
            match handle.terminate().await {
                Ok(()) => {
                    counters.terminated.fetch_add(1, Ordering::Relaxed);
                    WorkerMetrics::job_terminated(queue, reason, started.elapsed());
                }
                Err(e) => error!(error = %e, "Failed to terminate job"),
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Pulls jobs from a durable cursor and processes them concurrently.
pub struct Worker {
    log: Arc<dyn LogService>,
    options: WorkerOptions,
    processor: JobProcessor,
    state: RwLock<WorkerState>,
    source: Mutex<Option<Arc<dyn JobSource>>>,
    limiter: Mutex<Option<Box<dyn RateLimiter>>>,
    poll_loop: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Worker {
    /// Creates a worker consuming the log and cursor named in `options`.
    pub fn new(log: Arc<dyn LogService>, options: WorkerOptions, processor: JobProcessor) -> Self {
        let limiter = options.limiter();
        Self::with_limiter(log, options, processor, limiter)
    }

    /// Creates a worker paced by a custom limiter instead of the one the
    /// options describe.
    pub fn with_limiter(
        log: Arc<dyn LogService>,
        options: WorkerOptions,
        processor: JobProcessor,
        limiter: Box<dyn RateLimiter>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            log,
            options,
            processor,
            state: RwLock::new(WorkerState::Idle),
            source: Mutex::new(None),
            limiter: Mutex::new(Some(limiter)),
            poll_loop: Mutex::new(None),
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Worker name.
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Registers the log `<name>` bound to `<name>.*` and the durable cursor
    /// `<name>`, then opens the cursor.
    ///
    /// An existing log is left as it is, so a producer's deduplication
    /// window is never overwritten. Any other failure is returned.
    pub async fn setup(&self) -> JobResult<()> {
        let state = self.state();
        if !matches!(state, WorkerState::Idle | WorkerState::Ready) {
            return Err(JobError::InvalidState {
                expected: WorkerState::Idle.to_string(),
                actual: state.to_string(),
            });
        }

        let name = &self.options.name;
        subject::validate_name(name)?;
        let wildcard = subject::wildcard_subject(name);

        let log_config = LogConfig::new(name.clone(), wildcard.clone(), DEFAULT_DEDUPLICATE_WINDOW);
        match self.log.create_log(&log_config).await {
            Ok(()) => debug!(log = %name, "Log created"),
            Err(e) if e.is_already_exists() => debug!(log = %name, "Log already exists"),
            Err(e) => return Err(e),
        }

        self.log
            .ensure_cursor(&CursorConfig {
                log: name.clone(),
                name: name.clone(),
                filter_subject: wildcard,
            })
            .await?;

        let source = self.log.open_cursor(name, name, &self.options.consumer).await?;
        *self.source.lock() = Some(Arc::from(source));

        let mut state = self.state.write();
        if *state == WorkerState::Idle {
            *state = WorkerState::Ready;
        }
        info!(worker = %name, consumer = %self.options.consumer, "Worker set up");
        Ok(())
    }

    /// Starts the poll loop.
    ///
    /// Calling `start()` on a running worker does nothing. A stopped worker
    /// cannot be restarted; build a new one.
    pub fn start(&self) -> JobResult<()> {
        let mut state = self.state.write();
        match *state {
            WorkerState::Idle => return Err(JobError::NotSetUp),
            WorkerState::Running => return Ok(()),
            WorkerState::Stopping | WorkerState::Stopped => {
                return Err(JobError::InvalidState {
                    expected: WorkerState::Ready.to_string(),
                    actual: state.to_string(),
                })
            }
            WorkerState::Ready => {}
        }

        let source = self.source.lock().clone().ok_or(JobError::NotSetUp)?;
        let limiter = self
            .limiter
            .lock()
            .take()
            .ok_or_else(|| JobError::Internal("rate limiter already taken".to_string()))?;

        let context = PollContext {
            queue: Arc::from(self.options.name.as_str()),
            source,
            processor: Arc::clone(&self.processor),
            concurrency: self.options.concurrency.max(1),
            running: Arc::clone(&self.running),
            counters: Arc::clone(&self.counters),
        };

        let shutdown_rx = self.shutdown_tx.subscribe();
        self.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(
            context
                .run(limiter, shutdown_rx)
                .instrument(tracing::info_span!("worker", name = %self.options.name)),
        );
        *self.poll_loop.lock() = Some(handle);
        *state = WorkerState::Running;

        info!(
            worker = %self.options.name,
            concurrency = self.options.concurrency,
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            rate_limited = self.options.rate_limit.is_some(),
            "Worker started"
        );
        Ok(())
    }

    /// Stops polling and waits until every dispatched job has finished.
    ///
    /// Returns immediately if the worker was never started.
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            if previous == WorkerState::Running {
                *state = WorkerState::Stopping;
            }
            previous
        };

        match previous {
            WorkerState::Running => {}
            WorkerState::Stopping => {
                // Another caller is draining; wait for it to finish.
                while self.state() != WorkerState::Stopped {
                    tokio::time::sleep(self.options.poll_interval).await;
                }
                return;
            }
            WorkerState::Idle | WorkerState::Ready | WorkerState::Stopped => return,
        }

        info!(worker = %self.options.name, "Stopping worker...");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let poll_loop = self.poll_loop.lock().take();
        if let Some(handle) = poll_loop {
            if let Err(e) = handle.await {
                error!(worker = %self.options.name, error = %e, "Poll loop ended abnormally");
            }
        }

        while self.in_flight() > 0 {
            tokio::time::sleep(self.options.poll_interval).await;
        }

        *self.state.write() = WorkerState::Stopped;
        info!(
            worker = %self.options.name,
            acknowledged = self.counters.acknowledged.load(Ordering::Relaxed),
            terminated = self.counters.terminated.load(Ordering::Relaxed),
            "Worker stopped"
        );
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// Whether the poll loop is meant to keep running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs currently being processed.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Snapshot of the worker counters.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            name: self.options.name.clone(),
            state: self.state(),
            concurrency: self.options.concurrency,
            in_flight: self.in_flight(),
            acknowledged: self.counters.acknowledged.load(Ordering::Relaxed),
            terminated: self.counters.terminated.load(Ordering::Relaxed),
            fetch_errors: self.counters.fetch_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("options", &self.options)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
