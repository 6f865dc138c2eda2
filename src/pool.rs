//! Bounded worker pool with an unordered, timeout-aware result stream.
//!
//! [`WorkerPool::submit`] hands every item to the same function and returns a
//! [`ResultStream`] that yields results in completion order. Each batch gets
//! its own rayon pool of named threads, one job per item, and results come
//! back over a channel so the stream can wait for the *next* result with a
//! caller-supplied timeout.
//!
//! A single item, or a pool configured as synchronous, skips the workers and
//! evaluates in the calling thread, in submission order.

use std::any::Any;
use std::cell::Cell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error};
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

/// Worker thread names start with this prefix.
pub const WORKER_THREAD_PREFIX: &str = "epub-search-worker-";

/// Internal wait used when the caller gives no timeout. Only bounds a single
/// blocking call; the stream simply waits again afterwards.
const DEFAULT_WAIT: Duration = Duration::from_secs(600);

/// Retry delay when the OS refuses to start another thread for now.
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(10);

thread_local! {
    static OUTPUT_DISCARDED: Cell<bool> = const { Cell::new(false) };
}

/// True on worker threads started with
/// [`PoolConfig::discard_worker_output`]. Loggers and panic hooks check this
/// to keep diagnostics from workers off the terminal.
pub fn output_discarded() -> bool {
    OUTPUT_DISCARDED.with(Cell::get)
}

/// Explicit timeout elapsed before any result was ready.
///
/// The stream stays valid; a later call may still return the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out waiting for the next result")]
pub struct RecvTimeout;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on worker threads.
    pub parallelism: usize,
    /// Wait per blocking call when no timeout is given.
    pub default_wait: Duration,
    /// Mark worker threads so their log output and panic messages are dropped.
    pub discard_worker_output: bool,
    /// Evaluate every item in the calling thread, in order.
    pub synchronous: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            parallelism: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            default_wait: DEFAULT_WAIT,
            discard_worker_output: true,
            synchronous: false,
        }
    }
}

impl PoolConfig {
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    pub fn with_discard_worker_output(mut self, discard: bool) -> Self {
        self.discard_worker_output = discard;
        self
    }
}

pub struct WorkerPool {
    config: PoolConfig,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Run `function` once per item.
    ///
    /// Tuples work as items for multi-argument functions. A panic inside
    /// `function` is contained and logged; that item produces no result and
    /// the remaining items still run. Functions that need every item accounted
    /// for should turn failures into values themselves.
    pub fn submit<T, R, F, I>(&self, function: F, items: I) -> io::Result<ResultStream<R>>
    where
        F: Fn(T) -> R + Send + Sync + 'static,
        T: Send + 'static,
        R: Send + 'static,
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();

        if items.is_empty() {
            return Ok(ResultStream::exhausted());
        }

        if self.config.synchronous || items.len() == 1 {
            debug!("evaluating {} item(s) in-process", items.len());
            return Ok(ResultStream::serial(function, items));
        }

        let workers = self.config.parallelism.max(1).min(items.len());
        debug!("starting {workers} workers for {} items", items.len());

        let threads = build_thread_pool(workers, self.config.discard_worker_output)?;
        let function = Arc::new(function);
        let cancelled = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = crossbeam_channel::unbounded();

        for item in items {
            let function = Arc::clone(&function);
            let cancelled = Arc::clone(&cancelled);
            let sender = sender.clone();

            threads.spawn(move || {
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                match panic::catch_unwind(AssertUnwindSafe(|| function(item))) {
                    // Fails only once the stream is gone
                    Ok(result) => {
                        let _ = sender.send(result);
                    }
                    Err(payload) => {
                        error!("work item panicked: {}", panic_message(payload.as_ref()));
                    }
                }
            });
        }

        Ok(ResultStream {
            source: Source::Pool(PoolState {
                receiver,
                cancelled,
                threads,
            }),
            default_wait: self.config.default_wait,
        })
    }
}

/// Build a pool of named worker threads, retrying while the OS reports a
/// transient shortage.
fn build_thread_pool(workers: usize, discard_output: bool) -> io::Result<ThreadPool> {
    loop {
        let transient = Arc::new(AtomicBool::new(false));
        let spawn_failure = Arc::clone(&transient);

        let built = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("{WORKER_THREAD_PREFIX}{index}"))
            .start_handler(move |_| {
                if discard_output {
                    OUTPUT_DISCARDED.with(|flag| flag.set(true));
                }
            })
            .spawn_handler(move |worker| {
                let mut builder = thread::Builder::new();
                if let Some(name) = worker.name() {
                    builder = builder.name(name.to_owned());
                }
                if let Some(size) = worker.stack_size() {
                    builder = builder.stack_size(size);
                }
                match builder.spawn(move || worker.run()) {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        spawn_failure.store(is_transient(&err), Ordering::SeqCst);
                        Err(err)
                    }
                }
            })
            .build();

        match built {
            Ok(pool) => return Ok(pool),
            Err(err) if transient.load(Ordering::SeqCst) => {
                debug!("worker pool failed to start ({err}), retrying");
                thread::sleep(SPAWN_RETRY_DELAY);
            }
            Err(err) => return Err(io::Error::other(err)),
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct PoolState<R> {
    receiver: Receiver<R>,
    cancelled: Arc<AtomicBool>,
    /// Dropping the pool lets its threads exit once their jobs are done; it
    /// never waits for them.
    threads: ThreadPool,
}

enum Source<R> {
    Serial(Box<dyn Iterator<Item = R> + Send>),
    Pool(PoolState<R>),
    Exhausted,
}

/// Results of a submitted batch, in completion order.
///
/// Dropping the stream terminates it.
pub struct ResultStream<R> {
    source: Source<R>,
    default_wait: Duration,
}

impl<R: Send + 'static> ResultStream<R> {
    fn exhausted() -> Self {
        Self {
            source: Source::Exhausted,
            default_wait: DEFAULT_WAIT,
        }
    }

    fn serial<T, F>(function: F, items: Vec<T>) -> Self
    where
        F: Fn(T) -> R + Send + Sync + 'static,
        T: Send + 'static,
    {
        let results = items.into_iter().filter_map(move |item| {
            match panic::catch_unwind(AssertUnwindSafe(|| function(item))) {
                Ok(result) => Some(result),
                Err(payload) => {
                    error!("work item panicked: {}", panic_message(payload.as_ref()));
                    None
                }
            }
        });

        Self {
            source: Source::Serial(Box::new(results)),
            default_wait: DEFAULT_WAIT,
        }
    }
}

impl<R> ResultStream<R> {
    /// Wait for the next result.
    ///
    /// `Ok(None)` means the stream is exhausted (or was terminated). With an
    /// explicit `timeout`, `Err(RecvTimeout)` is returned if nothing became
    /// ready in time and the stream remains usable. Without one the call
    /// blocks until a result is ready or every worker is gone. In-process
    /// streams evaluate the next item synchronously and never time out.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<R>, RecvTimeout> {
        let result = match &mut self.source {
            Source::Exhausted => return Ok(None),
            Source::Serial(results) => results.next(),
            Source::Pool(state) => {
                let wait = timeout.unwrap_or(self.default_wait);
                loop {
                    match state.receiver.recv_timeout(wait) {
                        Ok(result) => break Some(result),
                        Err(RecvTimeoutError::Timeout) if timeout.is_some() => {
                            return Err(RecvTimeout);
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break None,
                    }
                }
            }
        };

        if result.is_none() {
            self.finish();
        }
        Ok(result)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.source, Source::Exhausted)
    }

    /// Stop all workers and mark the stream exhausted.
    ///
    /// Idempotent. Workers finish the item they are running and skip the
    /// rest; they are not waited for, so a stuck item cannot block the
    /// caller. Results already returned stay valid.
    pub fn terminate(&mut self) {
        match std::mem::replace(&mut self.source, Source::Exhausted) {
            Source::Pool(state) => {
                state.cancelled.store(true, Ordering::SeqCst);
                debug!("worker pool terminated");
            }
            Source::Serial(_) | Source::Exhausted => {}
        }
    }

    /// Every job has run: release the pool.
    fn finish(&mut self) {
        if let Source::Pool(state) = std::mem::replace(&mut self.source, Source::Exhausted) {
            drop(state.threads);
            debug!("worker pool exhausted");
        }
    }
}

impl<R> Iterator for ResultStream<R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        // Never times out without an explicit timeout
        self.recv(None).unwrap_or(None)
    }
}

impl<R> Drop for ResultStream<R> {
    fn drop(&mut self) {
        self.terminate();
    }
}
