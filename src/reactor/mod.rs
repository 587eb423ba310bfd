//! Single-threaded event loop.
//!
//! # Data Flow
//! ```text
//! Socket readiness / timer expiry
//!     → tokio current_thread runtime (spawned tasks)
//!
//! ReactorHandle::post(job)          (any thread, signal capture path)
//!     → job queue (FIFO)
//!     → Reactor::run executes job on the loop thread
//! ```
//!
//! # Design Decisions
//! - One `current_thread` runtime: every connection, timer and posted job
//!   runs on the thread that calls [`Reactor::run`]
//! - Tasks only make progress while `run`, `run_for` or `poll` is active
//! - The signal sequence counter lives here and is shared by handle, so every
//!   `SignalQueue` bound to this reactor draws from the same sequence

pub mod timer;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

pub use timer::{IntervalTimer, TimerError, TimerMode};

/// Work item executed on the loop thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Error type for reactor operations.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// The runtime could not be created.
    #[error("failed to build reactor runtime: {0}")]
    Build(#[source] std::io::Error),

    /// The reactor owning this handle has been dropped.
    #[error("reactor is no longer running")]
    Closed,
}

/// Process-wide monotonically increasing sequence shared by all handles.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    /// Allocate the next value. The first value handed out is 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Last value handed out, or 0 if none.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Single-threaded event loop driving all I/O, timers and posted jobs.
pub struct Reactor {
    runtime: Runtime,
    jobs: mpsc::UnboundedReceiver<Job>,
    handle: ReactorHandle,
}

impl Reactor {
    /// Create a new reactor with I/O, time and signal drivers enabled.
    pub fn new() -> Result<Self, ReactorError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ReactorError::Build)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let handle = ReactorHandle {
            jobs: tx,
            stop: Arc::new(Notify::new()),
            runtime: runtime.handle().clone(),
            sequence: SequenceCounter::default(),
        };

        Ok(Self {
            runtime,
            jobs: rx,
            handle,
        })
    }

    /// Get a cloneable handle to this reactor.
    pub fn handle(&self) -> &ReactorHandle {
        &self.handle
    }

    /// Run until [`ReactorHandle::stop`] is called.
    ///
    /// A stop requested while the reactor was not running makes the next
    /// call return as soon as it starts.
    pub fn run(&mut self) {
        let Self {
            runtime,
            jobs,
            handle,
        } = self;
        runtime.block_on(drain(jobs, &handle.stop));
    }

    /// Run until stopped or until `limit` has elapsed, whichever comes first.
    ///
    /// Returns `true` if the reactor was stopped explicitly.
    pub fn run_for(&mut self, limit: Duration) -> bool {
        let Self {
            runtime,
            jobs,
            handle,
        } = self;
        runtime.block_on(async {
            tokio::time::timeout(limit, drain(jobs, &handle.stop))
                .await
                .is_ok()
        })
    }

    /// Execute the jobs that are already queued and give spawned tasks one
    /// chance to make progress, without waiting for new events.
    pub fn poll(&mut self) -> usize {
        let Self { runtime, jobs, .. } = self;
        runtime.block_on(async {
            let mut executed = 0;
            while let Ok(job) = jobs.try_recv() {
                job();
                executed += 1;
            }
            tokio::task::yield_now().await;
            executed
        })
    }

    /// Enter the runtime context so tokio resources can be created from
    /// outside of `run`.
    pub fn enter(&self) -> tokio::runtime::EnterGuard<'_> {
        self.runtime.enter()
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("sequence", &self.handle.sequence)
            .finish_non_exhaustive()
    }
}

async fn drain(jobs: &mut mpsc::UnboundedReceiver<Job>, stop: &Notify) {
    loop {
        tokio::select! {
            biased;
            _ = stop.notified() => break,
            job = jobs.recv() => match job {
                Some(job) => job(),
                None => break,
            },
        }
    }
}

/// Cloneable, thread-safe handle to a [`Reactor`].
#[derive(Clone)]
pub struct ReactorHandle {
    jobs: mpsc::UnboundedSender<Job>,
    stop: Arc<Notify>,
    runtime: Handle,
    sequence: SequenceCounter,
}

impl ReactorHandle {
    /// Schedule `job` to run on the loop thread after previously posted jobs.
    pub fn post<F>(&self, job: F) -> Result<(), ReactorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.jobs
            .send(Box::new(job))
            .map_err(|_| ReactorError::Closed)
    }

    /// Make the running (or next) [`Reactor::run`] return.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Spawn a task on the reactor's runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// The runtime handle backing this reactor.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// The process-wide signal sequence counter owned by this reactor.
    pub fn sequence(&self) -> &SequenceCounter {
        &self.sequence
    }

    /// Whether the owning reactor has been dropped.
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

impl std::fmt::Debug for ReactorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorHandle")
            .field("closed", &self.is_closed())
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn posted_jobs_run_in_order() {
        let mut reactor = Reactor::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            reactor.handle().post(move || seen.lock().unwrap().push(i)).unwrap();
        }
        let handle = reactor.handle().clone();
        reactor.handle().post(move || handle.stop()).unwrap();

        assert!(reactor.run_for(Duration::from_secs(1)));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn run_for_returns_after_limit() {
        let mut reactor = Reactor::new().unwrap();
        assert!(!reactor.run_for(Duration::from_millis(20)));
    }

    #[test]
    fn stop_leaves_later_jobs_queued() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.handle().clone();
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();

        reactor.handle().post(move || handle.stop()).unwrap();
        reactor.handle().post(move || *flag.lock().unwrap() = true).unwrap();

        reactor.run();
        assert!(!*ran.lock().unwrap());

        assert_eq!(reactor.poll(), 1);
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn handle_reports_closed_reactor() {
        let reactor = Reactor::new().unwrap();
        let handle = reactor.handle().clone();
        assert!(!handle.is_closed());

        drop(reactor);
        assert!(handle.is_closed());
        assert!(matches!(handle.post(|| {}), Err(ReactorError::Closed)));
    }

    #[test]
    fn sequence_is_shared_between_handles() {
        let reactor = Reactor::new().unwrap();
        let a = reactor.handle().clone();
        let b = reactor.handle().clone();

        assert_eq!(a.sequence().next(), 1);
        assert_eq!(b.sequence().next(), 2);
        assert_eq!(a.sequence().current(), 2);
    }
}
