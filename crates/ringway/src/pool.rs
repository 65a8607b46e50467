//! Worker pool settings and their realization as a tokio runtime.
//!
//! Each server owns one multi-threaded runtime:
//!
//! - `min_threads` persistent worker threads drive accept loops and connection I/O.
//! - Up to `max_threads` blocking threads run handler callbacks; idle ones exit
//!   after `idle_timeout`.
//!
//! Every pool thread records the pool's daemon flag in a thread-local, readable with
//! [`current_thread_daemon`]. A [`ThreadTracker`] counts the pool's live threads.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;

use crate::config::{
    DEFAULT_MAX_THREADS, DEFAULT_MIN_THREADS, DEFAULT_THREAD_IDLE_TIMEOUT, ServerOptions,
};
use crate::error::{RingwayError, RingwayResult};

/// Name given to every pool thread.
pub const WORKER_THREAD_NAME: &str = "ringway-worker";

thread_local! {
    static DAEMON: Cell<Option<bool>> = const { Cell::new(None) };
}

/// Daemon flag of the pool owning the current thread, or `None` off-pool.
#[must_use]
pub fn current_thread_daemon() -> Option<bool> {
    DAEMON.with(Cell::get)
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPool {
    /// Upper bound on threads running handlers.
    pub max_threads: usize,
    /// Persistent worker threads.
    pub min_threads: usize,
    /// Whether pool threads are daemon threads.
    pub daemon: bool,
    /// Keep-alive for idle handler threads.
    pub idle_timeout: Duration,
    /// Thread name.
    pub name: String,
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            min_threads: DEFAULT_MIN_THREADS,
            daemon: false,
            idle_timeout: DEFAULT_THREAD_IDLE_TIMEOUT,
            name: WORKER_THREAD_NAME.to_owned(),
        }
    }
}

impl ThreadPool {
    /// Pool settings from server options.
    #[must_use]
    pub fn from_options(options: &ServerOptions) -> Self {
        Self {
            max_threads: options.max_threads,
            min_threads: options.min_threads,
            daemon: options.daemon,
            idle_timeout: options.thread_idle_timeout,
            name: WORKER_THREAD_NAME.to_owned(),
        }
    }

    /// Build the runtime backing this pool, reporting thread lifetimes to `tracker`.
    pub(crate) fn build_runtime(&self, tracker: &ThreadTracker) -> RingwayResult<Runtime> {
        let daemon = self.daemon;
        let on_start = tracker.clone();
        let on_stop = tracker.clone();

        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.min_threads.max(1))
            .max_blocking_threads(self.max_threads.max(1))
            .thread_keep_alive(self.idle_timeout)
            .thread_name(self.name.clone())
            .on_thread_start(move || {
                DAEMON.with(|flag| flag.set(Some(daemon)));
                on_start.thread_started();
            })
            .on_thread_stop(move || {
                DAEMON.with(|flag| flag.set(None));
                on_stop.thread_stopped();
            })
            .enable_all()
            .build()
            .map_err(RingwayError::Pool)
    }
}

#[derive(Debug, Default)]
struct TrackerCounts {
    live: AtomicUsize,
    spawned: AtomicUsize,
}

/// Counts the threads of one pool. Cloning shares the counters.
#[derive(Debug, Clone, Default)]
pub struct ThreadTracker {
    counts: Arc<TrackerCounts>,
}

impl ThreadTracker {
    /// Create a tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Threads currently alive.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.counts.live.load(Ordering::Acquire)
    }

    /// Threads started over the tracker's lifetime.
    #[must_use]
    pub fn spawned_threads(&self) -> usize {
        self.counts.spawned.load(Ordering::Acquire)
    }

    /// Wait until no tracked thread is alive. Returns `false` on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.live_threads() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }

    fn thread_started(&self) {
        self.counts.spawned.fetch_add(1, Ordering::AcqRel);
        self.counts.live.fetch_add(1, Ordering::AcqRel);
    }

    fn thread_stopped(&self) {
        self.counts.live.fetch_sub(1, Ordering::AcqRel);
    }
}
