//! Server assembly and lifecycle.
//!
//! A [`Server`] owns its connectors, its worker pool settings and exactly one
//! handler adapter. [`Server::start`] realizes them (pool runtime, listeners, TLS
//! contexts, accept loops) and hands back a [`ServerHandle`] for observing and
//! stopping the running server. [`run_server`] wires the whole sequence from
//! [`ServerOptions`].
//!
//! ```text
//! ServerOptions
//!   -> build_connectors + ThreadPool::from_options
//!   -> Server::new (HandlerAdapter attached)
//!   -> configurator(&mut Server)
//!   -> Server::start (runtime, bind, accept loops)
//!   -> ServerHandle::join (if `join`)
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use ringway_http::{Handler, HandlerAdapter};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ServerOptions;
use crate::connector::{BoundConnector, Connector, ConnectorInfo, build_connectors};
use crate::error::{RingwayError, RingwayResult};
use crate::pool::{ThreadPool, ThreadTracker};

/// Extra time allowed for accept loops to finish after their drain timeout.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Observable lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Assembled, not started.
    Configured,
    /// Accepting connections.
    Started,
    /// Teardown in progress.
    Stopping,
    /// Terminal.
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Configured => "configured",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        })
    }
}

/// Resources of a started server.
struct Running {
    runtime: Option<Runtime>,
    shutdown: watch::Sender<bool>,
    accept_loops_done: mpsc::Receiver<()>,
    daemon: bool,
    stop_timeout: Duration,
}

impl Running {
    /// Stop accepting, drain connections, then shut the pool down.
    fn shutdown(mut self) {
        // Accept loops may already be gone.
        let _ = self.shutdown.send(true);

        let deadline = Instant::now() + self.stop_timeout + DRAIN_GRACE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.accept_loops_done.recv_timeout(remaining) {
                Ok(()) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!("accept loops did not finish before stop timeout");
                    break;
                }
            }
        }

        if let Some(runtime) = self.runtime.take() {
            shutdown_pool(runtime, self.daemon, self.stop_timeout);
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            debug!("server dropped while running, shutting down in background");
            runtime.shutdown_background();
        }
    }
}

/// Daemon pools are released in the background; others are drained.
///
/// Draining blocks, so callers inside an async context always release in the
/// background.
fn shutdown_pool(runtime: Runtime, daemon: bool, timeout: Duration) {
    if daemon || tokio::runtime::Handle::try_current().is_ok() {
        runtime.shutdown_background();
    } else {
        runtime.shutdown_timeout(timeout);
    }
}

enum Lifecycle {
    Configured,
    Started(Running),
    Stopping,
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> ServerState {
        match self {
            Self::Configured => ServerState::Configured,
            Self::Started(_) => ServerState::Started,
            Self::Stopping => ServerState::Stopping,
            Self::Stopped => ServerState::Stopped,
        }
    }
}

struct Shared {
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,
    connectors: Mutex<Vec<ConnectorInfo>>,
    pool: Mutex<ThreadPool>,
    tracker: ThreadTracker,
}

impl Shared {
    fn set_stopped(&self) {
        *self.lifecycle.lock() = Lifecycle::Stopped;
        self.changed.notify_all();
    }
}

/// An assembled server.
///
/// Mutable until started; the configurator hook of [`run_server`] receives it by
/// `&mut` to replace the handler, adjust connectors or resize the pool.
pub struct Server {
    connectors: Vec<Connector>,
    pool: ThreadPool,
    adapter: HandlerAdapter,
    stop_timeout: Duration,
    shared: Arc<Shared>,
}

impl Server {
    /// Assemble a server from options, with `handler` attached.
    pub fn new(handler: impl Handler, options: &ServerOptions) -> Self {
        let pool = ThreadPool::from_options(options);
        Self {
            connectors: build_connectors(options),
            adapter: HandlerAdapter::new(handler),
            stop_timeout: options.stop_timeout,
            shared: Arc::new(Shared {
                lifecycle: Mutex::new(Lifecycle::Configured),
                changed: Condvar::new(),
                connectors: Mutex::new(Vec::new()),
                pool: Mutex::new(pool.clone()),
                tracker: ThreadTracker::new(),
            }),
            pool,
        }
    }

    /// Replace the attached handler.
    pub fn set_handler(&mut self, handler: impl Handler) {
        self.adapter = HandlerAdapter::new(handler);
    }

    /// Connectors that will be bound on start.
    #[must_use]
    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    /// Mutable connectors, for adding, removing or adjusting listeners.
    pub fn connectors_mut(&mut self) -> &mut Vec<Connector> {
        &mut self.connectors
    }

    /// Worker pool settings.
    #[must_use]
    pub fn thread_pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Mutable worker pool settings.
    pub fn thread_pool_mut(&mut self) -> &mut ThreadPool {
        &mut self.pool
    }

    /// Bound on graceful draining during stop.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Change the bound on graceful draining during stop.
    pub fn set_stop_timeout(&mut self, timeout: Duration) {
        self.stop_timeout = timeout;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.shared.lifecycle.lock().state()
    }

    /// A handle on this server. Available before start.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Build the pool, bind every connector and start accepting.
    ///
    /// On failure every listener bound so far is released, the pool is shut down,
    /// the server moves to [`ServerState::Stopped`] and the original error is
    /// returned.
    pub fn start(&mut self) -> RingwayResult<ServerHandle> {
        let mut lifecycle = self.shared.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Configured) {
            return Err(RingwayError::InvalidState {
                expected: ServerState::Configured,
                actual: lifecycle.state(),
            });
        }
        *self.shared.pool.lock() = self.pool.clone();

        let runtime = match self.pool.build_runtime(&self.shared.tracker) {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "failed to start server");
                *lifecycle = Lifecycle::Stopped;
                self.shared.changed.notify_all();
                return Err(e);
            }
        };

        let bound = {
            let _guard = runtime.enter();
            self.connectors
                .iter()
                .map(Connector::bind)
                .collect::<RingwayResult<Vec<BoundConnector>>>()
        };
        let bound = match bound {
            Ok(bound) => bound,
            Err(e) => {
                error!(error = %e, "failed to start server, releasing resources");
                shutdown_pool(runtime, self.pool.daemon, self.stop_timeout);
                *lifecycle = Lifecycle::Stopped;
                self.shared.changed.notify_all();
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let infos: Vec<ConnectorInfo> = bound.iter().map(BoundConnector::info).collect();
        for connector in bound {
            let serving = connector.serve(
                self.adapter.clone(),
                shutdown_rx.clone(),
                self.stop_timeout,
            );
            let done = done_tx.clone();
            runtime.spawn(async move {
                serving.await;
                drop(done);
            });
        }
        drop(done_tx);

        info!(
            connectors = infos.len(),
            min_threads = self.pool.min_threads,
            max_threads = self.pool.max_threads,
            daemon = self.pool.daemon,
            "server started"
        );
        *self.shared.connectors.lock() = infos;
        *lifecycle = Lifecycle::Started(Running {
            runtime: Some(runtime),
            shutdown: shutdown_tx,
            accept_loops_done: done_rx,
            daemon: self.pool.daemon,
            stop_timeout: self.stop_timeout,
        });
        self.shared.changed.notify_all();
        drop(lifecycle);

        Ok(self.handle())
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("connectors", &self.connectors)
            .field("pool", &self.pool)
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

/// Cloneable handle on a server.
///
/// Dropping every handle of a started server releases it in the background.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.shared.lifecycle.lock().state()
    }

    /// Whether the server is accepting connections.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state() == ServerState::Started
    }

    /// Whether the server reached its terminal state.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state() == ServerState::Stopped
    }

    /// Block until the server is stopped.
    pub fn join(&self) {
        let mut lifecycle = self.shared.lifecycle.lock();
        while !matches!(*lifecycle, Lifecycle::Stopped) {
            self.shared.changed.wait(&mut lifecycle);
        }
    }

    /// Block until the server is stopped or `timeout` passes. Returns whether it stopped.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut lifecycle = self.shared.lifecycle.lock();
        while !matches!(*lifecycle, Lifecycle::Stopped) {
            if self
                .shared
                .changed
                .wait_until(&mut lifecycle, deadline)
                .timed_out()
            {
                return matches!(*lifecycle, Lifecycle::Stopped);
            }
        }
        true
    }

    /// Stop the server.
    ///
    /// Stops accepting, drains open connections for at most the stop timeout, then
    /// shuts the pool down (in the background for daemon pools). Idempotent;
    /// concurrent callers wait for the same teardown. Must not be called from a
    /// handler of the same server.
    pub fn stop(&self) -> RingwayResult<()> {
        let mut lifecycle = self.shared.lifecycle.lock();
        let running = loop {
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopping) {
                Lifecycle::Started(running) => break running,
                Lifecycle::Stopping => self.shared.changed.wait(&mut lifecycle),
                Lifecycle::Configured | Lifecycle::Stopped => {
                    *lifecycle = Lifecycle::Stopped;
                    self.shared.changed.notify_all();
                    return Ok(());
                }
            }
        };
        self.shared.changed.notify_all();
        drop(lifecycle);

        info!("stopping server");
        // Runtime shutdown blocks, which tokio forbids on async threads.
        let teardown = std::thread::Builder::new()
            .name("ringway-stop".to_owned())
            .spawn(move || running.shutdown());
        let result = match teardown {
            Ok(thread) => thread.join().map_err(|_| {
                RingwayError::Internal(anyhow::anyhow!("server teardown panicked"))
            }),
            Err(e) => Err(RingwayError::Internal(
                anyhow::Error::new(e).context("failed to spawn server teardown thread"),
            )),
        };

        self.shared.set_stopped();
        info!("server stopped");
        result
    }

    /// Addresses of the bound connectors, in connector order.
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.shared
            .connectors
            .lock()
            .iter()
            .map(|c| c.local_addr)
            .collect()
    }

    /// Bound connectors. Empty before start.
    #[must_use]
    pub fn connectors(&self) -> Vec<ConnectorInfo> {
        self.shared.connectors.lock().clone()
    }

    /// Effective pool settings.
    #[must_use]
    pub fn thread_pool(&self) -> ThreadPool {
        self.shared.pool.lock().clone()
    }

    /// Live pool threads.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.shared.tracker.live_threads()
    }

    /// Thread accounting for this server's pool.
    #[must_use]
    pub fn thread_tracker(&self) -> &ThreadTracker {
        &self.shared.tracker
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("state", &self.state())
            .field("local_addrs", &self.local_addrs())
            .finish()
    }
}

/// Build, configure and start a server for `handler`.
///
/// Runs the configurator (if any) after default wiring and before start. Blocks
/// until the server stops when `options.join` is set.
///
/// # Examples
///
/// ```no_run
/// use ringway::{ServerOptions, run_server};
/// use ringway_http::{ResponseMap, handler_fn};
///
/// let handle = run_server(
///     handler_fn(|_req| Ok(Some(ResponseMap::text(200, "hello")))),
///     ServerOptions::builder().port(8080).join(false).build(),
/// )?;
/// handle.stop()?;
/// # Ok::<(), ringway::RingwayError>(())
/// ```
pub fn run_server(
    handler: impl Handler,
    mut options: ServerOptions,
) -> RingwayResult<ServerHandle> {
    let configurator = options.configurator.take();
    let mut server = Server::new(handler, &options);
    if let Some(configure) = configurator {
        debug!("running server configurator");
        configure(&mut server);
    }

    let handle = server.start()?;
    if options.join {
        handle.join();
    }
    Ok(handle)
}
