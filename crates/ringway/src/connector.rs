//! Listening connectors and their accept loops.
//!
//! A [`Connector`] is a plain description (host, port, idle timeout and optional
//! TLS settings) until the server starts. Binding turns it into a listener with a
//! ready TLS acceptor; serving runs the accept loop until shutdown is signalled and
//! then drains open connections.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use hyper_util::server::graceful::{GracefulShutdown, Watcher};
use ringway_http::{ConnectionInfo, HandlerAdapter, InFlight, RingService, Scheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ServerOptions;
use crate::error::{RingwayError, RingwayResult};
use crate::idle::IdleTimeout;
use crate::tls::{TlsSettings, build_server_config};

/// A listening endpoint of a server.
#[derive(Debug, Clone)]
pub struct Connector {
    host: String,
    port: u16,
    idle_timeout: Duration,
    tls: Option<TlsSettings>,
}

impl Connector {
    /// A plaintext HTTP connector.
    #[must_use]
    pub fn plain(host: impl Into<String>, port: u16, idle_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            idle_timeout,
            tls: None,
        }
    }

    /// An HTTPS connector. The TLS context is built when the connector binds.
    #[must_use]
    pub fn tls(
        host: impl Into<String>,
        port: u16,
        idle_timeout: Duration,
        settings: TlsSettings,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            idle_timeout,
            tls: Some(settings),
        }
    }

    /// Bind host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Bind port. Zero picks an ephemeral port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connection idle timeout.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Scheme served by this connector.
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        if self.tls.is_some() {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    /// TLS settings, for HTTPS connectors.
    #[must_use]
    pub fn tls_settings(&self) -> Option<&TlsSettings> {
        self.tls.as_ref()
    }

    /// Mutable TLS settings, for HTTPS connectors.
    pub fn tls_settings_mut(&mut self) -> Option<&mut TlsSettings> {
        self.tls.as_mut()
    }

    /// Change the bind host.
    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    /// Change the bind port.
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Change the connection idle timeout.
    pub fn set_idle_timeout(&mut self, idle_timeout: Duration) {
        self.idle_timeout = idle_timeout;
    }

    fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Build the TLS context (if any) and bind the listening socket.
    ///
    /// Must be called within the context of the runtime that will serve it.
    pub(crate) fn bind(&self) -> RingwayResult<BoundConnector> {
        let acceptor = self
            .tls
            .as_ref()
            .map(|settings| build_server_config(settings).map(TlsAcceptor::from))
            .transpose()?;

        let bind_error = |source: io::Error| RingwayError::Bind {
            addr: self.address(),
            source,
        };
        let listener = std::net::TcpListener::bind((self.host.as_str(), self.port))
            .map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let listener = TcpListener::from_std(listener).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let info = ConnectorInfo {
            scheme: self.scheme(),
            local_addr,
            idle_timeout: self.idle_timeout,
        };
        info!(addr = %local_addr, scheme = %info.scheme, "connector listening");

        Ok(BoundConnector {
            listener,
            info,
            acceptor,
        })
    }
}

/// Build the connectors described by the options.
///
/// Always a plaintext connector; a TLS connector on the same host is added when
/// `ssl` or `ssl_port` is set. No I/O happens here.
#[must_use]
pub fn build_connectors(options: &ServerOptions) -> Vec<Connector> {
    let mut connectors = vec![Connector::plain(
        options.host.clone(),
        options.port,
        options.max_idle_time,
    )];
    if options.ssl_enabled() {
        connectors.push(Connector::tls(
            options.host.clone(),
            options.effective_ssl_port(),
            options.max_idle_time,
            TlsSettings::from_options(options),
        ));
    }
    connectors
}

/// A bound connector as reported by a running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorInfo {
    /// Scheme served.
    pub scheme: Scheme,
    /// Address the listener is bound to.
    pub local_addr: SocketAddr,
    /// Connection idle timeout.
    pub idle_timeout: Duration,
}

/// A listening socket ready to serve.
pub(crate) struct BoundConnector {
    listener: TcpListener,
    info: ConnectorInfo,
    acceptor: Option<TlsAcceptor>,
}

impl fmt::Debug for BoundConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundConnector")
            .field("info", &self.info)
            .field("tls", &self.acceptor.is_some())
            .finish_non_exhaustive()
    }
}

impl BoundConnector {
    pub(crate) fn info(&self) -> ConnectorInfo {
        self.info
    }

    /// Accept connections until `shutdown` turns true, then drain open connections
    /// for at most `drain_timeout`.
    pub(crate) async fn serve(
        self,
        adapter: HandlerAdapter,
        mut shutdown: watch::Receiver<bool>,
        drain_timeout: Duration,
    ) {
        let Self {
            listener,
            info,
            acceptor,
        } = self;
        let graceful = GracefulShutdown::new();
        let http = HttpConnBuilder::new(TokioExecutor::new());

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(addr = %info.local_addr, error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    tokio::spawn(handle_connection(
                        stream,
                        peer_addr,
                        info,
                        acceptor.clone(),
                        adapter.clone(),
                        http.clone(),
                        graceful.watcher(),
                    ));
                }

                _ = shutdown.wait_for(|stop| *stop) => {
                    debug!(addr = %info.local_addr, "connector stopped accepting");
                    break;
                }
            }
        }

        drop(listener);
        if tokio::time::timeout(drain_timeout, graceful.shutdown())
            .await
            .is_err()
        {
            warn!(
                addr = %info.local_addr,
                timeout_ms = drain_timeout.as_millis(),
                "connections still open after stop timeout"
            );
        } else {
            debug!(addr = %info.local_addr, "all connections drained");
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    info: ConnectorInfo,
    acceptor: Option<TlsAcceptor>,
    adapter: HandlerAdapter,
    http: HttpConnBuilder<TokioExecutor>,
    watcher: Watcher,
) {
    let in_flight = InFlight::new();
    let stream = IdleTimeout::new(stream, info.idle_timeout).with_in_flight(in_flight.clone());

    let Some(acceptor) = acceptor else {
        let service = RingService::new(
            adapter,
            ConnectionInfo::plain(info.local_addr, peer_addr),
        )
        .with_in_flight(in_flight);
        serve_io(stream, service, &http, watcher, peer_addr).await;
        return;
    };

    let handshake = acceptor.accept(stream);
    let handshake = if info.idle_timeout.is_zero() {
        handshake.await
    } else {
        tokio::time::timeout(info.idle_timeout, handshake)
            .await
            .unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "TLS handshake timed out",
                ))
            })
    };
    let stream = match handshake {
        Ok(stream) => stream,
        Err(e) => {
            debug!(peer_addr = %peer_addr, error = %e, "TLS handshake failed");
            return;
        }
    };

    let peer_certificates = stream.get_ref().1.peer_certificates().map(<[_]>::to_vec);
    let service = RingService::new(
        adapter,
        ConnectionInfo::tls(info.local_addr, peer_addr, peer_certificates),
    )
    .with_in_flight(in_flight);
    serve_io(stream, service, &http, watcher, peer_addr).await;
}

async fn serve_io<I>(
    io: I,
    service: RingService,
    http: &HttpConnBuilder<TokioExecutor>,
    watcher: Watcher,
    peer_addr: SocketAddr,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn = http.serve_connection(TokioIo::new(io), service);
    if let Err(e) = watcher.watch(conn.into_owned()).await {
        if is_timeout(&*e) {
            debug!(peer_addr = %peer_addr, "connection closed after idle timeout");
        } else {
            error!(peer_addr = %peer_addr, error = %e, "connection error");
        }
    }
}

/// Whether an error chain bottoms out in an idle timeout.
fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e
            .downcast_ref::<io::Error>()
            .is_some_and(|io| io.kind() == io::ErrorKind::TimedOut)
        {
            return true;
        }
        current = e.source();
    }
    false
}
