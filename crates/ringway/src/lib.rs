//! Run a request-map handler on an embedded HTTP/HTTPS server.
//!
//! Ringway is configuration and lifecycle plumbing over hyper, rustls and tokio. It
//! turns declarative [`ServerOptions`] into:
//!
//! - **Connectors** ([`connector`]): a plaintext listener and an optional TLS
//!   listener ([`tls`]), each with a connection idle timeout ([`idle`]).
//!
//! - **A worker pool** ([`pool`]): a per-server tokio runtime sized by
//!   `min_threads` / `max_threads`, with daemon marking and scoped thread accounting.
//!
//! - **A running server** ([`server`]): the handler attached through
//!   [`ringway_http::HandlerAdapter`], the configurator hook, start with full cleanup
//!   on failure, optional join, and graceful stop.
//!
//! # Usage
//!
//! ```rust,no_run
//! use ringway::{ServerOptions, run_server};
//! use ringway_http::{ResponseMap, handler_fn};
//!
//! // Blocks until the server stops, since `join` defaults to true.
//! run_server(
//!     handler_fn(|req| Ok(Some(ResponseMap::text(200, format!("you asked for {}", req.uri))))),
//!     ServerOptions::builder().port(8080).build(),
//! )?;
//! # Ok::<(), ringway::RingwayError>(())
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod idle;
pub mod pool;
pub mod server;
pub mod tls;

pub use config::{ClientAuth, Configurator, KeyMaterial, KeyStore, ServerOptions, TrustStore};
pub use connector::{Connector, ConnectorInfo, build_connectors};
pub use error::{RingwayError, RingwayResult};
pub use pool::{ThreadPool, ThreadTracker, current_thread_daemon};
pub use server::{Server, ServerHandle, ServerState, run_server};
pub use tls::TlsSettings;
