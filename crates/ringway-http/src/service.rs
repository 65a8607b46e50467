//! The per-connection hyper service.
//!
//! [`RingService`] is the engine side of request dispatch. For every request it:
//!
//! 1. Moves onto a pool thread (`spawn_blocking`), since handlers block.
//! 2. Builds the [`RequestMap`] and runs the [`HandlerAdapter`].
//! 3. Answers unhandled requests with the default `404 Not Found` fallback.
//! 4. Converts handler errors and panics into a generic `500 Internal Server Error`.
//!
//! Each request counts as in flight from the moment hyper hands it to the service
//! until its response body is finished or dropped. The connector reads the shared
//! [`InFlight`] counter so that the connection idle timeout never fires while a
//! handler is still working.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use hyper::service::Service;
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::body::RingBody;
use crate::handler::{Dispatch, HandlerAdapter};
use crate::request::{BoxError, ConnectionInfo, RequestMap};

/// Count of requests in flight on one connection.
///
/// Clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    /// A counter with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one request as in flight until the returned guard is dropped.
    #[must_use]
    pub fn enter(&self) -> InFlightGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(Arc::clone(&self.0))
    }

    /// Requests currently in flight.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Whether any request is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.count() > 0
    }
}

/// Keeps one request counted as in flight.
#[derive(Debug)]
pub struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// hyper service bound to one accepted connection.
#[derive(Debug, Clone)]
pub struct RingService {
    adapter: HandlerAdapter,
    conn: Arc<ConnectionInfo>,
    in_flight: InFlight,
}

impl RingService {
    /// Create a service for one connection.
    #[must_use]
    pub fn new(adapter: HandlerAdapter, conn: ConnectionInfo) -> Self {
        Self {
            adapter,
            conn: Arc::new(conn),
            in_flight: InFlight::new(),
        }
    }

    /// Count requests on `in_flight` instead of a private counter.
    #[must_use]
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        self.in_flight = in_flight;
        self
    }

    /// Facts about the connection this service serves.
    #[must_use]
    pub fn connection(&self) -> &ConnectionInfo {
        &self.conn
    }

    /// Requests in flight on this connection.
    #[must_use]
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }
}

impl<B> Service<http::Request<B>> for RingService
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = http::Response<RingBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<B>) -> Self::Future {
        let guard = self.in_flight.enter();
        let adapter = self.adapter.clone();
        let conn = Arc::clone(&self.conn);

        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_owned();
            let handle = Handle::current();

            let outcome = tokio::task::spawn_blocking(move || {
                let request = RequestMap::from_request(req, &conn, handle.clone());
                adapter.dispatch(request, &handle)
            })
            .await;

            let response = match outcome {
                Ok(Ok(Dispatch::Handled(response))) => {
                    debug!(%method, %path, status = %response.status(), "request handled");
                    response
                }
                Ok(Ok(Dispatch::Unhandled)) => {
                    debug!(%method, %path, "request not handled, using fallback");
                    not_found_response()
                }
                Ok(Err(err)) => {
                    error!(%method, %path, error = %format!("{err:#}"), "handler failed");
                    internal_error_response()
                }
                Err(join_err) => {
                    error!(%method, %path, error = %join_err, "handler panicked");
                    internal_error_response()
                }
            };

            Ok(response.map(|body| body.tracked(guard)))
        })
    }
}

/// Default response for requests no handler claimed.
#[must_use]
pub fn not_found_response() -> http::Response<RingBody> {
    http::Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(RingBody::from_string("Not Found"))
        .expect("static not-found response should be valid")
}

/// Generic response for failed handlers.
#[must_use]
pub fn internal_error_response() -> http::Response<RingBody> {
    http::Response::builder()
        .status(http::StatusCode::INTERNAL_SERVER_ERROR)
        .header("Content-Type", "text/plain; charset=utf-8")
        .body(RingBody::from_string("Internal Server Error"))
        .expect("static error response should be valid")
}
