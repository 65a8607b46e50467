//! Handler trait and the adapter that invokes it for native requests.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::body::RingBody;
use crate::request::RequestMap;
use crate::response::ResponseMap;

/// A transport-agnostic request handler.
///
/// Returning `Ok(None)` leaves the request unhandled; the server answers with its
/// default fallback. Returning `Err` (or panicking) yields a generic 500 response.
///
/// Implemented for any `Fn(RequestMap) -> anyhow::Result<Option<ResponseMap>>`.
///
/// # Examples
///
/// ```
/// use ringway_http::{Handler, RequestMap, ResponseMap};
///
/// fn hello(_req: RequestMap) -> anyhow::Result<Option<ResponseMap>> {
///     Ok(Some(ResponseMap::text(200, "hello")))
/// }
///
/// fn assert_handler<H: Handler>(_: H) {}
/// assert_handler(hello);
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handle one request. Runs on a pool thread where blocking is allowed.
    fn handle(&self, request: RequestMap) -> anyhow::Result<Option<ResponseMap>>;
}

impl<F> Handler for F
where
    F: Fn(RequestMap) -> anyhow::Result<Option<ResponseMap>> + Send + Sync + 'static,
{
    fn handle(&self, request: RequestMap) -> anyhow::Result<Option<ResponseMap>> {
        self(request)
    }
}

/// Pin a closure's signature to the [`Handler`] shape.
///
/// Closures passed straight to an `impl Handler` parameter cannot have their error
/// type inferred; routing them through this function fixes it to [`anyhow::Error`].
///
/// # Examples
///
/// ```
/// use ringway_http::{HandlerAdapter, ResponseMap, handler_fn};
///
/// let adapter = HandlerAdapter::new(handler_fn(|_req| Ok(Some(ResponseMap::new(204)))));
/// # let _ = adapter;
/// ```
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(RequestMap) -> anyhow::Result<Option<ResponseMap>> + Send + Sync + 'static,
{
    f
}

/// Outcome of dispatching one request through the adapter.
#[derive(Debug)]
pub enum Dispatch {
    /// The handler produced a response; the request is handled.
    Handled(http::Response<RingBody>),
    /// The handler declined the request.
    Unhandled,
}

impl Dispatch {
    /// Whether the handler marked the request handled.
    #[must_use]
    pub fn is_handled(&self) -> bool {
        matches!(self, Self::Handled(_))
    }
}

/// Wraps a [`Handler`] into the dispatch shape the service expects.
///
/// Cloning is cheap (Arc-based).
#[derive(Clone)]
pub struct HandlerAdapter {
    handler: Arc<dyn Handler>,
}

impl HandlerAdapter {
    /// Wrap a handler.
    #[must_use]
    pub fn new(handler: impl Handler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Wrap an already shared handler.
    #[must_use]
    pub fn from_shared(handler: Arc<dyn Handler>) -> Self {
        Self { handler }
    }

    /// Invoke the handler and apply its response map.
    ///
    /// Handler errors and unappliable response maps are returned to the caller
    /// untouched.
    pub fn dispatch(&self, request: RequestMap, handle: &Handle) -> anyhow::Result<Dispatch> {
        match self.handler.handle(request)? {
            Some(response) => Ok(Dispatch::Handled(response.into_http(handle)?)),
            None => Ok(Dispatch::Unhandled),
        }
    }
}

impl fmt::Debug for HandlerAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerAdapter").finish_non_exhaustive()
    }
}
