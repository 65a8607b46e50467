//! Request-map / response-map translation and the hyper service for Ringway.
//!
//! This crate is the HTTP side of Ringway. It handles:
//!
//! - **Requests** ([`request`]): Builds a transport-agnostic [`RequestMap`] from a
//!   native hyper request and the facts of the connection it arrived on.
//!
//! - **Responses** ([`response`]): The [`ResponseMap`] a handler returns, and its
//!   application (status, repeated headers, text/bytes/stream/file bodies) to a
//!   native response.
//!
//! - **Handlers** ([`handler`]): The [`Handler`] trait and the [`HandlerAdapter`]
//!   that invokes it and reports whether the request was handled.
//!
//! - **Service** ([`service`]): [`RingService`], the hyper `Service` bound to one
//!   connection. It runs handlers on blocking pool threads, answers unhandled
//!   requests with `404 Not Found` and failed ones with `500 Internal Server Error`.
//!   [`InFlight`] counts the requests a connection is still working on.
//!
//! - **Body** ([`body`]): The [`RingBody`] type supporting buffered, streaming and
//!   empty response modes.
//!
//! # Architecture
//!
//! ```text
//! HTTP Request
//!   -> RingService (hyper Service)
//!     -> spawn_blocking (pool handler thread)
//!       -> RequestMap::from_request
//!       -> HandlerAdapter::dispatch (Handler trait)
//!       -> ResponseMap::into_http
//!     -> 404 fallback / 500 conversion
//!   <- HTTP Response
//! ```

pub mod body;
pub mod handler;
pub mod request;
pub mod response;
pub mod service;

pub use body::RingBody;
pub use handler::{Dispatch, Handler, HandlerAdapter, handler_fn};
pub use request::{BoxError, ConnectionInfo, RequestBody, RequestMap, Scheme};
pub use response::{HeaderValues, ResponseBody, ResponseMap};
pub use service::{InFlight, InFlightGuard, RingService};
