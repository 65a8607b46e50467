//! Response body type written back to hyper.
//!
//! [`RingBody`] supports three modes:
//!
//! - **Buffered**: text and byte-sequence bodies from a [`ResponseMap`](crate::ResponseMap).
//! - **Streaming**: chunks produced by a blocking reader (stream and file bodies),
//!   delivered over a bounded channel.
//! - **Empty**: no body content (absent body, fallback responses).
//!
//! A body can also carry an [`InFlightGuard`] so that its request stays counted as in
//! flight until the body is finished or dropped.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::Full;
use tokio::sync::mpsc;

use crate::service::InFlightGuard;

/// Response body handed to hyper by the service.
///
/// Implements [`http_body::Body`] so it can be used directly with hyper responses.
#[derive(Debug, Default)]
pub enum RingBody {
    /// Buffered body for text and byte-sequence responses.
    Buffered(Full<Bytes>),
    /// Chunks read on a pool thread from a stream or file.
    Streaming(mpsc::Receiver<io::Result<Bytes>>),
    /// Empty body.
    #[default]
    Empty,
    /// A body whose request stays in flight while the body lives.
    Tracked {
        /// The body being sent.
        body: Box<RingBody>,
        /// Released when the body is dropped.
        guard: InFlightGuard,
    },
}

impl RingBody {
    /// Create a buffered body from bytes.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Buffered(Full::new(data.into()))
    }

    /// Create a buffered body from a UTF-8 string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::Buffered(Full::new(Bytes::from(s.into())))
    }

    /// Create an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Keep `guard` alive for as long as this body.
    #[must_use]
    pub fn tracked(self, guard: InFlightGuard) -> Self {
        Self::Tracked {
            body: Box::new(self),
            guard,
        }
    }
}

impl http_body::Body for RingBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Buffered(full) => Pin::new(full)
                .poll_frame(cx)
                .map_err(|never| match never {}),
            Self::Streaming(rx) => rx
                .poll_recv(cx)
                .map(|chunk| chunk.map(|res| res.map(http_body::Frame::data))),
            Self::Empty => Poll::Ready(None),
            Self::Tracked { body, .. } => Pin::new(body.as_mut()).poll_frame(cx),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Buffered(full) => full.is_end_stream(),
            Self::Streaming(_) => false,
            Self::Empty => true,
            Self::Tracked { body, .. } => body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Self::Buffered(full) => full.size_hint(),
            Self::Streaming(_) => http_body::SizeHint::default(),
            Self::Empty => http_body::SizeHint::with_exact(0),
            Self::Tracked { body, .. } => body.size_hint(),
        }
    }
}
