//! Connection idle timeout.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;
use ringway_http::InFlight;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

pin_project! {
    /// Stream wrapper that fails I/O once the connection has been idle too long.
    ///
    /// Any completed read or write pushes the deadline forward. A read or write still
    /// pending when the deadline passes fails with [`io::ErrorKind::TimedOut`], which
    /// makes hyper close the connection. A zero timeout disables the wrapper.
    ///
    /// While the attached [`InFlight`] counter is busy, pending reads keep the
    /// connection alive: hyper watches the socket for EOF while a handler runs, and
    /// that wait is not idleness.
    #[derive(Debug)]
    pub struct IdleTimeout<S> {
        #[pin]
        inner: S,
        timeout: Duration,
        deadline: Option<Pin<Box<Sleep>>>,
        in_flight: Option<InFlight>,
    }
}

impl<S> IdleTimeout<S> {
    /// Wrap a stream. Must be called within a tokio runtime when `timeout` is non-zero.
    pub fn new(inner: S, timeout: Duration) -> Self {
        let deadline = (!timeout.is_zero()).then(|| Box::pin(tokio::time::sleep(timeout)));
        Self {
            inner,
            timeout,
            deadline,
            in_flight: None,
        }
    }

    /// Suspend the read deadline while `in_flight` has requests in progress.
    #[must_use]
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        self.in_flight = Some(in_flight);
        self
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Unwrap the stream.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn touch(deadline: &mut Option<Pin<Box<Sleep>>>, timeout: Duration) {
    if let Some(sleep) = deadline {
        sleep.as_mut().reset(Instant::now() + timeout);
    }
}

fn poll_expired<T>(
    deadline: &mut Option<Pin<Box<Sleep>>>,
    cx: &mut Context<'_>,
) -> Poll<io::Result<T>> {
    if let Some(sleep) = deadline {
        if sleep.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection idle timeout expired",
            )));
        }
    }
    Poll::Pending
}

/// Like [`poll_expired`], but a busy connection pushes the deadline forward instead.
///
/// The timer stays registered, so a connection that goes quiet after its last request
/// is woken and rechecked within one timeout.
fn poll_read_expired<T>(
    deadline: &mut Option<Pin<Box<Sleep>>>,
    timeout: Duration,
    in_flight: Option<&InFlight>,
    cx: &mut Context<'_>,
) -> Poll<io::Result<T>> {
    if in_flight.is_some_and(InFlight::is_busy) {
        touch(deadline, timeout);
    }
    poll_expired(deadline, cx)
}

impl<S: AsyncRead> AsyncRead for IdleTimeout<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(result) => {
                touch(this.deadline, *this.timeout);
                Poll::Ready(result)
            }
            Poll::Pending => {
                poll_read_expired(this.deadline, *this.timeout, this.in_flight.as_ref(), cx)
            }
        }
    }
}

impl<S: AsyncWrite> AsyncWrite for IdleTimeout<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        match this.inner.poll_write(cx, buf) {
            Poll::Ready(result) => {
                touch(this.deadline, *this.timeout);
                Poll::Ready(result)
            }
            Poll::Pending => poll_expired(this.deadline, cx),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        match this.inner.poll_write_vectored(cx, bufs) {
            Poll::Ready(result) => {
                touch(this.deadline, *this.timeout);
                Poll::Ready(result)
            }
            Poll::Pending => poll_expired(this.deadline, cx),
        }
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        match this.inner.poll_flush(cx) {
            Poll::Ready(result) => Poll::Ready(result),
            Poll::Pending => poll_expired(this.deadline, cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
