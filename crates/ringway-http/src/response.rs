//! Response maps and their application to native hyper responses.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::body::RingBody;

/// Size of each chunk read from stream and file bodies.
const STREAM_CHUNK_SIZE: usize = 16 * 1024;

/// Number of chunks buffered between the reader thread and the connection.
const STREAM_BUFFER_CHUNKS: usize = 8;

/// One or more values for a response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValues {
    /// A single header line.
    One(String),
    /// Repeated header lines, written in order.
    Many(Vec<String>),
}

impl HeaderValues {
    /// Iterate over the values.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Self::One(v) => std::slice::from_ref(v),
            Self::Many(vs) => vs,
        };
        values.iter().map(String::as_str)
    }

    fn push(&mut self, value: String) {
        match self {
            Self::One(first) => *self = Self::Many(vec![std::mem::take(first), value]),
            Self::Many(vs) => vs.push(value),
        }
    }
}

impl From<String> for HeaderValues {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<&str> for HeaderValues {
    fn from(value: &str) -> Self {
        Self::One(value.to_owned())
    }
}

impl From<Vec<String>> for HeaderValues {
    fn from(values: Vec<String>) -> Self {
        Self::Many(values)
    }
}

/// Body of a [`ResponseMap`].
#[derive(Default)]
pub enum ResponseBody {
    /// No body.
    #[default]
    Empty,
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// A blocking reader drained on a pool thread.
    Stream(Box<dyn Read + Send>),
    /// A file streamed from disk.
    File(PathBuf),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

impl From<String> for ResponseBody {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ResponseBody {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for ResponseBody {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

/// Transport-agnostic response returned by a [`Handler`](crate::Handler).
///
/// # Examples
///
/// ```
/// use ringway_http::{ResponseBody, ResponseMap};
///
/// let resp = ResponseMap::new(200)
///     .header("Content-Type", "text/plain")
///     .header("Set-Cookie", "a=1")
///     .header("Set-Cookie", "b=2")
///     .body("hello");
/// assert_eq!(resp.headers["set-cookie"].iter().count(), 2);
/// assert!(matches!(resp.body, ResponseBody::Text(_)));
/// ```
#[derive(Debug, Default)]
pub struct ResponseMap {
    /// HTTP status code.
    pub status: u16,
    /// Response headers; names are matched case-insensitively when applied. Entries
    /// whose names differ only in case name one header, and the last entry in map
    /// order replaces the earlier ones.
    pub headers: BTreeMap<String, HeaderValues>,
    /// Response body.
    pub body: ResponseBody,
}

impl ResponseMap {
    /// Create a response with the given status, no headers and no body.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: ResponseBody::Empty,
        }
    }

    /// Create a `text/plain` response.
    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .header("content-type", "text/plain; charset=utf-8")
            .body(body.into())
    }

    /// Add a header value. Repeated names accumulate into [`HeaderValues::Many`].
    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.headers.entry(name.as_ref().to_ascii_lowercase()) {
            Entry::Occupied(mut existing) => existing.get_mut().push(value),
            Entry::Vacant(slot) => {
                slot.insert(HeaderValues::One(value));
            }
        }
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<ResponseBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Apply this response map to a native response.
    ///
    /// Must run on a thread where blocking is allowed: stream and file bodies are
    /// drained by a blocking task spawned on `handle`.
    pub fn into_http(self, handle: &Handle) -> Result<http::Response<RingBody>> {
        let status = http::StatusCode::from_u16(self.status)
            .with_context(|| format!("invalid response status {}", self.status))?;

        let mut headers = http::HeaderMap::new();
        for (name, values) in &self.headers {
            let header_name = http::header::HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid response header name {name:?}"))?;
            let mut values = values.iter().map(|value| {
                http::HeaderValue::from_str(value)
                    .with_context(|| format!("invalid value for response header {name}"))
            });
            if let Some(first) = values.next() {
                headers.insert(header_name.clone(), first?);
            }
            for value in values {
                headers.append(header_name.clone(), value?);
            }
        }

        let body = match self.body {
            ResponseBody::Empty => RingBody::empty(),
            ResponseBody::Text(s) => RingBody::from_string(s),
            ResponseBody::Bytes(b) => RingBody::from_bytes(b),
            ResponseBody::Stream(reader) => stream_reader(reader, handle),
            ResponseBody::File(path) => {
                let file = File::open(&path)
                    .with_context(|| format!("failed to open response file {}", path.display()))?;
                if !headers.contains_key(http::header::CONTENT_LENGTH) {
                    let len = file.metadata()?.len();
                    headers.insert(http::header::CONTENT_LENGTH, http::HeaderValue::from(len));
                }
                stream_reader(Box::new(file), handle)
            }
        };

        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Drain a blocking reader on the pool, forwarding chunks to the connection.
fn stream_reader(mut reader: Box<dyn Read + Send>, handle: &Handle) -> RingBody {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER_CHUNKS);
    handle.spawn_blocking(move || {
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let chunk = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
            let failed = chunk.is_err();
            // The receiver is gone when the client disconnected.
            if tx.blocking_send(chunk).is_err() || failed {
                break;
            }
        }
    });
    RingBody::Streaming(rx)
}
