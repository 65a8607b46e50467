//! Request-map construction from native hyper requests.
//!
//! A [`RequestMap`] is the transport-agnostic view of one inbound request handed to
//! the user's handler. The body is exposed as a blocking [`std::io::Read`] stream
//! ([`RequestBody`]) that pulls frames from the native body on demand, so the handler
//! must run on a thread where blocking is allowed (the pool's handler threads).

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use rustls_pki_types::CertificateDer;
use tokio::runtime::Handle;

/// Boxed error type accepted from native request bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// URI scheme a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plaintext HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// Lowercase scheme name (`http` / `https`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Well-known port for the scheme.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection facts needed to build a request map.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Scheme of the connector that accepted the connection.
    pub scheme: Scheme,
    /// Local address the connection was accepted on.
    pub local_addr: SocketAddr,
    /// Peer address.
    pub remote_addr: SocketAddr,
    /// Client certificate chain presented during the TLS handshake, if any.
    pub peer_certificates: Option<Arc<Vec<CertificateDer<'static>>>>,
}

impl ConnectionInfo {
    /// Connection accepted on a plaintext connector.
    #[must_use]
    pub fn plain(local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            scheme: Scheme::Http,
            local_addr,
            remote_addr,
            peer_certificates: None,
        }
    }

    /// Connection accepted on a TLS connector.
    #[must_use]
    pub fn tls(
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        peer_certificates: Option<Vec<CertificateDer<'static>>>,
    ) -> Self {
        Self {
            scheme: Scheme::Https,
            local_addr,
            remote_addr,
            peer_certificates: peer_certificates
                .filter(|chain| !chain.is_empty())
                .map(Arc::new),
        }
    }
}

/// Readable request body.
///
/// Reads block the calling thread on the owning runtime until the next frame of the
/// native body arrives. Trailers are skipped.
pub struct RequestBody {
    source: BodySource,
    buffered: Bytes,
}

enum BodySource {
    Native {
        body: UnsyncBoxBody<Bytes, BoxError>,
        handle: Handle,
    },
    Done,
}

impl RequestBody {
    fn native(body: UnsyncBoxBody<Bytes, BoxError>, handle: Handle) -> Self {
        Self {
            source: BodySource::Native { body, handle },
            buffered: Bytes::new(),
        }
    }

    /// A body backed by an in-memory buffer.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            source: BodySource::Done,
            buffered: data.into(),
        }
    }

    /// An empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// Read the remaining body into memory.
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.buffered.len());
        self.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Read for RequestBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if !self.buffered.is_empty() {
                let n = buf.len().min(self.buffered.len());
                self.buffered.copy_to_slice(&mut buf[..n]);
                return Ok(n);
            }

            let BodySource::Native { body, handle } = &mut self.source else {
                return Ok(0);
            };

            match handle.block_on(body.frame()) {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.buffered = data;
                    }
                }
                Some(Err(e)) => return Err(io::Error::other(e)),
                None => {
                    self.source = BodySource::Done;
                    return Ok(0);
                }
            }
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody")
            .field("buffered", &self.buffered.len())
            .field("exhausted", &matches!(self.source, BodySource::Done))
            .finish()
    }
}

/// Transport-agnostic request handed to a [`Handler`](crate::Handler).
#[derive(Debug)]
pub struct RequestMap {
    /// Lowercase request method (`get`, `post`, ...).
    pub request_method: String,
    /// Scheme of the accepting connector.
    pub scheme: Scheme,
    /// Host name the client addressed, falling back to the local IP.
    pub server_name: String,
    /// Port the client addressed, falling back to the local port.
    pub server_port: u16,
    /// Peer IP address.
    pub remote_addr: String,
    /// Request path, without the query string.
    pub uri: String,
    /// Raw query string, if any.
    pub query_string: Option<String>,
    /// Raw `Content-Type` header.
    pub content_type: Option<String>,
    /// Parsed `Content-Length` header.
    pub content_length: Option<u64>,
    /// `charset` parameter of the content type.
    pub character_encoding: Option<String>,
    /// Request headers keyed by lowercase name; repeated values are comma-joined.
    pub headers: BTreeMap<String, String>,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub protocol: String,
    /// Request body stream.
    pub body: RequestBody,
    /// Client certificate chain, present only when client auth produced one.
    pub ssl_client_cert: Option<Vec<CertificateDer<'static>>>,
}

impl RequestMap {
    /// Build a request map from a native request.
    ///
    /// `handle` must belong to the runtime that drives the request body; it is used
    /// to pull body frames when the handler reads.
    pub fn from_request<B>(req: http::Request<B>, conn: &ConnectionInfo, handle: Handle) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();

        let (server_name, server_port) = server_name_and_port(&parts, conn);
        let content_type = header_str(&parts.headers, http::header::CONTENT_TYPE);
        let content_length = header_str(&parts.headers, http::header::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<u64>().ok());
        let character_encoding = content_type.as_deref().and_then(charset_of);

        Self {
            request_method: parts.method.as_str().to_ascii_lowercase(),
            scheme: conn.scheme,
            server_name,
            server_port,
            remote_addr: conn.remote_addr.ip().to_string(),
            uri: parts.uri.path().to_owned(),
            query_string: parts.uri.query().map(ToOwned::to_owned),
            content_type,
            content_length,
            character_encoding,
            headers: collect_headers(&parts.headers),
            protocol: format!("{:?}", parts.version),
            body: RequestBody::native(body.map_err(Into::<BoxError>::into).boxed_unsync(), handle),
            ssl_client_cert: conn.peer_certificates.as_deref().cloned(),
        }
    }

    /// Look up a request header by name, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Resolve the addressed host and port from the authority or `Host` header.
fn server_name_and_port(parts: &http::request::Parts, conn: &ConnectionInfo) -> (String, u16) {
    let authority = parts.uri.authority().cloned().or_else(|| {
        parts
            .headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<http::uri::Authority>().ok())
    });

    match authority {
        Some(authority) => (
            authority.host().to_owned(),
            authority
                .port_u16()
                .unwrap_or_else(|| conn.scheme.default_port()),
        ),
        None => (conn.local_addr.ip().to_string(), conn.local_addr.port()),
    }
}

fn header_str(headers: &http::HeaderMap, name: http::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

fn collect_headers(headers: &http::HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        out.entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    out
}

/// Extract the `charset` parameter of a content type, verbatim.
fn charset_of(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_owned())
        })
        .filter(|charset| !charset.is_empty())
}
