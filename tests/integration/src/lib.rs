//! Integration tests for Ringway servers.
//!
//! Every test starts real servers on ephemeral loopback ports and drives them with
//! a blocking HTTP client, so they run as part of a normal `cargo test`:
//!
//! ```text
//! cargo test -p ringway-integration
//! ```

use std::io::{Read, Write};
use std::sync::Once;
use std::time::Duration;

use ringway::{ServerHandle, ServerOptions};
use ringway_http::{RequestMap, Scheme};
use serde_json::json;

static INIT: Once = Once::new();

/// Self-signed certificate for `localhost`.
pub const TEST_CERT_PEM: &str = include_str!("../../tls-fixtures/server-cert.pem");

/// Private key matching [`TEST_CERT_PEM`].
pub const TEST_KEY_PEM: &str = include_str!("../../tls-fixtures/server-key.pem");

/// CA that issued [`TEST_CLIENT_PEM`].
pub const TEST_CA_PEM: &str = include_str!("../../tls-fixtures/ca-cert.pem");

/// Client certificate and key issued by [`TEST_CA_PEM`].
pub const TEST_CLIENT_PEM: &str = include_str!("../../tls-fixtures/client.pem");

/// Client certificate and key issued by a CA the server does not trust.
pub const UNTRUSTED_CLIENT_PEM: &str = include_str!("../../tls-fixtures/untrusted-client.pem");

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Options for a non-joining server on an ephemeral loopback port.
#[must_use]
pub fn local_options() -> ServerOptions {
    init_tracing();

    ServerOptions::builder()
        .host("127.0.0.1")
        .port(0)
        .join(false)
        .min_threads(2)
        .max_threads(8)
        .stop_timeout(Duration::from_secs(5))
        .build()
}

/// Write a PEM keystore (certificate chain + key) to a temporary file.
#[must_use]
pub fn keystore_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create keystore file");
    file.write_all(TEST_CERT_PEM.as_bytes())
        .and_then(|()| file.write_all(TEST_KEY_PEM.as_bytes()))
        .expect("write keystore file");
    file
}

/// Write [`TEST_CA_PEM`] to a temporary truststore file.
#[must_use]
pub fn truststore_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create truststore file");
    file.write_all(TEST_CA_PEM.as_bytes())
        .expect("write truststore file");
    file
}

/// Options for a server with a plaintext and a TLS connector on ephemeral ports.
#[must_use]
pub fn tls_options(keystore: &tempfile::NamedTempFile) -> ServerOptions {
    let mut options = local_options();
    options.ssl_port = Some(0);
    options.keystore = Some(keystore.path().into());
    options
}

/// URL of `path` on the first connector serving `scheme`.
#[must_use]
pub fn url(handle: &ServerHandle, scheme: Scheme, path: &str) -> String {
    let connector = handle
        .connectors()
        .into_iter()
        .find(|c| c.scheme == scheme)
        .expect("server should have a connector for the scheme");
    format!("{scheme}://127.0.0.1:{}{path}", connector.local_addr.port())
}

/// Blocking client that accepts the self-signed test certificate.
#[must_use]
pub fn http_client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(10))
        .build()
        .expect("build http client")
}

/// Blocking client that presents `identity_pem` (certificate + key) to the server.
#[must_use]
pub fn http_client_with_identity(identity_pem: &str) -> reqwest::blocking::Client {
    let identity =
        reqwest::Identity::from_pem(identity_pem.as_bytes()).expect("parse client identity");
    reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(true)
        .identity(identity)
        .timeout(Duration::from_secs(10))
        .build()
        .expect("build http client")
}

/// Describe a request map as JSON, consuming its body.
pub fn describe(mut req: RequestMap) -> anyhow::Result<serde_json::Value> {
    let mut body = String::new();
    req.body.read_to_string(&mut body)?;

    Ok(json!({
        "request_method": req.request_method,
        "scheme": req.scheme.as_str(),
        "server_name": req.server_name,
        "server_port": req.server_port,
        "remote_addr": req.remote_addr,
        "uri": req.uri,
        "query_string": req.query_string,
        "content_type": req.content_type,
        "content_length": req.content_length,
        "character_encoding": req.character_encoding,
        "protocol": req.protocol,
        "ssl_client_cert": req.ssl_client_cert.as_ref().map(|chain| chain.len()),
        "body": body,
    }))
}

mod test_http;
mod test_lifecycle;
mod test_tls;
