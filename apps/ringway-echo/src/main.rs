//! Ringway echo server.
//!
//! Serves every request by reflecting its request map back as a JSON document. Useful
//! for checking connector, TLS and proxy wiring end to end.
//!
//! # Usage
//!
//! ```text
//! RINGWAY_PORT=8080 RINGWAY_SSL_PORT=8443 RINGWAY_KEYSTORE=server.pem ringway-echo
//! ```
//!
//! # Environment Variables
//!
//! Server options are read from `RINGWAY_*` variables (see
//! [`ringway::ServerOptions::from_env`]). In addition:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use anyhow::{Context, Result};
use ringway::{ServerOptions, run_server};
use ringway_http::{RequestMap, ResponseMap, handler_fn};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Server version reported in every echo.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to `LOG_LEVEL`.
fn init_tracing() -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
        EnvFilter::try_new(&log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Reflect the request map as JSON.
fn echo(req: RequestMap) -> Result<Option<ResponseMap>> {
    let RequestMap {
        request_method,
        scheme,
        server_name,
        server_port,
        remote_addr,
        uri,
        query_string,
        content_type,
        content_length,
        character_encoding,
        headers,
        protocol,
        body,
        ssl_client_cert,
    } = req;
    let body = body.into_bytes().context("failed to read request body")?;

    let document = json!({
        "request_method": request_method,
        "scheme": scheme.as_str(),
        "server_name": server_name,
        "server_port": server_port,
        "remote_addr": remote_addr,
        "uri": uri,
        "query_string": query_string,
        "content_type": content_type,
        "content_length": content_length,
        "character_encoding": character_encoding,
        "headers": headers,
        "protocol": protocol,
        "body": String::from_utf8_lossy(&body),
        "client_certificates": ssl_client_cert.map(|chain| chain.len()),
        "server": format!("ringway-echo/{VERSION}"),
    });

    Ok(Some(
        ResponseMap::new(200)
            .header("Content-Type", "application/json")
            .body(serde_json::to_vec_pretty(&document)?),
    ))
}

fn main() -> Result<()> {
    init_tracing()?;

    let mut options = ServerOptions::from_env().context("invalid server options")?;
    // The signal wait below owns the main thread.
    options.join = false;

    info!(
        port = options.port,
        host = %options.host,
        ssl = options.ssl_enabled(),
        version = VERSION,
        "starting ringway-echo",
    );

    let handle = run_server(handler_fn(echo), options)?;
    for addr in handle.local_addrs() {
        info!(%addr, "listening");
    }

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?
        .block_on(tokio::signal::ctrl_c())
        .context("failed to wait for shutdown signal")?;

    info!("received shutdown signal, stopping");
    handle.stop()?;
    Ok(())
}
