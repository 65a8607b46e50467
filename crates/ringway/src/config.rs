//! Server options.
//!
//! [`ServerOptions`] is the declarative description of a server: listening
//! addresses, TLS material, worker pool sizing and lifecycle flags. It can be
//! built with [`ServerOptions::builder`], loaded from option key/value pairs with
//! [`ServerOptions::from_pairs`], or read from `RINGWAY_*` environment variables
//! with [`ServerOptions::from_env`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rustls::RootCertStore;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use serde::{Deserialize, Serialize};
use tracing::warn;
use typed_builder::TypedBuilder;

use crate::error::{RingwayError, RingwayResult};
use crate::server::Server;

/// Default plaintext port.
pub const DEFAULT_PORT: u16 = 80;
/// Default TLS port, used when TLS is enabled without an explicit port.
pub const DEFAULT_SSL_PORT: u16 = 443;
/// Default bind host (all interfaces).
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default upper bound on handler threads.
pub const DEFAULT_MAX_THREADS: usize = 50;
/// Default number of persistent worker threads.
pub const DEFAULT_MIN_THREADS: usize = 8;
/// Default connection idle timeout.
pub const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_millis(200_000);
/// Default keep-alive for idle handler threads.
pub const DEFAULT_THREAD_IDLE_TIMEOUT: Duration = Duration::from_millis(60_000);
/// Default bound on graceful connection draining during stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Hook invoked with the assembled server after default wiring and before start.
pub type Configurator = Box<dyn FnOnce(&mut Server) + Send>;

/// Environment variables read by [`ServerOptions::from_env`], with their option keys.
const ENV_OPTIONS: &[(&str, &str)] = &[
    ("RINGWAY_PORT", "port"),
    ("RINGWAY_HOST", "host"),
    ("RINGWAY_JOIN", "join?"),
    ("RINGWAY_DAEMON", "daemon?"),
    ("RINGWAY_SSL", "ssl?"),
    ("RINGWAY_SSL_PORT", "ssl-port"),
    ("RINGWAY_KEYSTORE", "keystore"),
    ("RINGWAY_KEY_PASSWORD", "key-password"),
    ("RINGWAY_TRUSTSTORE", "truststore"),
    ("RINGWAY_TRUST_PASSWORD", "trust-password"),
    ("RINGWAY_MAX_THREADS", "max-threads"),
    ("RINGWAY_MIN_THREADS", "min-threads"),
    ("RINGWAY_MAX_IDLE_TIME", "max-idle-time"),
    ("RINGWAY_CLIENT_AUTH", "client-auth"),
    ("RINGWAY_THREAD_IDLE_TIMEOUT", "thread-idle-timeout"),
    ("RINGWAY_STOP_TIMEOUT", "stop-timeout"),
];

/// Client certificate policy of the TLS connector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuth {
    /// No client certificate is requested.
    #[default]
    None,
    /// A client certificate is requested but optional.
    Want,
    /// A valid client certificate is mandatory.
    Need,
}

impl ClientAuth {
    /// Option value for this policy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Want => "want",
            Self::Need => "need",
        }
    }
}

impl fmt::Display for ClientAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClientAuth {
    type Err = RingwayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "want" => Ok(Self::Want),
            "need" => Ok(Self::Need),
            other => Err(RingwayError::Config(format!(
                "invalid client-auth {other:?}, expected need, want or none"
            ))),
        }
    }
}

/// Parsed server certificate chain and private key.
pub struct KeyMaterial {
    /// Certificate chain, leaf first.
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key matching the leaf certificate.
    pub key: PrivateKeyDer<'static>,
}

impl KeyMaterial {
    /// Pair a certificate chain with its private key.
    #[must_use]
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { cert_chain, key }
    }
}

impl Clone for KeyMaterial {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("certificates", &self.cert_chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Source of the TLS server identity.
#[derive(Debug, Clone)]
pub enum KeyStore {
    /// PEM file holding the certificate chain and the private key.
    Path(PathBuf),
    /// Already parsed key material.
    Loaded(KeyMaterial),
}

impl From<PathBuf> for KeyStore {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for KeyStore {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<KeyMaterial> for KeyStore {
    fn from(material: KeyMaterial) -> Self {
        Self::Loaded(material)
    }
}

/// Source of the roots used to verify client certificates.
#[derive(Debug, Clone)]
pub enum TrustStore {
    /// PEM file holding one or more CA certificates.
    Path(PathBuf),
    /// Already built root store.
    Loaded(RootCertStore),
}

impl From<PathBuf> for TrustStore {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for TrustStore {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<RootCertStore> for TrustStore {
    fn from(roots: RootCertStore) -> Self {
        Self::Loaded(roots)
    }
}

/// Options for building and running a server.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use ringway::config::{ClientAuth, ServerOptions};
///
/// let options = ServerOptions::builder()
///     .port(8080)
///     .join(false)
///     .max_idle_time(Duration::from_secs(30))
///     .build();
/// assert_eq!(options.port, 8080);
/// assert_eq!(options.client_auth, ClientAuth::None);
/// assert!(!options.ssl_enabled());
/// ```
#[derive(TypedBuilder)]
pub struct ServerOptions {
    /// Hook run with the assembled server before it starts.
    #[builder(default, setter(transform = |f: impl FnOnce(&mut Server) + Send + 'static| Some(Box::new(f) as Configurator)))]
    pub configurator: Option<Configurator>,

    /// Plaintext listening port.
    #[builder(default = DEFAULT_PORT)]
    pub port: u16,

    /// Bind host for every connector.
    #[builder(default = String::from(DEFAULT_HOST), setter(into))]
    pub host: String,

    /// Whether [`run_server`](crate::run_server) blocks until the server stops.
    #[builder(default = true)]
    pub join: bool,

    /// Whether pool threads are daemon threads.
    #[builder(default = false)]
    pub daemon: bool,

    /// Whether to add a TLS connector.
    #[builder(default = false)]
    pub ssl: bool,

    /// TLS listening port. Setting it enables TLS.
    #[builder(default, setter(strip_option))]
    pub ssl_port: Option<u16>,

    /// TLS server identity.
    #[builder(default, setter(strip_option, into))]
    pub keystore: Option<KeyStore>,

    /// Password for the keystore.
    #[builder(default, setter(strip_option, into))]
    pub key_password: Option<String>,

    /// Roots for verifying client certificates.
    #[builder(default, setter(strip_option, into))]
    pub truststore: Option<TrustStore>,

    /// Password for the truststore.
    #[builder(default, setter(strip_option, into))]
    pub trust_password: Option<String>,

    /// Upper bound on threads running handlers.
    #[builder(default = DEFAULT_MAX_THREADS)]
    pub max_threads: usize,

    /// Persistent worker threads.
    #[builder(default = DEFAULT_MIN_THREADS)]
    pub min_threads: usize,

    /// Connection idle timeout. Zero disables it.
    #[builder(default = DEFAULT_MAX_IDLE_TIME)]
    pub max_idle_time: Duration,

    /// Client certificate policy.
    #[builder(default)]
    pub client_auth: ClientAuth,

    /// How long an idle handler thread is kept before exiting.
    #[builder(default = DEFAULT_THREAD_IDLE_TIMEOUT)]
    pub thread_idle_timeout: Duration,

    /// Bound on graceful connection draining during stop.
    #[builder(default = DEFAULT_STOP_TIMEOUT)]
    pub stop_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const REDACTED: &str = "<redacted>";
        f.debug_struct("ServerOptions")
            .field("configurator", &self.configurator.as_ref().map(|_| ".."))
            .field("port", &self.port)
            .field("host", &self.host)
            .field("join", &self.join)
            .field("daemon", &self.daemon)
            .field("ssl", &self.ssl)
            .field("ssl_port", &self.ssl_port)
            .field("keystore", &self.keystore)
            .field("key_password", &self.key_password.as_ref().map(|_| REDACTED))
            .field("truststore", &self.truststore)
            .field(
                "trust_password",
                &self.trust_password.as_ref().map(|_| REDACTED),
            )
            .field("max_threads", &self.max_threads)
            .field("min_threads", &self.min_threads)
            .field("max_idle_time", &self.max_idle_time)
            .field("client_auth", &self.client_auth)
            .field("thread_idle_timeout", &self.thread_idle_timeout)
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}

impl ServerOptions {
    /// Whether a TLS connector is configured, either by `ssl` or by an explicit port.
    #[must_use]
    pub fn ssl_enabled(&self) -> bool {
        self.ssl || self.ssl_port.is_some()
    }

    /// TLS port, defaulting to 443.
    #[must_use]
    pub fn effective_ssl_port(&self) -> u16 {
        self.ssl_port.unwrap_or(DEFAULT_SSL_PORT)
    }

    /// Load options from option key/value pairs, starting from the defaults.
    ///
    /// Keys use the option names (`port`, `join?`, `ssl-port`, `max-idle-time`, ...).
    /// Durations are given in milliseconds. Unknown keys are ignored with a warning;
    /// a known key with an unparsable value is an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use ringway::config::ServerOptions;
    ///
    /// let options = ServerOptions::from_pairs([
    ///     ("port", "3000"),
    ///     ("join?", "false"),
    ///     ("max-idle-time", "5000"),
    /// ])
    /// .unwrap();
    /// assert_eq!(options.port, 3000);
    /// assert!(!options.join);
    /// assert_eq!(options.max_idle_time, Duration::from_secs(5));
    /// ```
    pub fn from_pairs<I, K, V>(pairs: I) -> RingwayResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            options.apply(key.as_ref(), value.as_ref())?;
        }
        Ok(options)
    }

    /// Load options from `RINGWAY_*` environment variables.
    ///
    /// | Variable | Option |
    /// |----------|--------|
    /// | `RINGWAY_PORT` | `port` |
    /// | `RINGWAY_HOST` | `host` |
    /// | `RINGWAY_JOIN` | `join?` |
    /// | `RINGWAY_DAEMON` | `daemon?` |
    /// | `RINGWAY_SSL` | `ssl?` |
    /// | `RINGWAY_SSL_PORT` | `ssl-port` |
    /// | `RINGWAY_KEYSTORE` | `keystore` |
    /// | `RINGWAY_KEY_PASSWORD` | `key-password` |
    /// | `RINGWAY_TRUSTSTORE` | `truststore` |
    /// | `RINGWAY_TRUST_PASSWORD` | `trust-password` |
    /// | `RINGWAY_MAX_THREADS` | `max-threads` |
    /// | `RINGWAY_MIN_THREADS` | `min-threads` |
    /// | `RINGWAY_MAX_IDLE_TIME` | `max-idle-time` |
    /// | `RINGWAY_CLIENT_AUTH` | `client-auth` |
    /// | `RINGWAY_THREAD_IDLE_TIMEOUT` | `thread-idle-timeout` |
    /// | `RINGWAY_STOP_TIMEOUT` | `stop-timeout` |
    pub fn from_env() -> RingwayResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load options through an environment-style lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> RingwayResult<Self> {
        let mut options = Self::default();
        for (var, key) in ENV_OPTIONS {
            if let Some(value) = lookup(var) {
                options.apply(key, &value)?;
            }
        }
        Ok(options)
    }

    fn apply(&mut self, key: &str, value: &str) -> RingwayResult<()> {
        match key {
            "port" => self.port = parse_number(key, value)?,
            "host" => self.host = value.to_owned(),
            "join?" => self.join = parse_flag(key, value)?,
            "daemon?" => self.daemon = parse_flag(key, value)?,
            "ssl?" => self.ssl = parse_flag(key, value)?,
            "ssl-port" => self.ssl_port = Some(parse_number(key, value)?),
            "keystore" => self.keystore = Some(KeyStore::Path(PathBuf::from(value))),
            "key-password" => self.key_password = Some(value.to_owned()),
            "truststore" => self.truststore = Some(TrustStore::Path(PathBuf::from(value))),
            "trust-password" => self.trust_password = Some(value.to_owned()),
            "max-threads" => self.max_threads = parse_number(key, value)?,
            "min-threads" => self.min_threads = parse_number(key, value)?,
            "max-idle-time" => self.max_idle_time = parse_millis(key, value)?,
            "client-auth" => self.client_auth = value.parse()?,
            "thread-idle-timeout" => self.thread_idle_timeout = parse_millis(key, value)?,
            "stop-timeout" => self.stop_timeout = parse_millis(key, value)?,
            "configurator" => warn!(key, "configurator cannot be set from a string value, ignoring"),
            _ => warn!(key, "ignoring unknown server option"),
        }
        Ok(())
    }
}

/// Parse a string as a boolean, accepting `"1"` / `"true"` and `"0"` / `"false"`
/// (case-insensitive).
fn parse_bool(value: &str) -> Option<bool> {
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_flag(key: &str, value: &str) -> RingwayResult<bool> {
    parse_bool(value.trim()).ok_or_else(|| invalid_value(key, value))
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> RingwayResult<T> {
    value.trim().parse().map_err(|_| invalid_value(key, value))
}

fn parse_millis(key: &str, value: &str) -> RingwayResult<Duration> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}

fn invalid_value(key: &str, value: &str) -> RingwayError {
    RingwayError::Config(format!("invalid value {value:?} for option {key}"))
}
