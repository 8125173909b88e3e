//! Connection options.

use std::sync::Arc;
use std::time::Duration;

use no_panic::no_panic;
use url::Url;

use crate::buffer_pool::{BufferPool, GLOBAL_BUFFER_POOL};
use crate::error::Error;

/// SSL connection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't use SSL
    Disable,
    /// Try SSL if the server offers it, otherwise continue unencrypted
    #[default]
    Prefer,
    /// Try SSL, fail if the server doesn't offer it
    Allow,
    /// Require SSL connection
    Require,
    /// Require SSL and verify the server certificate against `sslrootcert`
    ///
    /// Downgraded to `Require` at connect time: the `native-tls` collaborator
    /// does not expose independent CA-pinning from hostname verification.
    VerifyCa,
    /// Require SSL, verify the certificate, and verify the server hostname
    ///
    /// Downgraded to `Require` at connect time, same caveat as `VerifyCa`.
    VerifyFull,
}

impl SslMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "disable" => Some(SslMode::Disable),
            "prefer" => Some(SslMode::Prefer),
            "allow" => Some(SslMode::Allow),
            "require" => Some(SslMode::Require),
            "verify-ca" => Some(SslMode::VerifyCa),
            "verify-full" => Some(SslMode::VerifyFull),
            _ => None,
        }
    }
}

/// Connection options for PostgreSQL.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `""`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket path.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// SSL connection mode.
    ///
    /// Default: `SslMode::Prefer`
    pub ssl_mode: SslMode,

    /// Additional connection parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,

    /// When connected via TCP to loopback, upgrade to Unix socket for better performance.
    ///
    /// Default: `true`
    pub prefer_unix_socket: bool,

    /// Maximum number of idle connections in the pool.
    ///
    /// Default: `100`
    pub pool_max_idle_conn: usize,

    /// Maximum number of concurrent connections (None = unlimited).
    ///
    /// Default: `None`
    pub pool_max_concurrency: Option<usize>,

    /// Backing store for reusable read/write buffers.
    ///
    /// Default: the process-wide [`GLOBAL_BUFFER_POOL`].
    pub buffer_pool: Arc<BufferPool>,

    /// Path to the root CA certificate used to verify the server certificate.
    ///
    /// Only consulted when `ssl_mode` is `VerifyCa` or `VerifyFull`.
    ///
    /// Default: `None`
    pub sslrootcert: Option<String>,

    /// Path to the client certificate presented for certificate authentication.
    ///
    /// Default: `None`
    pub sslcert: Option<String>,

    /// Path to the client private key matching `sslcert`.
    ///
    /// Default: `None`
    pub sslkey: Option<String>,

    /// Path to a `.pgpass`-style password file, consulted when `password` is unset.
    ///
    /// Default: `None`
    pub passfile: Option<String>,

    /// Session-level `SET` statements issued right after connecting,
    /// e.g. `[("statement_timeout", "30s")]`.
    ///
    /// Default: `[]`
    pub server_settings: Vec<(String, String)>,

    /// Timeout for establishing the TCP/Unix connection and completing the handshake.
    ///
    /// Default: `None` (no timeout)
    pub connect_timeout: Option<Duration>,

    /// Timeout applied to each individual query/command round-trip.
    ///
    /// Default: `None` (no timeout)
    pub command_timeout: Option<Duration>,

    /// Maximum number of prepared statements cached per connection, keyed by SQL text.
    /// `0` disables the cache (every `prepare` allocates an unnamed statement).
    ///
    /// Default: `100`
    pub statement_cache_size: usize,

    /// Maximum time a cached prepared statement may sit idle before it's evicted on next use.
    /// `None` means cached statements never expire by age (only by LRU pressure).
    ///
    /// Default: `None`
    pub max_cached_statement_lifetime: Option<Duration>,

    /// Maximum time an idle pooled connection may live before being closed and replaced.
    ///
    /// Default: `None` (no limit)
    pub max_inactive_connection_lifetime: Option<Duration>,
}

impl Default for Opts {
    #[no_panic]
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            socket: None,
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            ssl_mode: SslMode::Prefer,
            params: Vec::new(),
            prefer_unix_socket: true,
            pool_max_idle_conn: 100,
            pool_max_concurrency: None,
            buffer_pool: Arc::clone(&GLOBAL_BUFFER_POOL),
            sslrootcert: None,
            sslcert: None,
            sslkey: None,
            passfile: None,
            server_settings: Vec::new(),
            connect_timeout: None,
            command_timeout: None,
            statement_cache_size: 100,
            max_cached_statement_lifetime: None,
            max_inactive_connection_lifetime: None,
        }
    }
}

impl Opts {
    /// Apply `PG*` environment variables as a base layer.
    ///
    /// Call before overlaying DSN/URL parameters, mirroring libpq's precedence
    /// (explicit parameters win over environment variables).
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Ok(v) = std::env::var("PGHOST") {
            opts.host = v;
        }
        if let Ok(v) = std::env::var("PGPORT") {
            if let Ok(port) = v.parse() {
                opts.port = port;
            }
        }
        if let Ok(v) = std::env::var("PGUSER") {
            opts.user = v;
        }
        if let Ok(v) = std::env::var("PGPASSWORD") {
            opts.password = Some(v);
        }
        if let Ok(v) = std::env::var("PGDATABASE") {
            opts.database = Some(v);
        }
        if let Ok(v) = std::env::var("PGPASSFILE") {
            opts.passfile = Some(v);
        }
        if let Ok(v) = std::env::var("PGSSLMODE") {
            if let Some(mode) = SslMode::parse(&v) {
                opts.ssl_mode = mode;
            }
        }
        if let Ok(v) = std::env::var("PGSSLROOTCERT") {
            opts.sslrootcert = Some(v);
        }
        if let Ok(v) = std::env::var("PGAPPNAME") {
            opts.application_name = Some(v);
        }
        if let Ok(v) = std::env::var("PGCONNECT_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                opts.connect_timeout = Some(Duration::from_secs(secs));
            }
        }
        opts
    }

    /// Parse a `key=value key2=value2 ...` DSN, libpq's "connstring" format.
    ///
    /// Values may be single-quoted to contain spaces, with `\'` and `\\` escapes.
    pub fn try_from_keyword_dsn(s: &str) -> Result<Self, Error> {
        let mut opts = Self::default();
        for (key, value) in parse_keyword_pairs(s)? {
            opts.apply_keyword(&key, &value)?;
        }
        Ok(opts)
    }

    fn apply_keyword(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            "host" | "hostaddr" => self.host = value.to_string(),
            "port" => {
                self.port = value
                    .parse()
                    .map_err(|_| Error::InvalidUsage(format!("invalid port: {value}")))?;
            }
            "user" => self.user = value.to_string(),
            "password" => self.password = Some(value.to_string()),
            "dbname" => self.database = Some(value.to_string()),
            "application_name" => self.application_name = Some(value.to_string()),
            "sslmode" => {
                self.ssl_mode = SslMode::parse(value).ok_or_else(|| {
                    Error::InvalidUsage(format!("invalid sslmode: {value}"))
                })?;
            }
            "sslrootcert" => self.sslrootcert = Some(value.to_string()),
            "sslcert" => self.sslcert = Some(value.to_string()),
            "sslkey" => self.sslkey = Some(value.to_string()),
            "passfile" => self.passfile = Some(value.to_string()),
            "connect_timeout" => {
                let secs: u64 = value
                    .parse()
                    .map_err(|_| Error::InvalidUsage(format!("invalid connect_timeout: {value}")))?;
                self.connect_timeout = Some(Duration::from_secs(secs));
            }
            "statement_cache_size" => {
                self.statement_cache_size = value.parse().map_err(|_| {
                    Error::InvalidUsage(format!("invalid statement_cache_size: {value}"))
                })?;
            }
            _ => self.params.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }
}

/// Split a libpq-style keyword/value connection string into pairs.
fn parse_keyword_pairs(s: &str) -> Result<Vec<(String, String)>, Error> {
    let mut pairs = Vec::new();
    let mut chars = s.trim().chars().peekable();

    while chars.peek().is_some() {
        while chars.peek() == Some(&' ') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(Error::InvalidUsage(format!(
                "expected '=' after keyword '{}'",
                key.trim()
            )));
        }

        let mut value = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            loop {
                match chars.next() {
                    Some('\\') => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    Some('\'') => break,
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::InvalidUsage("unterminated quoted value".into()));
                    }
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        pairs.push((key.trim().to_string(), value));
    }

    Ok(pairs)
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&param2=value2&..]`
    ///
    /// Supported query parameters:
    /// - `sslmode`: disable, prefer, require
    /// - `application_name`: application name
    /// - `prefer_unix_socket`: true/True/1/yes/on or false/False/0/no/off
    /// - `pool_max_idle_conn`: maximum idle connections (positive integer)
    /// - `pool_max_concurrency`: maximum concurrent connections (positive integer)
    #[no_panic]
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url.path().strip_prefix('/').and_then(|s| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            }),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" => {
                    opts.ssl_mode = SslMode::parse(value.as_ref()).ok_or_else(|| {
                        Error::InvalidUsage(format!("Invalid sslmode: {}", value))
                    })?;
                }
                "application_name" => {
                    opts.application_name = Some(value.to_string());
                }
                "prefer_unix_socket" => {
                    opts.prefer_unix_socket = match value.as_ref() {
                        "true" | "True" | "1" | "yes" | "on" => true,
                        "false" | "False" | "0" | "no" | "off" => false,
                        _ => {
                            return Err(Error::InvalidUsage(format!(
                                "Invalid prefer_unix_socket: {}",
                                value
                            )));
                        }
                    };
                }
                "pool_max_idle_conn" => {
                    opts.pool_max_idle_conn = value.parse().map_err(|_| {
                        Error::InvalidUsage(format!("Invalid pool_max_idle_conn: {}", value))
                    })?;
                }
                "pool_max_concurrency" => {
                    opts.pool_max_concurrency = Some(value.parse().map_err(|_| {
                        Error::InvalidUsage(format!("Invalid pool_max_concurrency: {}", value))
                    })?);
                }
                "sslrootcert" => opts.sslrootcert = Some(value.to_string()),
                "sslcert" => opts.sslcert = Some(value.to_string()),
                "sslkey" => opts.sslkey = Some(value.to_string()),
                "passfile" => opts.passfile = Some(value.to_string()),
                "connect_timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        Error::InvalidUsage(format!("Invalid connect_timeout: {}", value))
                    })?;
                    opts.connect_timeout = Some(Duration::from_secs(secs));
                }
                "command_timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        Error::InvalidUsage(format!("Invalid command_timeout: {}", value))
                    })?;
                    opts.command_timeout = Some(Duration::from_secs(secs));
                }
                "statement_cache_size" => {
                    opts.statement_cache_size = value.parse().map_err(|_| {
                        Error::InvalidUsage(format!("Invalid statement_cache_size: {}", value))
                    })?;
                }
                "max_cached_statement_lifetime" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        Error::InvalidUsage(format!(
                            "Invalid max_cached_statement_lifetime: {}",
                            value
                        ))
                    })?;
                    opts.max_cached_statement_lifetime = Some(Duration::from_secs(secs));
                }
                "max_inactive_connection_lifetime" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        Error::InvalidUsage(format!(
                            "Invalid max_inactive_connection_lifetime: {}",
                            value
                        ))
                    })?;
                    opts.max_inactive_connection_lifetime = Some(Duration::from_secs(secs));
                }
                _ => {
                    opts.params.push((key.to_string(), value.to_string()));
                }
            }
        }

        // `host=/var/run/postgresql` (or any absolute/`@`-prefixed path) selects a Unix
        // domain socket directly instead of a TCP host, matching libpq's convention.
        if opts.host.starts_with('/') || opts.host.starts_with('@') {
            opts.socket = Some(std::mem::take(&mut opts.host));
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    /// Parse either a `postgres://` URL or a libpq-style `key=value` connection string.
    #[no_panic]
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if s.contains("://") {
            let url =
                Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
            Self::try_from(&url)
        } else {
            Self::try_from_keyword_dsn(s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_dsn_basic() {
        let opts = Opts::try_from_keyword_dsn("host=db.internal port=5433 user=app dbname=prod")
            .unwrap();
        assert_eq!(opts.host, "db.internal");
        assert_eq!(opts.port, 5433);
        assert_eq!(opts.user, "app");
        assert_eq!(opts.database.as_deref(), Some("prod"));
    }

    #[test]
    fn keyword_dsn_quoted_value() {
        let opts = Opts::try_from_keyword_dsn("host=localhost password='a b\\'c'").unwrap();
        assert_eq!(opts.password.as_deref(), Some("a b'c"));
    }

    #[test]
    fn url_unix_socket_host() {
        let url = Url::parse("postgres://user@%2Fvar%2Frun%2Fpostgresql/db").unwrap();
        let opts = Opts::try_from(&url).unwrap();
        assert_eq!(opts.socket.as_deref(), Some("/var/run/postgresql"));
    }

    #[test]
    fn dispatches_on_scheme_separator() {
        assert!(Opts::try_from("host=localhost user=app").is_ok());
        assert!(Opts::try_from("postgres://app@localhost/db").is_ok());
    }
}
