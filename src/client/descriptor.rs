//! Connection descriptor parsing
//!
//! Supports formats:
//! * `host=db.internal port=5432 dbname=app user=app password='s3 cr\'et'` (libpq keyword/value)
//! * `postgres://[user[:password]@][host][:port][/database][?params]`
//! * `postgres:///database` (Unix socket, default directory)
//! * `postgres:///database?host=/path/to/socket` (Unix socket, custom directory)

use crate::connection::{SslMode, StartupParams, TlsConfig};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default server port
pub const DEFAULT_PORT: u16 = 5432;

/// Parsed connection info
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Transport type
    pub transport: TransportType,
    /// Host name (for TCP). Also used for TLS server name checks.
    pub host: Option<String>,
    /// Numeric address to dial instead of resolving `host`
    pub hostaddr: Option<String>,
    /// Server port (TCP port, or Unix socket file suffix)
    pub port: u16,
    /// Unix socket path
    pub unix_socket: Option<PathBuf>,
    /// Database name
    pub database: String,
    /// Username
    pub user: String,
    /// Password
    pub password: Option<String>,
    /// SSL/TLS mode
    pub sslmode: SslMode,
    /// `application_name` startup parameter
    pub application_name: Option<String>,
    /// Limit on establishing the connection, including authentication
    pub connect_timeout: Option<Duration>,
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("transport", &self.transport)
            .field("host", &self.host)
            .field("hostaddr", &self.hostaddr)
            .field("port", &self.port)
            .field("unix_socket", &self.unix_socket)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("sslmode", &self.sslmode)
            .field("application_name", &self.application_name)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Transport type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// TCP socket
    Tcp,
    /// Unix domain socket
    Unix,
}

/// Raw settings collected from either descriptor syntax
#[derive(Debug, Default)]
struct Settings {
    host: Option<String>,
    hostaddr: Option<String>,
    port: Option<String>,
    dbname: Option<String>,
    user: Option<String>,
    password: Option<String>,
    sslmode: Option<String>,
    application_name: Option<String>,
    connect_timeout: Option<String>,
}

impl Settings {
    fn set(&mut self, key: &str, value: String) -> Result<()> {
        let slot = match key {
            "host" => &mut self.host,
            "hostaddr" => &mut self.hostaddr,
            "port" => &mut self.port,
            "dbname" => &mut self.dbname,
            "user" => &mut self.user,
            "password" => &mut self.password,
            "sslmode" => &mut self.sslmode,
            "application_name" => &mut self.application_name,
            "connect_timeout" => &mut self.connect_timeout,
            _ => {
                return Err(Error::Config(format!(
                    "invalid connection option \"{}\"",
                    key
                )))
            }
        };
        *slot = Some(value);
        Ok(())
    }

    fn resolve(self) -> Result<ConnectionInfo> {
        let port = match non_empty(self.port) {
            Some(p) => parse_port(&p)?,
            None => DEFAULT_PORT,
        };

        let user = non_empty(self.user).unwrap_or_else(whoami::username);
        let database = non_empty(self.dbname).unwrap_or_else(|| user.clone());

        let mut sslmode = match non_empty(self.sslmode) {
            Some(mode) => mode.parse()?,
            None => SslMode::default(),
        };

        let connect_timeout = match non_empty(self.connect_timeout) {
            Some(secs) => parse_connect_timeout(&secs)?,
            None => None,
        };

        let host = non_empty(self.host);
        let hostaddr = non_empty(self.hostaddr);

        let (transport, host, unix_socket) = match host {
            Some(dir) if dir.starts_with('/') && hostaddr.is_none() => {
                // No TLS over a local socket
                sslmode = SslMode::Disable;
                let path = construct_socket_path(&dir, port);
                (TransportType::Unix, None, Some(path))
            }
            Some(host) => (TransportType::Tcp, Some(host), None),
            None if hostaddr.is_some() => (TransportType::Tcp, None, None),
            None => {
                sslmode = SslMode::Disable;
                let dir = resolve_default_socket_dir().ok_or_else(|| {
                    Error::Config(
                        "could not locate Unix socket directory; set host explicitly".into(),
                    )
                })?;
                (TransportType::Unix, None, Some(construct_socket_path(&dir, port)))
            }
        };

        Ok(ConnectionInfo {
            transport,
            host,
            hostaddr,
            port,
            unix_socket,
            database,
            user,
            password: self.password,
            sslmode,
            application_name: non_empty(self.application_name),
            connect_timeout,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_port(value: &str) -> Result<u16> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::Config(format!("invalid port number: \"{}\"", value))),
        Ok(port) => Ok(port),
    }
}

/// Seconds; zero or negative means wait indefinitely
fn parse_connect_timeout(value: &str) -> Result<Option<Duration>> {
    let secs: i64 = value.trim().parse().map_err(|_| {
        Error::Config(format!("invalid connect_timeout value: \"{}\"", value))
    })?;
    Ok((secs > 0).then(|| Duration::from_secs(secs as u64)))
}

/// Resolve the default Unix socket directory
fn resolve_default_socket_dir() -> Option<String> {
    for dir in &["/run/postgresql", "/var/run/postgresql", "/tmp"] {
        if Path::new(dir).is_dir() {
            return Some(dir.to_string());
        }
    }
    None
}

/// Construct the full Unix socket path
fn construct_socket_path(socket_dir: &str, port: u16) -> PathBuf {
    Path::new(socket_dir).join(format!(".s.PGSQL.{}", port))
}

/// Split `key=value` pairs from a libpq keyword/value string
fn parse_keyword_value(s: &str, settings: &mut Settings) -> Result<()> {
    let mut chars = s.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.peek().is_none() {
            return Ok(());
        }

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            key.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(Error::Config(format!(
                "missing \"=\" after \"{}\" in connection info string",
                key
            )));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\'') => break,
                    Some('\\') if chars.peek().is_some() => {
                        value.extend(chars.next());
                    }
                    Some(c) => value.push(c),
                    None => {
                        return Err(Error::Config(
                            "unterminated quoted string in connection info string".into(),
                        ))
                    }
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                } else {
                    value.push(c);
                }
            }
        }

        settings.set(&key, value)?;
    }
}

/// Decode `%XX` escapes in a URL component
fn percent_decode(s: &str) -> Result<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    Error::Config(format!("invalid percent-encoded token: \"{}\"", s))
                })?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|_| Error::Config(format!("percent-encoded token is not UTF-8: \"{}\"", s)))
}

fn parse_url(rest: &str, settings: &mut Settings) -> Result<()> {
    // Format: [user[:password]@][host][:port][/database][?params]
    let (rest, query) = rest.split_once('?').unwrap_or((rest, ""));
    let (authority, path) = match rest.find('/') {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };

    let host_port = match authority.rsplit_once('@') {
        Some((auth, host_port)) => {
            let (user, password) = match auth.split_once(':') {
                Some((user, password)) => (user, Some(password)),
                None => (auth, None),
            };
            settings.set("user", percent_decode(user)?)?;
            if let Some(password) = password {
                settings.set("password", percent_decode(password)?)?;
            }
            host_port
        }
        None => authority,
    };

    // [v6addr]:port or host:port
    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| Error::Config(format!("unterminated IPv6 address: \"{}\"", host_port)))?;
        (host, after.strip_prefix(':'))
    } else {
        match host_port.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };
    if !host.is_empty() {
        settings.set("host", percent_decode(host)?)?;
    }
    if let Some(port) = port {
        settings.set("port", port.to_string())?;
    }

    if let Some(database) = path.filter(|p| !p.is_empty()) {
        settings.set("dbname", percent_decode(database)?)?;
    }

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            Error::Config(format!("missing \"=\" in URI query parameter \"{}\"", pair))
        })?;
        settings.set(&percent_decode(key)?, percent_decode(value)?)?;
    }
    Ok(())
}

impl ConnectionInfo {
    /// Parse a keyword/value descriptor or a `postgres://` URL
    pub fn parse(s: &str) -> Result<Self> {
        let mut settings = Settings::default();

        match s
            .strip_prefix("postgres://")
            .or_else(|| s.strip_prefix("postgresql://"))
        {
            Some(rest) => parse_url(rest, &mut settings)?,
            None => parse_keyword_value(s, &mut settings)?,
        }

        settings.resolve()
    }

    /// Address to dial: `hostaddr` if given, otherwise `host`
    pub fn connect_host(&self) -> Option<&str> {
        self.hostaddr.as_deref().or(self.host.as_deref())
    }

    /// Name presented for SNI and certificate checks
    pub fn tls_server_name(&self) -> Option<&str> {
        self.host.as_deref().or(self.hostaddr.as_deref())
    }

    /// Human-readable connection target, used in errors and logs
    pub fn target(&self) -> String {
        match (&self.unix_socket, self.connect_host()) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(host)) if host.contains(':') => format!("[{}]:{}", host, self.port),
            (None, Some(host)) => format!("{}:{}", host, self.port),
            (None, None) => format!("localhost:{}", self.port),
        }
    }

    /// Parameters for the startup handshake
    pub fn startup_params(&self) -> StartupParams {
        StartupParams {
            user: self.user.clone(),
            database: self.database.clone(),
            password: self.password.clone(),
            application_name: self.application_name.clone(),
        }
    }

    /// Build the TLS settings for this descriptor's `sslmode`.
    ///
    /// Returns `None` for Unix sockets and `sslmode=disable`.
    pub fn tls_config(&self) -> Result<Option<TlsConfig>> {
        if self.transport == TransportType::Unix {
            return Ok(None);
        }
        TlsConfig::for_mode(self.sslmode)
    }
}

impl std::str::FromStr for ConnectionInfo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
