//! Connection parameters and their JSON file format
//!
//! ```json
//! {
//!   "Hostname": "db.internal",
//!   "Port": "5432",
//!   "Database": "orders",
//!   "Username": "svc",
//!   "Password": "secret",
//!   "Sslmode": "require",
//!   "ApplicationName": "billing"
//! }
//! ```
//!
//! `Port`, `Password`, `Sslmode`, `ApplicationName` and `ConnectTimeout` (seconds) are optional.

use crate::connection::SslMode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_PORT: &str = "5432";
const DEFAULT_SSLMODE: &str = "prefer";
const DEFAULT_APPLICATION_NAME: &str = "pgconnector";

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}

fn default_sslmode() -> String {
    DEFAULT_SSLMODE.to_string()
}

fn default_application_name() -> String {
    DEFAULT_APPLICATION_NAME.to_string()
}

/// Connection parameters
///
/// Values are kept as the strings they were configured with. [`validate`](Self::validate)
/// checks that they make sense; [`descriptor`](Self::descriptor) renders them for the connector.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionConfig {
    /// Server host name, IP address, or Unix socket directory
    pub hostname: String,
    /// Server port (default: "5432")
    #[serde(default = "default_port")]
    pub port: String,
    /// Database name
    pub database: String,
    /// Role to log in as
    pub username: String,
    /// Password (may be empty)
    #[serde(default)]
    pub password: String,
    /// libpq `sslmode` (default: "prefer")
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
    /// Reported in `pg_stat_activity` (default: "pgconnector")
    #[serde(default = "default_application_name")]
    pub application_name: String,
    /// Limit on establishing one connection, in seconds
    #[serde(
        default,
        rename = "ConnectTimeout",
        skip_serializing_if = "Option::is_none"
    )]
    pub connect_timeout_secs: Option<u64>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let password = if self.password.is_empty() {
            ""
        } else {
            "<redacted>"
        };
        f.debug_struct("ConnectionConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &password)
            .field("sslmode", &self.sslmode)
            .field("application_name", &self.application_name)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl ConnectionConfig {
    /// Create a builder
    ///
    /// # Examples
    ///
    /// ```
    /// use pgconnector::ConnectionConfig;
    ///
    /// let config = ConnectionConfig::builder("db.internal", "orders", "svc")
    ///     .password("secret")
    ///     .sslmode("require")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.port, "5432");
    /// ```
    pub fn builder(
        hostname: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: ConnectionConfig {
                hostname: hostname.into(),
                port: default_port(),
                database: database.into(),
                username: username.into(),
                password: String::new(),
                sslmode: default_sslmode(),
                application_name: default_application_name(),
                connect_timeout_secs: None,
            },
        }
    }

    /// Read and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let load_error = |reason: String| Error::ConfigLoad {
            path: path.to_path_buf(),
            reason,
        };

        let contents = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|e| load_error(e.to_string()))?;
        config.validate().map_err(|e| match e {
            Error::Config(reason) => load_error(reason),
            other => load_error(other.to_string()),
        })?;

        tracing::debug!(path = %path.display(), config = ?config, "loaded connection config");
        Ok(config)
    }

    /// Check that every field holds a usable value
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(Error::Config("hostname must not be empty".into()));
        }
        self.port_number()?;
        self.ssl_mode()?;
        if self.connect_timeout_secs == Some(0) {
            return Err(Error::Config(
                "connect timeout must be at least one second".into(),
            ));
        }
        Ok(())
    }

    /// Port as a number
    pub fn port_number(&self) -> Result<u16> {
        match self.port.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(Error::Config(format!(
                "invalid port \"{}\": expected 1-65535",
                self.port
            ))),
            Ok(port) => Ok(port),
        }
    }

    /// Parsed `sslmode`
    pub fn ssl_mode(&self) -> Result<SslMode> {
        self.sslmode.parse()
    }

    /// Connect timeout, if configured
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    /// Target shown in logs and errors
    pub fn target(&self) -> String {
        format!("{}:{}", self.hostname.trim(), self.port.trim())
    }

    /// Render as a libpq keyword/value descriptor.
    ///
    /// Values containing spaces, quotes or backslashes are single-quoted and escaped.
    /// Empty password and application name are left out.
    pub fn descriptor(&self) -> String {
        let mut pairs = vec![
            ("host", self.hostname.trim()),
            ("port", self.port.trim()),
            ("dbname", self.database.as_str()),
            ("user", self.username.as_str()),
        ];
        if !self.password.is_empty() {
            pairs.push(("password", self.password.as_str()));
        }
        pairs.push(("sslmode", self.sslmode.as_str()));
        if !self.application_name.is_empty() {
            pairs.push(("application_name", self.application_name.as_str()));
        }

        let mut out = pairs
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, quote_value(value)))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(secs) = self.connect_timeout_secs {
            out.push_str(&format!(" connect_timeout={}", secs));
        }
        out
    }
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

/// Read and validate a JSON configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<ConnectionConfig> {
    ConnectionConfig::load(path)
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the port (default: "5432")
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.config.port = port.into();
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    /// Set `sslmode` (default: "prefer")
    pub fn sslmode(mut self, sslmode: impl Into<String>) -> Self {
        self.config.sslmode = sslmode.into();
        self
    }

    /// Set the application name (default: "pgconnector")
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self
    }

    /// Limit each connection attempt. Rounded up to whole seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.config.connect_timeout_secs = Some(secs.max(1));
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
