//! pgconnector: single-connection PostgreSQL lifecycle helper
//!
//! Loads connection parameters, opens a connection, and re-establishes it
//! within a bounded time window when the owning application detects a failure.
//!
//! Features:
//! * JSON configuration loading (`Hostname`, `Port`, `Database`, ...)
//! * Time-bounded reconnect loop with a fixed retry interval and optional cancellation
//! * Native PostgreSQL wire client: TCP, TLS, Unix sockets; trust, cleartext and SCRAM-SHA-256 auth
//! * `tracing` spans and events, `metrics` counters and histograms
//!
//! Non-goals: pooling, query execution, transactions, prepared statements, failover.
//!
//! ```no_run
//! use pgconnector::{ConnectionConfig, ConnectionManager};
//! use std::time::Duration;
//!
//! # async fn run() -> pgconnector::Result<()> {
//! let config = ConnectionConfig::builder("localhost", "app", "app")
//!     .password("secret")
//!     .build()?;
//! let mut manager = ConnectionManager::new(config);
//!
//! if let Err(e) = manager.connect().await {
//!     tracing::warn!(error = %e, "initial connect failed");
//!     manager.reconnect_with_timeout(Duration::from_secs(30)).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod protocol;

pub use client::{ConnectionInfo, Connector, PgConnector};
pub use config::{load_config, ConnectionConfig, ConnectionConfigBuilder};
pub use connection::{Connection, ConnectionState, SslMode};
pub use error::{Error, Result};
pub use manager::{ConnectionManager, ConnectionStatus, ReconnectPolicy, DEFAULT_RETRY_INTERVAL};
