//! The seam between [`crate::ConnectionManager`] and the database client

use super::descriptor::{ConnectionInfo, TransportType};
use crate::connection::{Connection, Transport};
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Opens and checks connections from a descriptor string.
///
/// [`PgConnector`] speaks the PostgreSQL wire protocol. Tests substitute
/// scripted implementations to drive the reconnect loop deterministically.
pub trait Connector: Send + Sync {
    /// A live session
    type Handle: Send;

    /// Open a new connection described by `descriptor`
    fn open(&self, descriptor: &str) -> impl Future<Output = Result<Self::Handle>> + Send;

    /// Liveness check on an open connection
    fn ping(&self, handle: &mut Self::Handle) -> impl Future<Output = Result<()>> + Send;

    /// Close a connection gracefully
    fn close(&self, handle: Self::Handle) -> impl Future<Output = Result<()>> + Send;
}

/// Native PostgreSQL connector
#[derive(Debug, Clone, Default)]
pub struct PgConnector {
    connect_timeout: Option<Duration>,
}

impl PgConnector {
    /// Connector without a connect timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit transport setup plus authentication to `timeout`.
    ///
    /// A `connect_timeout` in the descriptor takes precedence.
    pub fn with_connect_timeout(timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
        }
    }

    /// Open a connection from already-parsed connection info
    pub async fn open_info(&self, info: &ConnectionInfo) -> Result<Connection> {
        let limit = info.connect_timeout.or(self.connect_timeout);
        let establish = self.establish(info, limit);

        let result = match limit {
            Some(limit) => tokio::time::timeout(limit, establish)
                .await
                .unwrap_or(Err(Error::ConnectTimeout(limit))),
            None => establish.await,
        };
        result.map_err(|e| Error::connect(info.target(), e))
    }

    async fn establish(&self, info: &ConnectionInfo, limit: Option<Duration>) -> Result<Connection> {
        let transport = match info.transport {
            TransportType::Tcp => {
                let host = info.connect_host().unwrap_or("localhost");
                Transport::connect_tcp(host, info.port, limit).await?
            }
            TransportType::Unix => {
                let path = info
                    .unix_socket
                    .as_deref()
                    .ok_or_else(|| Error::Config("Unix socket path not set".into()))?;
                Transport::connect_unix(path, limit).await?
            }
        };

        let tls_config = info.tls_config()?;
        let server_name = info.tls_server_name().unwrap_or("localhost");

        let mut conn = Connection::new(transport);
        conn.startup(
            &info.startup_params(),
            tls_config.as_ref().map(|tls| (tls, server_name)),
        )
        .await?;

        tracing::debug!(
            server = %info.target(),
            tls = conn.is_tls(),
            server_version = ?conn.server_version(),
            "connection established"
        );
        Ok(conn)
    }
}

impl Connector for PgConnector {
    type Handle = Connection;

    async fn open(&self, descriptor: &str) -> Result<Connection> {
        let info = ConnectionInfo::parse(descriptor)?;
        self.open_info(&info).await
    }

    async fn ping(&self, handle: &mut Connection) -> Result<()> {
        let rtt = handle.ping().await?;
        tracing::trace!(?rtt, "ping ok");
        Ok(())
    }

    async fn close(&self, handle: Connection) -> Result<()> {
        handle.close().await
    }
}
