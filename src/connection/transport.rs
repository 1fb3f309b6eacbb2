//! Transport abstraction (TCP with optional TLS vs Unix socket)

use super::tls::TlsConfig;
use crate::{Error, Result};
use bytes::BytesMut;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

/// Transport layer abstraction
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    /// Plain TCP connection
    Tcp(TcpStream),
    /// TLS-encrypted TCP connection
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
    /// Unix domain socket
    #[cfg(unix)]
    Unix(UnixStream),
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp(_) => f.write_str("Transport::Tcp"),
            Transport::Tls(_) => f.write_str("Transport::Tls"),
            #[cfg(unix)]
            Transport::Unix(_) => f.write_str("Transport::Unix"),
        }
    }
}

/// Run `fut`, failing with [`Error::ConnectTimeout`] if `limit` elapses first
async fn with_limit<T>(
    limit: Option<Duration>,
    fut: impl std::future::Future<Output = std::io::Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::ConnectTimeout(limit))?
            .map_err(Error::from),
        None => fut.await.map_err(Error::from),
    }
}

impl Transport {
    /// Connect via plain TCP
    pub async fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let stream = with_limit(timeout, TcpStream::connect((host, port))).await?;
        stream.set_nodelay(true)?;
        Ok(Transport::Tcp(stream))
    }

    /// Connect via Unix socket
    #[cfg(unix)]
    pub async fn connect_unix(path: &Path, timeout: Option<Duration>) -> Result<Self> {
        let stream = with_limit(timeout, UnixStream::connect(path)).await?;
        Ok(Transport::Unix(stream))
    }

    /// Unix sockets are unavailable on this platform
    #[cfg(not(unix))]
    pub async fn connect_unix(path: &Path, _timeout: Option<Duration>) -> Result<Self> {
        Err(Error::Config(format!(
            "Unix socket {} is not supported on this platform",
            path.display()
        )))
    }

    /// Whether the transport is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Write all bytes and flush
    pub async fn send(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Transport::Tcp(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
            Transport::Tls(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
            #[cfg(unix)]
            Transport::Unix(stream) => {
                stream.write_all(buf).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Read available bytes into buffer, returning 0 at EOF
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Transport::Tcp(stream) => stream.read_buf(buf).await?,
            Transport::Tls(stream) => stream.read_buf(buf).await?,
            #[cfg(unix)]
            Transport::Unix(stream) => stream.read_buf(buf).await?,
        };
        Ok(n)
    }

    /// Upgrade a plain TCP transport to TLS after SSLRequest negotiation.
    pub async fn upgrade_to_tls(self, tls_config: &TlsConfig, hostname: &str) -> Result<Self> {
        match self {
            Transport::Tcp(tcp_stream) => {
                let server_name = tls_config.server_name(hostname)?;
                let connector = tokio_rustls::TlsConnector::from(tls_config.client_config());
                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;
                Ok(Transport::Tls(tls_stream))
            }
            Transport::Tls(_) => Err(Error::Tls("transport is already TLS-encrypted".into())),
            #[cfg(unix)]
            Transport::Unix(_) => Err(Error::Tls("cannot upgrade Unix socket to TLS".into())),
        }
    }

    /// Shutdown the transport
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Transport::Tcp(stream) => stream.shutdown().await?,
            Transport::Tls(stream) => stream.shutdown().await?,
            #[cfg(unix)]
            Transport::Unix(stream) => stream.shutdown().await?,
        }
        Ok(())
    }
}
