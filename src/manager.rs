//! Single-connection lifecycle: connect, health check, time-bounded reconnect

use crate::client::{Connector, PgConnector};
use crate::config::ConnectionConfig;
use crate::metrics::labels;
use crate::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Pause between failed reconnect attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// How the reconnect loop paces its attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed sleep after each failed attempt (no backoff growth)
    pub interval: Duration,
}

impl ReconnectPolicy {
    /// Policy with a custom retry interval
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Whether the manager currently holds a live handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No handle stored
    Disconnected,
    /// A handle is stored
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Owns the configuration and at most one connection handle.
///
/// Every operation that can replace the handle takes `&mut self`, so callers
/// cannot keep a borrowed handle alive across a reconnect.
///
/// # Examples
///
/// ```no_run
/// use pgconnector::ConnectionManager;
/// use std::time::Duration;
///
/// # async fn run() -> pgconnector::Result<()> {
/// let mut manager = ConnectionManager::from_config_file("pg.json")?;
/// if manager.connect().await.is_err() {
///     manager.reconnect_with_timeout(Duration::from_secs(30)).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager<C: Connector = PgConnector> {
    config: ConnectionConfig,
    connector: C,
    policy: ReconnectPolicy,
    connection: Option<C::Handle>,
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionManager<PgConnector> {
    /// Manager using the native PostgreSQL connector
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(config, PgConnector::new())
    }

    /// Load a JSON configuration file and build a manager from it
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = ConnectionConfig::load(path)?;
        Ok(Self::new(config))
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Manager using a custom connector
    pub fn with_connector(config: ConnectionConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            policy: ReconnectPolicy::default(),
            connection: None,
        }
    }

    /// Replace the reconnect policy
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Configuration this manager connects with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current reconnect policy
    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Whether a handle is stored
    pub fn status(&self) -> ConnectionStatus {
        if self.connection.is_some() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// The current handle, if any
    pub fn connection(&self) -> Option<&C::Handle> {
        self.connection.as_ref()
    }

    /// The current handle, mutably
    pub fn connection_mut(&mut self) -> Option<&mut C::Handle> {
        self.connection.as_mut()
    }

    /// Open a new connection and store it as current.
    ///
    /// No retry happens here. On failure the stored handle is left as it was.
    /// On success a previously stored handle is dropped without a graceful close.
    pub async fn connect(&mut self) -> Result<&mut C::Handle> {
        let handle = self.open().await?;
        Ok(self.connection.insert(handle))
    }

    /// Ping the current handle. A failed ping drops it.
    pub async fn ping(&mut self) -> Result<()> {
        let handle = self.connection.as_mut().ok_or(Error::ConnectionClosed)?;
        if let Err(e) = self.connector.ping(handle).await {
            tracing::warn!(error = %e, "ping failed, dropping connection");
            self.connection = None;
            return Err(Error::Ping(Box::new(e)));
        }
        Ok(())
    }

    /// Close the current handle gracefully and clear it
    pub async fn disconnect(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(handle) => {
                tracing::debug!(server = %self.config.target(), "disconnecting");
                self.connector.close(handle).await
            }
            None => Ok(()),
        }
    }

    /// Retry connect + ping every [`ReconnectPolicy::interval`] until one succeeds
    /// or `timeout` has elapsed.
    ///
    /// Individual failures are logged, never returned. At least one attempt is
    /// always made. On timeout the error names `timeout`.
    pub async fn reconnect_with_timeout(&mut self, timeout: Duration) -> Result<()> {
        let server = self.config.target();
        self.reconnect_loop(timeout, None)
            .instrument(tracing::info_span!("reconnect", %server, ?timeout))
            .await
    }

    /// Like [`reconnect_with_timeout`](Self::reconnect_with_timeout), but stops
    /// with [`Error::Cancelled`] as soon as `token` is cancelled, including
    /// during an attempt or the pause between attempts.
    pub async fn reconnect_until_cancelled(
        &mut self,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<()> {
        let server = self.config.target();
        self.reconnect_loop(timeout, Some(token))
            .instrument(tracing::info_span!("reconnect", %server, ?timeout))
            .await
    }

    async fn reconnect_loop(
        &mut self,
        timeout: Duration,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        let start = Instant::now();
        let interval = self.policy.interval;
        let mut attempts: u32 = 0;
        let mut last_error: Option<String>;

        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                return Err(cancelled(attempts));
            }
            attempts += 1;
            tracing::info!(attempt = attempts, "attempting to reconnect");

            let outcome = match token {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(cancelled(attempts)),
                    result = self.connect_with_retry() => result,
                },
                None => self.connect_with_retry().await,
            };

            match outcome {
                Ok(()) => {
                    tracing::info!(
                        attempts,
                        elapsed = ?start.elapsed(),
                        "reconnected successfully"
                    );
                    crate::metrics::counters::reconnect_finished(labels::OUTCOME_SUCCESS);
                    crate::metrics::histograms::reconnect_attempts(
                        labels::OUTCOME_SUCCESS,
                        attempts,
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempts,
                        error = %e,
                        retry_in = ?interval,
                        "reconnect attempt failed"
                    );
                    last_error = Some(e.to_string());
                }
            }

            match token {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(cancelled(attempts)),
                    _ = tokio::time::sleep(interval) => {}
                },
                None => tokio::time::sleep(interval).await,
            }

            if start.elapsed() >= timeout {
                break;
            }
        }

        tracing::error!(
            attempts,
            last_error = last_error.as_deref().unwrap_or(""),
            "failed to reconnect within {:?}",
            timeout
        );
        crate::metrics::counters::reconnect_finished(labels::OUTCOME_TIMEOUT);
        crate::metrics::histograms::reconnect_attempts(labels::OUTCOME_TIMEOUT, attempts);
        Err(Error::ReconnectTimeout {
            timeout,
            attempts,
            last_error,
        })
    }

    /// One reconnect attempt: open, ping, and only then replace the current handle
    async fn connect_with_retry(&mut self) -> Result<()> {
        let started = std::time::Instant::now();
        let mut handle = self.open().await?;

        if let Err(e) = self.connector.ping(&mut handle).await {
            crate::metrics::counters::connect_failed(labels::REASON_PING);
            return Err(Error::Ping(Box::new(e)));
        }

        crate::metrics::histograms::connect_duration(started.elapsed().as_millis() as u64);
        self.connection = Some(handle);
        Ok(())
    }

    async fn open(&self) -> Result<C::Handle> {
        crate::metrics::counters::connect_attempted();
        let descriptor = self.config.descriptor();

        match self.connector.open(&descriptor).await {
            Ok(handle) => {
                tracing::debug!(server = %self.config.target(), "connection opened");
                Ok(handle)
            }
            Err(e) => {
                crate::metrics::counters::connect_failed(e.category());
                Err(match e {
                    e @ Error::Connect { .. } => e,
                    other => Error::connect(self.config.target(), other),
                })
            }
        }
    }
}

fn cancelled(attempts: u32) -> Error {
    tracing::info!(attempts, "reconnect cancelled");
    crate::metrics::counters::reconnect_finished(labels::OUTCOME_CANCELLED);
    crate::metrics::histograms::reconnect_attempts(labels::OUTCOME_CANCELLED, attempts);
    Error::Cancelled { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Hands out numbered handles; each `open` pops the next scripted outcome
    #[derive(Default)]
    struct Script {
        opens: Mutex<VecDeque<bool>>,
        next_id: Mutex<u32>,
    }

    impl Script {
        fn new(opens: &[bool]) -> Self {
            Self {
                opens: Mutex::new(opens.iter().copied().collect()),
                next_id: Mutex::new(0),
            }
        }
    }

    impl Connector for Script {
        type Handle = u32;

        async fn open(&self, descriptor: &str) -> Result<u32> {
            assert!(descriptor.starts_with("host=localhost "));
            let ok = self.opens.lock().unwrap().pop_front().unwrap_or(false);
            if !ok {
                return Err(Error::ConnectionClosed);
            }
            let mut id = self.next_id.lock().unwrap();
            *id += 1;
            Ok(*id)
        }

        async fn ping(&self, _handle: &mut u32) -> Result<()> {
            Ok(())
        }

        async fn close(&self, _handle: u32) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig::builder("localhost", "app", "app")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_stores_returned_handle() {
        let mut manager = ConnectionManager::with_connector(config(), Script::new(&[true]));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        let handle = *manager.connect().await.unwrap();
        assert_eq!(manager.connection(), Some(&handle));
        assert_eq!(manager.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_previous_handle() {
        let mut manager =
            ConnectionManager::with_connector(config(), Script::new(&[true, false]));
        manager.connect().await.unwrap();

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
        assert!(err.to_string().contains("localhost:5432"));
        assert_eq!(manager.connection(), Some(&1));
    }

    #[tokio::test]
    async fn test_disconnect_clears_handle() {
        let mut manager = ConnectionManager::with_connector(config(), Script::new(&[true]));
        manager.connect().await.unwrap();
        manager.disconnect().await.unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        // no-op when already disconnected
        manager.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_without_connection() {
        let mut manager = ConnectionManager::with_connector(config(), Script::new(&[]));
        assert!(matches!(
            manager.ping().await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[test]
    fn test_default_policy_is_two_seconds() {
        assert_eq!(ReconnectPolicy::default().interval, Duration::from_secs(2));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = ConnectionConfig::builder("localhost", "app", "app")
            .password("hunter2")
            .build()
            .unwrap();
        let manager = ConnectionManager::new(config);
        let debug_str = format!("{:?}", manager);
        assert!(!debug_str.contains("hunter2"));
        assert!(debug_str.contains("Disconnected"));
    }
}
