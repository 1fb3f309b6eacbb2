//! Core connection type

use super::state::ConnectionState;
use super::tls::{SslMode, TlsConfig};
use super::transport::Transport;
use crate::auth::ScramSha256;
use crate::metrics::labels;
use crate::protocol::constants::{PING_QUERY, PROTOCOL_VERSION, SCRAM_SHA_256};
use crate::protocol::{
    decode_message, encode_message, AuthenticationMessage, BackendMessage, FrontendMessage,
};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Parameters sent in the startup packet plus the credentials used to authenticate
#[derive(Clone)]
pub struct StartupParams {
    /// Role to log in as
    pub user: String,
    /// Database name
    pub database: String,
    /// Password, if the server asks for one
    pub password: Option<String>,
    /// Reported as `application_name` in `pg_stat_activity`
    pub application_name: Option<String>,
}

impl std::fmt::Debug for StartupParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupParams")
            .field("user", &self.user)
            .field("database", &self.database)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("application_name", &self.application_name)
            .finish()
    }
}

/// Postgres connection
pub struct Connection {
    transport: Option<Transport>,
    state: ConnectionState,
    read_buf: BytesMut,
    process_id: Option<i32>,
    server_version: Option<String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .field("state", &self.state)
            .field("process_id", &self.process_id)
            .field("server_version", &self.server_version)
            .finish()
    }
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Some(transport),
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            process_id: None,
            server_version: None,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection can no longer be used
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Backend process ID reported during startup
    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    /// `server_version` parameter reported during startup
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    /// Whether the transport is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    /// Negotiate TLS upgrade via SSLRequest.
    ///
    /// Returns `Ok(false)` when the server refused and `sslmode` allows plaintext.
    async fn negotiate_tls(&mut self, tls_config: &TlsConfig, hostname: &str) -> Result<bool> {
        self.state.transition(ConnectionState::NegotiatingTls)?;
        self.send_message(&FrontendMessage::SslRequest).await?;

        // The reply is a single unframed byte
        while self.read_buf.is_empty() {
            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
        let response = self.read_buf.get_u8();

        match response {
            b'S' => {
                if !self.read_buf.is_empty() {
                    return Err(Error::Protocol(
                        "server sent unencrypted data after accepting TLS".into(),
                    ));
                }
                tracing::debug!("server accepted TLS, upgrading connection");
                let transport = self.transport.take().ok_or(Error::ConnectionClosed)?;
                self.transport = Some(transport.upgrade_to_tls(tls_config, hostname).await?);
                tracing::debug!(mode = %tls_config.mode(), "TLS established");
                Ok(true)
            }
            b'N' if !tls_config.mode().requires_tls() => {
                tracing::debug!("server refused TLS, continuing in plaintext");
                Ok(false)
            }
            b'N' => Err(Error::Tls(format!(
                "server does not support TLS (sslmode={})",
                tls_config.mode()
            ))),
            other => Err(Error::Protocol(format!(
                "unexpected SSLRequest response byte: 0x{:02X}",
                other
            ))),
        }
    }

    /// Perform TLS negotiation (if requested), startup and authentication.
    ///
    /// On success the connection is [`ConnectionState::Idle`]. On failure it is
    /// [`ConnectionState::Closed`] and should be dropped.
    pub async fn startup(
        &mut self,
        params: &StartupParams,
        tls: Option<(&TlsConfig, &str)>,
    ) -> Result<()> {
        let result: Result<()> = async {
            if let Some((tls_config, hostname)) = tls {
                if tls_config.mode() != SslMode::Disable {
                    self.negotiate_tls(tls_config, hostname).await?;
                }
            }

            self.state.transition(ConnectionState::AwaitingAuth)?;

            let mut startup = vec![
                ("user".to_string(), params.user.clone()),
                ("database".to_string(), params.database.clone()),
            ];
            if let Some(app_name) = &params.application_name {
                startup.push(("application_name".to_string(), app_name.clone()));
            }
            self.send_message(&FrontendMessage::Startup {
                version: PROTOCOL_VERSION,
                params: startup,
            })
            .await?;

            self.state.transition(ConnectionState::Authenticating)?;
            self.authenticate(params).await?;

            self.state.transition(ConnectionState::Idle)?;
            tracing::debug!(process_id = ?self.process_id, "startup complete");
            Ok(())
        }
        .instrument(tracing::info_span!(
            "startup",
            user = %params.user,
            database = %params.database
        ))
        .await;

        if result.is_err() {
            self.state = ConnectionState::Closed;
        }
        result
    }

    /// Run the authentication exchange up to ReadyForQuery
    async fn authenticate(&mut self, params: &StartupParams) -> Result<()> {
        let auth_start = Instant::now();
        let mut mechanism = labels::MECHANISM_TRUST;

        loop {
            match self.receive_message().await? {
                BackendMessage::Authentication(auth) => match auth {
                    AuthenticationMessage::Ok => {
                        tracing::debug!(mechanism, "authentication successful");
                        crate::metrics::counters::auth_successful(mechanism);
                        crate::metrics::histograms::auth_duration(
                            mechanism,
                            auth_start.elapsed().as_millis() as u64,
                        );
                        // ReadyForQuery still to come
                    }
                    AuthenticationMessage::CleartextPassword => {
                        mechanism = labels::MECHANISM_CLEARTEXT;
                        crate::metrics::counters::auth_attempted(mechanism);
                        let password = required_password(params).map_err(|e| {
                            auth_failure(mechanism, labels::REASON_MISSING_PASSWORD, e)
                        })?;
                        self.send_message(&FrontendMessage::Password(password.to_string()))
                            .await?;
                    }
                    AuthenticationMessage::Md5Password { .. } => {
                        mechanism = labels::MECHANISM_MD5;
                        crate::metrics::counters::auth_attempted(mechanism);
                        return Err(auth_failure(
                            mechanism,
                            labels::REASON_UNSUPPORTED_MECHANISM,
                            Error::Authentication(
                                "MD5 authentication is not supported; use SCRAM-SHA-256 or cleartext"
                                    .into(),
                            ),
                        ));
                    }
                    AuthenticationMessage::Sasl { mechanisms } => {
                        mechanism = labels::MECHANISM_SCRAM;
                        crate::metrics::counters::auth_attempted(mechanism);
                        self.authenticate_scram(&mechanisms, params).await?;
                    }
                    AuthenticationMessage::SaslContinue { .. }
                    | AuthenticationMessage::SaslFinal { .. } => {
                        return Err(Error::Protocol(
                            "SASL message outside of a SASL exchange".into(),
                        ));
                    }
                },
                BackendMessage::BackendKeyData { process_id, .. } => {
                    self.process_id = Some(process_id);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::trace!(%name, %value, "parameter status");
                    if name == "server_version" {
                        self.server_version = Some(value);
                    }
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!(%notice, "notice during startup");
                }
                BackendMessage::ReadyForQuery { .. } => return Ok(()),
                BackendMessage::ErrorResponse(err) => {
                    return Err(auth_failure(
                        mechanism,
                        labels::REASON_SERVER_ERROR,
                        Error::Authentication(err.to_string()),
                    ));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during startup: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// SCRAM-SHA-256 exchange (RFC 7677)
    async fn authenticate_scram(
        &mut self,
        mechanisms: &[String],
        params: &StartupParams,
    ) -> Result<()> {
        const MECHANISM: &str = labels::MECHANISM_SCRAM;

        if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
            return Err(auth_failure(
                MECHANISM,
                labels::REASON_UNSUPPORTED_MECHANISM,
                Error::Authentication(format!(
                    "server offers no supported SASL mechanism: {}",
                    mechanisms.join(", ")
                )),
            ));
        }

        let password = required_password(params)
            .map_err(|e| auth_failure(MECHANISM, labels::REASON_MISSING_PASSWORD, e))?;
        let mut scram = ScramSha256::new("", password);

        self.send_message(&FrontendMessage::SaslInitialResponse {
            mechanism: SCRAM_SHA_256.to_string(),
            data: scram.client_first().into_bytes(),
        })
        .await?;

        let server_first = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslContinue { data }) => data,
            BackendMessage::ErrorResponse(err) => {
                return Err(auth_failure(
                    MECHANISM,
                    labels::REASON_SERVER_ERROR,
                    Error::Authentication(err.to_string()),
                ));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected SASLContinue, got {:?}",
                    other
                )));
            }
        };
        let server_first = String::from_utf8(server_first)
            .map_err(|_| scram_failure("server-first-message is not UTF-8"))?;

        let client_final = scram
            .handle_server_first(&server_first)
            .map_err(scram_failure)?;
        self.send_message(&FrontendMessage::SaslResponse(client_final.into_bytes()))
            .await?;

        let server_final = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslFinal { data }) => data,
            BackendMessage::ErrorResponse(err) => {
                return Err(auth_failure(
                    MECHANISM,
                    labels::REASON_SERVER_ERROR,
                    Error::Authentication(err.to_string()),
                ));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected SASLFinal, got {:?}",
                    other
                )));
            }
        };
        let server_final = String::from_utf8(server_final)
            .map_err(|_| scram_failure("server-final-message is not UTF-8"))?;

        scram
            .verify_server_final(&server_final)
            .map_err(scram_failure)?;

        tracing::debug!("SCRAM-SHA-256 server signature verified");
        Ok(())
    }

    /// Liveness check: run an empty statement and wait for ReadyForQuery.
    ///
    /// Returns the round-trip time. Any I/O or protocol failure closes the connection.
    pub async fn ping(&mut self) -> Result<Duration> {
        if self.state != ConnectionState::Idle {
            return Err(Error::InvalidState {
                expected: ConnectionState::Idle.to_string(),
                actual: self.state.to_string(),
            });
        }

        let start = Instant::now();
        self.state.transition(ConnectionState::Busy)?;

        match self.ping_exchange().await {
            Ok(()) => {
                self.state.transition(ConnectionState::Idle)?;
                Ok(start.elapsed())
            }
            // The server already sent ReadyForQuery: the session is still usable
            Err(err @ Error::Server(_)) => {
                self.state.transition(ConnectionState::Idle)?;
                Err(err)
            }
            Err(err) => {
                self.state = ConnectionState::Closed;
                Err(err)
            }
        }
    }

    async fn ping_exchange(&mut self) -> Result<()> {
        self.send_message(&FrontendMessage::Query(PING_QUERY.to_string()))
            .await?;

        let mut server_error = None;
        loop {
            match self.receive_message().await? {
                BackendMessage::EmptyQueryResponse
                | BackendMessage::CommandComplete(_)
                | BackendMessage::ParameterStatus { .. }
                | BackendMessage::Other { .. } => {}
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!(%notice, "notice during ping");
                }
                BackendMessage::ErrorResponse(err) => server_error = Some(err),
                BackendMessage::ReadyForQuery { .. } => break,
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during ping: {:?}",
                        other
                    )));
                }
            }
        }

        match server_error {
            Some(err) => Err(Error::Server(err.to_string())),
            None => Ok(()),
        }
    }

    fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.transport.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Send a frontend message
    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode_message(msg);
        self.transport_mut()?.send(&buf).await
    }

    /// Receive a backend message
    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            if let Some((msg, consumed)) = decode_message(&self.read_buf)? {
                self.read_buf.advance(consumed);
                return Ok(msg);
            }

            let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
            let n = transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Send Terminate and shut the transport down
    pub async fn close(mut self) -> Result<()> {
        let was_usable = self.state != ConnectionState::Closed;
        self.state = ConnectionState::Closed;
        if was_usable {
            let _ = self.send_message(&FrontendMessage::Terminate).await;
        }
        match self.transport.as_mut() {
            Some(transport) => transport.shutdown().await,
            None => Ok(()),
        }
    }
}

/// Count a failed login and hand the error back
fn auth_failure(mechanism: &'static str, reason: &'static str, err: Error) -> Error {
    tracing::debug!(mechanism, reason, error = %err, "authentication failed");
    crate::metrics::counters::auth_failed(mechanism, reason);
    err
}

fn scram_failure(reason: impl std::fmt::Display) -> Error {
    auth_failure(
        labels::MECHANISM_SCRAM,
        labels::REASON_SCRAM_EXCHANGE,
        Error::Authentication(reason.to_string()),
    )
}

fn required_password(params: &StartupParams) -> Result<&str> {
    params
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::Authentication("server requested a password but none is configured".into()))
}
