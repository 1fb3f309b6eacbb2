//! In-process PostgreSQL stand-in for integration tests
//!
//! Speaks just enough of the v3 protocol for pgconnector: SSLRequest (always
//! refused), startup, trust or cleartext authentication, the empty-query ping
//! and Terminate.

#![allow(dead_code)]

use pgconnector::ConnectionConfig;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const SSL_REQUEST_CODE: i32 = 80877103;

/// How the fake server treats each session
#[derive(Debug, Clone)]
pub enum Scenario {
    /// Accept every login
    Trust,
    /// Ask for a cleartext password and compare it
    Cleartext(String),
    /// Reject every login with SQLSTATE 28000
    RejectAuth,
    /// Log in, then hang up when the ping arrives
    BrokenPing,
}

/// Counters shared between the server tasks and the test
#[derive(Debug, Default)]
pub struct Stats {
    pub accepted: AtomicUsize,
    pub ssl_requests: AtomicUsize,
    pub logins: AtomicUsize,
    pub pings: AtomicUsize,
    pub terminates: AtomicUsize,
    pub startup_params: Mutex<Vec<Vec<(String, String)>>>,
}

impl Stats {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Value of `key` in the most recent startup packet
    pub fn last_param(&self, key: &str) -> Option<String> {
        let params = self.startup_params.lock().unwrap();
        params
            .last()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }
}

pub struct FakeServer {
    pub addr: SocketAddr,
    pub stats: Arc<Stats>,
    task: JoinHandle<()>,
}

impl FakeServer {
    /// Listen on an ephemeral loopback port
    pub async fn start(scenario: Scenario) -> Self {
        Self::start_on(0, scenario).await
    }

    /// Listen on a specific loopback port
    pub async fn start_on(port: u16, scenario: Scenario) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(Stats::default());

        let task = tokio::spawn({
            let stats = stats.clone();
            async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    stats.accepted.fetch_add(1, Ordering::SeqCst);
                    let scenario = scenario.clone();
                    let stats = stats.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, scenario, stats).await;
                    });
                }
            }
        });

        Self { addr, stats, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Config pointing at this server
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::builder("127.0.0.1", "app", "app")
            .port(self.port().to_string())
            .application_name("pgconnector-tests")
            .build()
            .unwrap()
    }

    /// Stop accepting new connections
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve one session on an already-accepted stream
pub async fn serve<S>(mut socket: S, scenario: Scenario, stats: Arc<Stats>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let params = loop {
        let len = socket.read_i32().await? as usize;
        let mut body = vec![0u8; len.saturating_sub(4)];
        socket.read_exact(&mut body).await?;
        let code = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        if code == SSL_REQUEST_CODE {
            stats.ssl_requests.fetch_add(1, Ordering::SeqCst);
            socket.write_all(b"N").await?;
            continue;
        }
        break parse_params(&body[4..]);
    };
    stats.startup_params.lock().unwrap().push(params);

    match &scenario {
        Scenario::RejectAuth => {
            socket
                .write_all(&error_response("28000", "role \"app\" is not permitted to log in"))
                .await?;
            return Ok(());
        }
        Scenario::Cleartext(expected) => {
            socket.write_all(&frame(b'R', &3i32.to_be_bytes())).await?;
            let (tag, body) = read_frame(&mut socket).await?;
            let supplied = body.strip_suffix(b"\0").unwrap_or(&body);
            if tag != b'p' || supplied != expected.as_bytes() {
                socket
                    .write_all(&error_response(
                        "28P01",
                        "password authentication failed for user \"app\"",
                    ))
                    .await?;
                return Ok(());
            }
        }
        Scenario::Trust | Scenario::BrokenPing => {}
    }

    let mut reply = frame(b'R', &0i32.to_be_bytes());
    reply.extend(frame(b'S', b"server_version\x0016.4\0"));
    let mut key_data = 1234i32.to_be_bytes().to_vec();
    key_data.extend_from_slice(&5678i32.to_be_bytes());
    reply.extend(frame(b'K', &key_data));
    reply.extend(frame(b'Z', b"I"));
    socket.write_all(&reply).await?;
    stats.logins.fetch_add(1, Ordering::SeqCst);

    loop {
        let (tag, _body) = read_frame(&mut socket).await?;
        match tag {
            b'Q' if matches!(scenario, Scenario::BrokenPing) => return Ok(()),
            b'Q' => {
                stats.pings.fetch_add(1, Ordering::SeqCst);
                let mut reply = frame(b'I', b"");
                reply.extend(frame(b'Z', b"I"));
                socket.write_all(&reply).await?;
            }
            b'X' => {
                stats.terminates.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            _ => return Ok(()),
        }
    }
}

async fn read_frame<S: AsyncRead + Unpin>(socket: &mut S) -> io::Result<(u8, Vec<u8>)> {
    let tag = socket.read_u8().await?;
    let len = socket.read_i32().await? as usize;
    let mut body = vec![0u8; len.saturating_sub(4)];
    socket.read_exact(&mut body).await?;
    Ok((tag, body))
}

fn parse_params(body: &[u8]) -> Vec<(String, String)> {
    let mut fields = body
        .split(|b| *b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned());
    let mut params = Vec::new();
    while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
        if key.is_empty() {
            break;
        }
        params.push((key, value));
    }
    params
}

pub fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn error_response(code: &str, message: &str) -> Vec<u8> {
    let body = format!("SFATAL\0C{}\0M{}\0\0", code, message);
    frame(b'E', body.as_bytes())
}

/// Port with nothing listening on it
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Send `tracing` output to the test harness; `RUST_LOG` selects levels
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
