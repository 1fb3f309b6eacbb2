//! Connection management
//!
//! This module handles:
//! * Transport abstraction (TCP, TLS, Unix socket)
//! * Connection lifecycle (startup, auth, ping, close)
//! * State machine enforcement
//! * TLS configuration per `sslmode`

mod conn;
mod state;
mod tls;
mod transport;

pub use conn::{Connection, StartupParams};
pub use state::ConnectionState;
pub use tls::{SslMode, TlsConfig};
pub use transport::Transport;
