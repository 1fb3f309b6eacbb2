//! Connect with a JSON config, then keep the connection alive.
//!
//! ```bash
//! RUST_LOG=pgconnector=debug,reconnect=info cargo run --example reconnect -- pg.json
//! ```
//!
//! Every few seconds the connection is pinged; when a ping fails the manager
//! reconnects within a 30 second budget. Ctrl-C stops the demo, including in
//! the middle of a reconnect.

use pgconnector::{ConnectionManager, Error};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const RECONNECT_BUDGET: Duration = Duration::from_secs(30);
const PING_EVERY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .ok_or("usage: reconnect <config.json>")?;
    let mut manager = ConnectionManager::from_config_file(&path)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    match manager.connect().await {
        Ok(conn) => tracing::info!(server_version = ?conn.server_version(), "connected"),
        Err(e) => {
            tracing::warn!(error = %e, "initial connect failed");
            manager
                .reconnect_until_cancelled(RECONNECT_BUDGET, &shutdown)
                .await?;
        }
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(PING_EVERY) => {}
        }

        if let Err(e) = manager.ping().await {
            tracing::warn!(error = %e, "connection lost");
            match manager
                .reconnect_until_cancelled(RECONNECT_BUDGET, &shutdown)
                .await
            {
                Ok(()) => {}
                Err(Error::Cancelled { .. }) => break,
                Err(e) => return Err(e.into()),
            }
        }
    }

    manager.disconnect().await?;
    tracing::info!("bye");
    Ok(())
}
