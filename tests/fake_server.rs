//! PgConnector and ConnectionManager against the in-process fake server

mod common;

use common::{FakeServer, Scenario, Stats};
use pgconnector::{
    ConnectionManager, ConnectionState, ConnectionStatus, Connector, Error, PgConnector,
    ReconnectPolicy,
};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_connect_with_trust_auth() {
    common::init_tracing();
    let server = FakeServer::start(Scenario::Trust).await;
    let mut manager = ConnectionManager::new(server.config());

    let conn = assert_ok!(manager.connect().await);
    assert_eq!(conn.state(), ConnectionState::Idle);
    assert_eq!(conn.process_id(), Some(1234));
    assert_eq!(conn.server_version(), Some("16.4"));
    assert!(!conn.is_tls());

    assert_eq!(manager.status(), ConnectionStatus::Connected);
    // sslmode=prefer: the server refused TLS and the session continued in plaintext
    assert_eq!(Stats::get(&server.stats.ssl_requests), 1);
    assert_eq!(
        server.stats.last_param("application_name").as_deref(),
        Some("pgconnector-tests")
    );
    assert_eq!(server.stats.last_param("user").as_deref(), Some("app"));
}

#[tokio::test]
async fn test_connect_with_cleartext_password() {
    let server = FakeServer::start(Scenario::Cleartext("s3cret pass".into())).await;
    let mut config = server.config();
    config.password = "s3cret pass".into();

    let mut manager = ConnectionManager::new(config);
    assert_ok!(manager.connect().await);
    assert_eq!(Stats::get(&server.stats.logins), 1);
}

#[tokio::test]
async fn test_wrong_password_surfaces_connect_error() {
    let server = FakeServer::start(Scenario::Cleartext("right".into())).await;
    let mut config = server.config();
    config.password = "wrong".into();

    let mut manager = ConnectionManager::new(config);
    let err = assert_err!(manager.connect().await);
    assert!(matches!(err, Error::Connect { .. }));
    assert!(err.to_string().contains("28P01"));
    assert!(!err.is_retriable());
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_sslmode_require_fails_when_server_refuses_tls() {
    let server = FakeServer::start(Scenario::Trust).await;
    let mut config = server.config();
    config.sslmode = "require".into();

    let mut manager = ConnectionManager::new(config);
    let err = assert_err!(manager.connect().await);
    assert!(err.to_string().contains("does not support TLS"));
    assert_eq!(Stats::get(&server.stats.logins), 0);
}

#[tokio::test]
async fn test_unreachable_host_leaves_state_unchanged() {
    let port = common::unused_port().await;
    let server = FakeServer::start(Scenario::Trust).await;
    let mut manager = ConnectionManager::new(server.config());
    assert_ok!(manager.connect().await);
    let pid_before = manager.connection().and_then(|c| c.process_id());

    // Same manager type, now aimed at a dead port
    let mut dead = ConnectionManager::new({
        let mut config = server.config();
        config.port = port.to_string();
        config
    });
    let err = assert_err!(dead.connect().await);
    assert!(matches!(err, Error::Connect { .. }));
    assert!(err.to_string().contains(&format!("127.0.0.1:{}", port)));
    assert!(dead.connection().is_none());

    assert_eq!(
        manager.connection().and_then(|c| c.process_id()),
        pid_before
    );
}

#[tokio::test]
async fn test_ping_and_disconnect() {
    let server = FakeServer::start(Scenario::Trust).await;
    let mut manager = ConnectionManager::new(server.config());
    assert_ok!(manager.connect().await);

    assert_ok!(manager.ping().await);
    assert_ok!(manager.ping().await);
    assert_eq!(Stats::get(&server.stats.pings), 2);

    assert_ok!(manager.disconnect().await);
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);

    // Terminate is processed asynchronously by the server task
    for _ in 0..50 {
        if Stats::get(&server.stats.terminates) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(Stats::get(&server.stats.terminates), 1);
}

#[tokio::test]
async fn test_failed_ping_drops_connection() {
    let server = FakeServer::start(Scenario::BrokenPing).await;
    let mut manager = ConnectionManager::new(server.config());
    assert_ok!(manager.connect().await);

    let err = assert_err!(manager.ping().await);
    assert!(matches!(err, Error::Ping(_)));
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_reconnect_succeeds_once_server_appears() {
    common::init_tracing();
    let port = common::unused_port().await;
    let config = pgconnector::ConnectionConfig::builder("127.0.0.1", "app", "app")
        .port(port.to_string())
        .sslmode("disable")
        .build()
        .unwrap();

    let mut manager = ConnectionManager::new(config)
        .with_policy(ReconnectPolicy::with_interval(Duration::from_millis(50)));

    let starter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        FakeServer::start_on(port, Scenario::Trust).await
    });

    assert_ok!(manager.reconnect_with_timeout(Duration::from_secs(10)).await);
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    let server = starter.await.unwrap();
    // open + ping of the winning attempt
    assert_eq!(Stats::get(&server.stats.pings), 1);
}

#[tokio::test]
async fn test_reconnect_times_out_on_broken_ping() {
    let server = FakeServer::start(Scenario::BrokenPing).await;
    let mut manager = ConnectionManager::new(server.config())
        .with_policy(ReconnectPolicy::with_interval(Duration::from_millis(20)));

    let err = assert_err!(
        manager
            .reconnect_with_timeout(Duration::from_millis(100))
            .await
    );
    match &err {
        Error::ReconnectTimeout {
            attempts,
            last_error,
            ..
        } => {
            assert!(*attempts >= 1);
            assert!(last_error.as_deref().unwrap_or("").contains("ping failed"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(err.to_string().contains("100ms"));
    assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    assert!(Stats::get(&server.stats.logins) >= 1);
}

#[tokio::test]
async fn test_connector_accepts_url_descriptor() {
    let server = FakeServer::start(Scenario::Trust).await;
    let url = format!(
        "postgres://app@127.0.0.1:{}/app?sslmode=disable&application_name=url-test",
        server.port()
    );

    let connector = PgConnector::new();
    let mut conn = assert_ok!(connector.open(&url).await);
    assert_ok!(connector.ping(&mut conn).await);
    assert_ok!(connector.close(conn).await);

    assert_eq!(Stats::get(&server.stats.ssl_requests), 0);
    assert_eq!(
        server.stats.last_param("application_name").as_deref(),
        Some("url-test")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_connect_over_unix_socket() {
    use std::sync::Arc;
    use tokio::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join(".s.PGSQL.5999");
    let listener = UnixListener::bind(&socket_path).unwrap();
    let stats = Arc::new(Stats::default());

    let server_stats = stats.clone();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let _ = common::serve(socket, Scenario::Trust, server_stats).await;
    });

    let config = pgconnector::ConnectionConfig::builder(
        dir.path().to_str().unwrap(),
        "app",
        "app",
    )
    .port("5999")
    .sslmode("require")
    .build()
    .unwrap();

    let mut manager = ConnectionManager::new(config);
    assert_ok!(manager.connect().await);
    assert_ok!(manager.ping().await);

    // TLS is never attempted over a local socket
    assert_eq!(Stats::get(&stats.ssl_requests), 0);
    assert_eq!(Stats::get(&stats.pings), 1);
}
