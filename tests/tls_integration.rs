//! Integration tests for TLS encryption
//!
//! These tests verify `sslmode` handling end-to-end against a PostgreSQL server
//! with `ssl = on`. To run them locally:
//!
//! ```bash
//! # Self-signed server certificate is fine for require / prefer
//! export TLS_TEST_HOST="localhost"
//! export TLS_TEST_PORT="5432"
//! export TLS_TEST_USER="postgres"
//! export TLS_TEST_PASSWORD="postgres"
//! # Set when the server certificate chains to a public or platform root
//! export TLS_TEST_TRUSTED_CERT="true"
//!
//! cargo test --test tls_integration -- --ignored --nocapture
//! ```

#[cfg(test)]
mod tls_integration {
    use pgconnector::{ConnectionConfig, ConnectionManager, Error};
    use std::env;

    /// Config for the TLS test server with the given `sslmode`
    fn tls_test_config(sslmode: &str) -> Option<ConnectionConfig> {
        let host = env::var("TLS_TEST_HOST").ok()?;
        let port = env::var("TLS_TEST_PORT").unwrap_or_else(|_| "5432".into());
        let user = env::var("TLS_TEST_USER").unwrap_or_else(|_| "postgres".into());
        let password = env::var("TLS_TEST_PASSWORD").unwrap_or_default();

        ConnectionConfig::builder(host, &user, &user)
            .port(port)
            .password(password)
            .sslmode(sslmode)
            .build()
            .ok()
    }

    fn trusted_cert() -> bool {
        env::var("TLS_TEST_TRUSTED_CERT")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL with TLS enabled
    async fn test_require_encrypts_connection() {
        let Some(config) = tls_test_config("require") else {
            eprintln!("Skipping test: TLS_TEST_HOST not set");
            return;
        };

        let mut manager = ConnectionManager::new(config);
        let conn = manager.connect().await.expect("TLS connect");
        assert!(conn.is_tls(), "sslmode=require must encrypt");
        manager.ping().await.expect("ping over TLS");
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL with TLS enabled
    async fn test_prefer_uses_tls_when_offered() {
        let Some(config) = tls_test_config("prefer") else {
            eprintln!("Skipping test: TLS_TEST_HOST not set");
            return;
        };

        let mut manager = ConnectionManager::new(config);
        let conn = manager.connect().await.expect("connect");
        assert!(conn.is_tls());
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL with TLS enabled
    async fn test_disable_stays_plaintext() {
        let Some(config) = tls_test_config("disable") else {
            eprintln!("Skipping test: TLS_TEST_HOST not set");
            return;
        };

        let mut manager = ConnectionManager::new(config);
        match manager.connect().await {
            Ok(conn) => assert!(!conn.is_tls()),
            // pg_hba.conf may only allow hostssl
            Err(e) => eprintln!("Note: plaintext connection rejected: {}", e),
        }
    }

    #[tokio::test]
    #[ignore] // Requires PostgreSQL with TLS enabled
    async fn test_verify_full_depends_on_trusted_chain() {
        let Some(config) = tls_test_config("verify-full") else {
            eprintln!("Skipping test: TLS_TEST_HOST not set");
            return;
        };

        let mut manager = ConnectionManager::new(config);
        let result = manager.connect().await;
        if trusted_cert() {
            assert!(result.expect("verify-full connect").is_tls());
        } else {
            let err = result.expect_err("self-signed certificate must be rejected");
            match err {
                Error::Connect { source, .. } => assert!(matches!(*source, Error::Tls(_))),
                other => panic!("expected TLS failure, got {other:?}"),
            }
        }
    }
}
