//! Histogram metrics

use super::labels;
use metrics::histogram;

/// Wall time of a successful open + ping, in milliseconds
pub fn connect_duration(duration_ms: u64) {
    histogram!("pgconnector_connect_duration_ms").record(duration_ms as f64);
}

/// Number of attempts a reconnect loop made before finishing
pub fn reconnect_attempts(outcome: &'static str, attempts: u32) {
    histogram!("pgconnector_reconnect_attempts", labels::OUTCOME => outcome)
        .record(f64::from(attempts));
}

/// Time from startup to AuthenticationOk, in milliseconds
pub fn auth_duration(mechanism: &'static str, duration_ms: u64) {
    histogram!("pgconnector_auth_duration_ms", labels::MECHANISM => mechanism)
        .record(duration_ms as f64);
}
