//! Counter metrics

use super::labels;
use metrics::counter;

/// A connection attempt is starting
pub fn connect_attempted() {
    counter!("pgconnector_connect_attempts_total").increment(1);
}

/// A connection attempt (open or ping) failed
pub fn connect_failed(reason: &'static str) {
    counter!("pgconnector_connect_failures_total", labels::REASON => reason).increment(1);
}

/// A reconnect loop finished
pub fn reconnect_finished(outcome: &'static str) {
    counter!("pgconnector_reconnects_total", labels::OUTCOME => outcome).increment(1);
}

/// The server asked for credentials using `mechanism`
pub fn auth_attempted(mechanism: &'static str) {
    counter!("pgconnector_auth_attempts_total", labels::MECHANISM => mechanism).increment(1);
}

/// The server sent AuthenticationOk
pub fn auth_successful(mechanism: &'static str) {
    counter!("pgconnector_auth_successes_total", labels::MECHANISM => mechanism).increment(1);
}

/// Authentication did not complete
pub fn auth_failed(mechanism: &'static str, reason: &'static str) {
    counter!(
        "pgconnector_auth_failures_total",
        labels::MECHANISM => mechanism,
        labels::REASON => reason
    )
    .increment(1);
}
