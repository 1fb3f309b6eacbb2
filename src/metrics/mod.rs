//! Metrics emitted through the `metrics` facade.
//!
//! Nothing is recorded unless the application installs a recorder
//! (for example `metrics-exporter-prometheus`).
//!
//! | Name | Kind | Labels |
//! |------|------|--------|
//! | `pgconnector_connect_attempts_total` | counter | |
//! | `pgconnector_connect_failures_total` | counter | `reason` |
//! | `pgconnector_connect_duration_ms` | histogram | |
//! | `pgconnector_reconnects_total` | counter | `outcome` |
//! | `pgconnector_reconnect_attempts` | histogram | `outcome` |
//! | `pgconnector_auth_attempts_total` | counter | `mechanism` |
//! | `pgconnector_auth_successes_total` | counter | `mechanism` |
//! | `pgconnector_auth_failures_total` | counter | `mechanism`, `reason` |
//! | `pgconnector_auth_duration_ms` | histogram | `mechanism` |

pub mod counters;
pub mod histograms;
pub mod labels;

#[cfg(test)]
pub(crate) mod testing;
