//! Label keys and well-known label values

/// Label key for the authentication mechanism
pub const MECHANISM: &str = "mechanism";
/// Label key for a failure reason (an [`crate::Error::category`])
pub const REASON: &str = "reason";
/// Label key for the result of a reconnect loop
pub const OUTCOME: &str = "outcome";

/// No password exchange took place
pub const MECHANISM_TRUST: &str = "trust";
/// Cleartext password
pub const MECHANISM_CLEARTEXT: &str = "cleartext";
/// SCRAM-SHA-256
pub const MECHANISM_SCRAM: &str = "scram-sha-256";
/// MD5 password hash (always rejected)
pub const MECHANISM_MD5: &str = "md5";

/// A fresh connection opened but failed its ping
pub const REASON_PING: &str = "ping";
/// The server answered the login with an ErrorResponse
pub const REASON_SERVER_ERROR: &str = "server_error";
/// The server asked for a password and none is configured
pub const REASON_MISSING_PASSWORD: &str = "missing_password";
/// The server offered only mechanisms this client does not speak
pub const REASON_UNSUPPORTED_MECHANISM: &str = "unsupported_mechanism";
/// Bad nonce, malformed SCRAM message, or server signature mismatch
pub const REASON_SCRAM_EXCHANGE: &str = "scram_exchange";

/// Reconnect loop ended with a live connection
pub const OUTCOME_SUCCESS: &str = "success";
/// Reconnect loop ran out of time
pub const OUTCOME_TIMEOUT: &str = "timeout";
/// Reconnect loop stopped by its cancellation token
pub const OUTCOME_CANCELLED: &str = "cancelled";
