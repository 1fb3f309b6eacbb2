//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677) as used by PostgreSQL 10+
//!
//! Channel binding is not offered: the GS2 header is always `n,,`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const GS2_HEADER: &str = "n,,";
const NONCE_BYTES: usize = 18;

/// SCRAM exchange failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScramError {
    /// Server message is malformed or out of order
    #[error("invalid server message: {0}")]
    InvalidServerMessage(String),

    /// Server signature did not match
    #[error("invalid server signature")]
    InvalidServerSignature,

    /// Server aborted the exchange with an `e=` attribute
    #[error("server rejected authentication: {0}")]
    ServerError(String),
}

#[derive(Debug)]
enum Stage {
    AwaitingServerFirst,
    AwaitingServerFinal { server_signature: Vec<u8> },
    Done,
}

/// Client side of one SCRAM-SHA-256 exchange
#[derive(Debug)]
pub struct ScramSha256 {
    username: String,
    password: String,
    client_nonce: String,
    stage: Stage,
}

impl ScramSha256 {
    /// Start an exchange with a fresh random nonce.
    ///
    /// PostgreSQL ignores the SCRAM username in favour of the startup `user`, so the
    /// connection passes an empty one.
    pub fn new(username: &str, password: &str) -> Self {
        let nonce: [u8; NONCE_BYTES] = rand::thread_rng().gen();
        Self::with_nonce(username, password, BASE64.encode(nonce))
    }

    pub(crate) fn with_nonce(username: &str, password: &str, client_nonce: String) -> Self {
        Self {
            username: escape_username(username),
            password: password.to_string(),
            client_nonce,
            stage: Stage::AwaitingServerFirst,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n={},r={}", self.username, self.client_nonce)
    }

    /// `client-first-message` for the SASLInitialResponse
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare())
    }

    /// Consume `server-first-message` and produce `client-final-message`
    pub fn handle_server_first(&mut self, server_first: &str) -> Result<String, ScramError> {
        if !matches!(self.stage, Stage::AwaitingServerFirst) {
            return Err(ScramError::InvalidServerMessage(
                "unexpected server-first-message".into(),
            ));
        }

        let attrs = ServerFirst::parse(server_first)?;
        if !attrs.nonce.starts_with(&self.client_nonce) || attrs.nonce == self.client_nonce {
            return Err(ScramError::InvalidServerMessage(
                "server nonce does not extend client nonce".into(),
            ));
        }

        let salt = BASE64
            .decode(attrs.salt)
            .map_err(|_| ScramError::InvalidServerMessage("invalid salt encoding".into()))?;

        let mut salted_password = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            attrs.iterations,
            &mut salted_password,
        );

        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);

        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), attrs.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac(&salted_password, b"Server Key");
        self.stage = Stage::AwaitingServerFinal {
            server_signature: hmac(&server_key, auth_message.as_bytes()),
        };

        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)))
    }

    /// Check `server-final-message`; the exchange is complete on success
    pub fn verify_server_final(&mut self, server_final: &str) -> Result<(), ScramError> {
        let expected = match &self.stage {
            Stage::AwaitingServerFinal { server_signature } => server_signature,
            _ => {
                return Err(ScramError::InvalidServerMessage(
                    "unexpected server-final-message".into(),
                ))
            }
        };

        if let Some(reason) = server_final.strip_prefix("e=") {
            return Err(ScramError::ServerError(reason.to_string()));
        }

        let encoded = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| ScramError::InvalidServerMessage("missing verifier".into()))?;
        let signature = BASE64
            .decode(encoded)
            .map_err(|_| ScramError::InvalidServerMessage("invalid verifier encoding".into()))?;

        if !constant_time_eq(&signature, expected) {
            return Err(ScramError::InvalidServerSignature);
        }

        self.stage = Stage::Done;
        Ok(())
    }

    /// Whether the server signature has been verified
    pub fn is_complete(&self) -> bool {
        matches!(self.stage, Stage::Done)
    }
}

/// Attributes of `server-first-message`: `r=<nonce>,s=<salt>,i=<iterations>`
struct ServerFirst<'a> {
    nonce: &'a str,
    salt: &'a str,
    iterations: u32,
}

impl<'a> ServerFirst<'a> {
    fn parse(msg: &'a str) -> Result<Self, ScramError> {
        if msg.starts_with("m=") {
            return Err(ScramError::InvalidServerMessage(
                "mandatory extensions are not supported".into(),
            ));
        }

        let (mut nonce, mut salt, mut iterations) = (None, None, None);
        for attr in msg.split(',') {
            if let Some(v) = attr.strip_prefix("r=") {
                nonce = Some(v);
            } else if let Some(v) = attr.strip_prefix("s=") {
                salt = Some(v);
            } else if let Some(v) = attr.strip_prefix("i=") {
                iterations = Some(v);
            }
        }

        let missing = |name: &str| {
            ScramError::InvalidServerMessage(format!("server-first-message lacks {}", name))
        };
        let iterations = iterations
            .ok_or_else(|| missing("iteration count"))?
            .parse::<u32>()
            .ok()
            .filter(|&i| i > 0)
            .ok_or_else(|| ScramError::InvalidServerMessage("invalid iteration count".into()))?;

        Ok(Self {
            nonce: nonce.filter(|n| !n.is_empty()).ok_or_else(|| missing("nonce"))?,
            salt: salt.filter(|s| !s.is_empty()).ok_or_else(|| missing("salt"))?,
            iterations,
        })
    }
}

/// RFC 5802 `saslname` escaping
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
