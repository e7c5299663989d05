//! Request authentication
//!
//! Agent requests are authenticated twice: the pre-shared secret travels in
//! the [`SECRET_HEADER`](crate::SECRET_HEADER) header, and the serialized
//! parameter payload is signed with HMAC-SHA256 under the same secret. The
//! agent checks both before it decodes the command.
//!
//! Parameter payloads are signed over their canonical `serde_json`
//! serialization. Object keys serialize in sorted order, so both sides
//! derive the same bytes from the same JSON value regardless of the order
//! keys arrived in on the wire.

use std::fmt;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::ProtocolError;

type HmacSha256 = Hmac<Sha256>;

/// Computes and verifies parameter signatures with a pre-shared secret
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    /// Create a signer for the given shared secret
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, ProtocolError> {
        HmacSha256::new_from_slice(&self.key).map_err(|_| ProtocolError::InvalidKey)
    }

    /// Sign raw bytes, returning a lowercase hex digest
    pub fn sign_bytes(&self, payload: &[u8]) -> Result<String, ProtocolError> {
        let signature = self.mac()?.chain_update(payload).finalize();
        Ok(hex::encode(signature.into_bytes()))
    }

    /// Sign a parameter payload over its canonical serialization
    pub fn sign_params(&self, params: &Value) -> Result<String, ProtocolError> {
        let bytes = serde_json::to_vec(params)?;
        self.sign_bytes(&bytes)
    }

    /// Verify a hex signature over a parameter payload.
    ///
    /// The digest comparison is constant-time.
    pub fn verify_params(&self, params: &Value, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(bytes) = serde_json::to_vec(params) else {
            return false;
        };
        match self.mac() {
            Ok(mac) => mac.chain_update(&bytes).verify_slice(&expected).is_ok(),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").field("key", &"<redacted>").finish()
    }
}

/// Compare a presented secret against the expected one.
///
/// Uses constant-time comparison to prevent timing attacks.
pub fn validate_secret(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        return false;
    }

    let mut result = 0u8;
    for (a, b) in provided.bytes().zip(expected.bytes()) {
        result |= a ^ b;
    }
    result == 0
}
