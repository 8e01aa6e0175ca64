use openssl::{hash::MessageDigest, sign::Signer};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// Signing failures.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing error: {0}")]
    Signing(String),
}

/// Signs the JWS signing input (`protected "." payload`) with RSA-SHA256.
///
/// The input is passed as the already-joined string so that an empty payload
/// segment (POST-as-GET) signs exactly `"<protected>."`.
///
/// # Errors
///
/// [`SignatureError::Signing`] when OpenSSL rejects the key or the update.
pub fn sign_rs256(signing_input: &str, key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
    let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)
        .map_err(|e| SignatureError::Signing(e.to_string()))?;

    signer
        .update(signing_input.as_bytes())
        .map_err(|e| SignatureError::Signing(e.to_string()))?;

    signer
        .sign_to_vec()
        .map_err(|e| SignatureError::Signing(e.to_string()))
}
