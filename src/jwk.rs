use openssl::sha::sha256;
use serde::Serialize;
use thiserror::Error;

use crate::{base64, key_pair::KeyPair};

/// JWK derivation and serialization errors.
#[derive(Debug, Error)]
pub enum JwkError {
    #[error("Failed to convert key: {0}")]
    KeyConversion(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The public JSON Web Key of an RSA account key.
///
/// Field order matters: RFC 7638 thumbprints hash the JSON with members in
/// lexicographic order (`e`, `kty`, `n`), which is exactly the declaration
/// order here.
#[derive(Debug, Clone, Serialize)]
pub struct Jwk {
    e: String,
    kty: &'static str,
    n: String,
}

impl Jwk {
    /// Builds the JWK from the public half of a key pair.
    ///
    /// # Errors
    ///
    /// [`JwkError::KeyConversion`] when the key is not RSA.
    pub fn from_key_pair(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let rsa = key_pair
            .pri_key
            .rsa()
            .map_err(|e| JwkError::KeyConversion(e.to_string()))?;

        Ok(Jwk {
            e: base64::encode_url(rsa.e().to_vec()),
            kty: "RSA",
            n: base64::encode_url(rsa.n().to_vec()),
        })
    }

    /// Canonical JSON form, members in thumbprint order.
    pub fn to_json(&self) -> Result<String, JwkError> {
        Ok(serde_json::to_string(self)?)
    }

    /// SHA-256 digest of the canonical JSON, URL-safe Base64 encoded.
    pub fn thumbprint(&self) -> Result<String, JwkError> {
        let digest = sha256(self.to_json()?.as_bytes());
        Ok(base64::encode_url(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_order_is_canonical() {
        let key_pair = KeyPair::generate().unwrap();
        let json = key_pair.jwk().unwrap().to_json().unwrap();

        let e = json.find("\"e\"").unwrap();
        let kty = json.find("\"kty\"").unwrap();
        let n = json.find("\"n\"").unwrap();
        assert!(e < kty && kty < n);
        assert!(json.contains("\"kty\":\"RSA\""));
    }

    #[test]
    fn test_thumbprint_matches_manual_digest() {
        let key_pair = KeyPair::generate().unwrap();
        let jwk = key_pair.jwk().unwrap();

        let digest = sha256(jwk.to_json().unwrap().as_bytes());
        assert_eq!(jwk.thumbprint().unwrap(), base64::encode_url(digest));
    }
}
