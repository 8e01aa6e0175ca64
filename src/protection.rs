use serde::Serialize;
use thiserror::Error;

use crate::{base64, jwk::Jwk};

/// Errors raised while building the JWS protected header.
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, ProtectionError>;

/// How a signed request identifies its signer.
///
/// The raw public key is used exactly once per run, for the account
/// creation/lookup call before any account URL exists. Every later request
/// signs with the account URL as `kid`.
#[derive(Debug, Clone, Copy)]
pub enum Identity<'a> {
    /// Embed the public JWK (`newAccount` only).
    PublicKey(&'a Jwk),
    /// Reference the established account by its URL.
    KeyId(&'a str),
}

/// The JWS protected header: `{alg, nonce, url, jwk-or-kid}`.
///
/// Exactly one of `jwk` and `kid` is serialized, depending on the
/// [`Identity`] it was built from.
#[derive(Debug, Serialize)]
pub struct ProtectedHeader<'a> {
    alg: &'static str,
    nonce: &'a str,
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<&'a Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
}

impl<'a> ProtectedHeader<'a> {
    /// Builds the header for one request. Only RS256 is spoken.
    pub fn new(nonce: &'a str, url: &'a str, identity: Identity<'a>) -> Self {
        let (jwk, kid) = match identity {
            Identity::PublicKey(jwk) => (Some(jwk), None),
            Identity::KeyId(kid) => (None, Some(kid)),
        };

        ProtectedHeader {
            alg: "RS256",
            nonce,
            url,
            jwk,
            kid,
        }
    }

    /// Serializes and encodes the header as a URL-safe JWS segment.
    ///
    /// # Errors
    ///
    /// [`ProtectionError::Serialization`] on JSON failure.
    pub fn to_base64url(&self) -> Result<String> {
        Ok(base64::encode_url(serde_json::to_string(self)?.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pair::KeyPair;

    #[test]
    fn test_jwk_identity_omits_kid() {
        let key_pair = KeyPair::generate().unwrap();
        let jwk = key_pair.jwk().unwrap();

        let header = ProtectedHeader::new("nonce-1", "https://ca.test/new-acct", Identity::PublicKey(&jwk));
        let json = serde_json::to_string(&header).unwrap();

        assert!(json.contains("\"jwk\""));
        assert!(!json.contains("\"kid\""));
        assert!(json.contains("\"alg\":\"RS256\""));
        assert!(json.contains("\"nonce\":\"nonce-1\""));
        assert!(json.contains("\"url\":\"https://ca.test/new-acct\""));
    }

    #[test]
    fn test_kid_identity_omits_jwk() {
        let header = ProtectedHeader::new(
            "nonce-2",
            "https://ca.test/order",
            Identity::KeyId("https://ca.test/acct/17"),
        );
        let json = serde_json::to_string(&header).unwrap();

        assert!(!json.contains("\"jwk\""));
        assert!(json.contains("\"kid\":\"https://ca.test/acct/17\""));
    }
}
