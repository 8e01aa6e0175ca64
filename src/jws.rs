//! Assembly of the three-part JSON Web Signature carried as the body of
//! every authenticated ACME request.

use serde::Serialize;
use thiserror::Error;

use crate::{
    base64,
    key_pair::KeyPair,
    protection::{ProtectedHeader, ProtectionError},
    signature::{sign_rs256, SignatureError},
};

/// JWS construction errors.
#[derive(Debug, Error)]
pub enum JwsError {
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, JwsError>;

/// A signed request body: protected header, payload and signature, each a
/// URL-safe Base64 segment.
#[derive(Debug, Serialize)]
pub struct Jws {
    protected: String,
    payload: String,
    signature: String,
}

impl Jws {
    /// Signs `payload_b64url` under the given protected header.
    ///
    /// `payload_b64url` is already a Base64 segment; the empty string is a
    /// legal value and produces a POST-as-GET body, which is different from
    /// the encoding of an empty JSON object.
    pub fn sign(header: &ProtectedHeader, payload_b64url: &str, key_pair: &KeyPair) -> Result<Self> {
        let protected = header.to_base64url()?;
        let signing_input = format!("{protected}.{payload_b64url}");
        let signature = base64::encode_url(sign_rs256(&signing_input, key_pair)?);

        Ok(Jws {
            protected,
            payload: payload_b64url.to_string(),
            signature,
        })
    }

    /// Serializes to the `application/jose+json` request body.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
