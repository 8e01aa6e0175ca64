use openssl::{
    error::ErrorStack,
    pkey::{PKey, Private},
    rsa::Rsa,
};
use thiserror::Error;

use crate::jwk::{Jwk, JwkError};

/// Key handling errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
    /// A persisted key that does not parse. Deliberately distinct from
    /// [`KeyError::OpenSsl`]: the caller must treat this as fatal rather than
    /// silently generating a replacement for a registered identity.
    #[error("stored key does not parse as a private key: {0}")]
    Malformed(ErrorStack),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// An RSA key pair.
///
/// Two distinct trust roles use this type: the account key that signs every
/// API request, and the certificate key that becomes the subject key of the
/// issued certificate. They are never the same key.
#[derive(Debug)]
pub struct KeyPair {
    pub pri_key: PKey<Private>,
}

impl KeyPair {
    /// Key size used for both account and certificate keys.
    pub const BITS: u32 = 2048;

    /// Generates a fresh 2048-bit RSA key pair.
    pub fn generate() -> Result<Self> {
        let rsa = Rsa::generate(Self::BITS)?;
        Ok(Self {
            pri_key: PKey::from_rsa(rsa)?,
        })
    }

    /// Parses a PEM-encoded private key.
    ///
    /// # Errors
    ///
    /// [`KeyError::Malformed`] when the bytes are not a valid private key.
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pem).map_err(KeyError::Malformed)?;
        Ok(Self { pri_key })
    }

    /// Serializes the private key as PKCS#8 PEM.
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    /// Derives the public JWK for this key.
    pub fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::from_key_pair(self)?)
    }

    /// SHA-256 thumbprint of the JWK, URL-safe Base64 encoded.
    ///
    /// Stable for the life of the key; an ingredient of every http-01
    /// key authorization.
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.jwk()?.thumbprint()?)
    }
}
