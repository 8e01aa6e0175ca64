//! Certificate signing request generation.
//!
//! Every order gets a fresh certificate key; the CSR carries the first
//! identifier as the common name and every identifier as a DNS SAN.

use std::string::FromUtf8Error;

use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    x509::{extension::SubjectAlternativeName, X509Name, X509Req, X509ReqBuilder},
};
use thiserror::Error;

use crate::{
    base64,
    key_pair::{KeyError, KeyPair},
    payload::Identifier,
};

#[derive(Debug, Error)]
pub enum CsrError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
    #[error("a certificate request needs at least one name")]
    NoSanEntries,
    #[error("csr format mismatch")]
    FormatMismatch,
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] FromUtf8Error),
}

type Result<T> = std::result::Result<T, CsrError>;

/// CSR builder. Entries keep insertion order; the first becomes the CN.
#[derive(Debug, Default)]
pub struct Csr {
    san_entries: Vec<String>,
}

impl Csr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dns_name(mut self, name: impl Into<String>) -> Self {
        self.san_entries.push(name.into());
        self
    }

    /// Builds and signs the request with `key_pair`.
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        let first = self.san_entries.first().ok_or(CsrError::NoSanEntries)?;

        let mut name_builder = X509Name::builder()?;
        name_builder.append_entry_by_nid(Nid::COMMONNAME, first)?;
        let subject = name_builder.build();

        let mut req_builder = X509ReqBuilder::new()?;
        req_builder.set_subject_name(&subject)?;

        let mut san = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san.dns(entry);
        }
        let san = san.build(&req_builder.x509v3_context(None))?;

        let mut extensions = openssl::stack::Stack::new()?;
        extensions.push(san)?;
        req_builder.add_extensions(&extensions)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }
}

/// Extracts the DER payload of a PEM request and re-encodes it URL-safe.
///
/// The PEM armor is pattern-matched rather than trusted: anything that is not
/// a single well-formed request block is [`CsrError::FormatMismatch`].
pub fn pem_to_base64url(pem: &str) -> Result<String> {
    let mut body = String::new();
    let mut inside = false;
    let mut seen = false;

    for line in pem.lines() {
        let line = line.trim();
        if line == "-----BEGIN CERTIFICATE REQUEST-----" {
            if seen {
                return Err(CsrError::FormatMismatch);
            }
            inside = true;
            seen = true;
        } else if line == "-----END CERTIFICATE REQUEST-----" {
            if !inside {
                return Err(CsrError::FormatMismatch);
            }
            inside = false;
        } else if inside {
            body.push_str(line);
        }
    }

    if !seen || inside || body.is_empty() {
        return Err(CsrError::FormatMismatch);
    }

    let der = base64::decode_standard(&body).map_err(|_| CsrError::FormatMismatch)?;
    Ok(base64::encode_url(der))
}

/// A fresh certificate key plus the URL-safe CSR derived from it.
#[derive(Debug)]
pub struct CertificateRequest {
    pub key_pair: KeyPair,
    /// URL-safe Base64 of the DER request, ready for the finalize payload.
    pub csr: String,
}

/// Generates a new certificate key and the CSR covering `identifiers`.
pub fn generate(identifiers: &[Identifier]) -> Result<CertificateRequest> {
    let key_pair = KeyPair::generate()?;

    let mut builder = Csr::new();
    for identifier in identifiers {
        builder = builder.add_dns_name(identifier.value.clone());
    }

    let req = builder.build(&key_pair)?;
    let pem = String::from_utf8(req.to_pem()?)?;
    let csr = pem_to_base64url(&pem)?;

    Ok(CertificateRequest { key_pair, csr })
}
