//! Inspection of an issued certificate: its names, its key, its remaining
//! lifetime.

use chrono::Utc;
use openssl::{asn1::Asn1Time, error::ErrorStack, x509::X509};
use thiserror::Error;

use crate::key_pair::{KeyError, KeyPair};

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
    #[error("certificate format mismatch")]
    FormatMismatch,
    #[error("certificate carries no usable DNS names")]
    NoDnsNames,
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

type Result<T> = std::result::Result<T, CertificateError>;

/// The leaf certificate of an issued chain.
#[derive(Debug)]
pub struct Certificate {
    cert: X509,
    pem: String,
}

impl Certificate {
    /// Parses the first certificate block of a PEM chain.
    ///
    /// The armor is pattern-matched: anything without a well-formed
    /// certificate block is [`CertificateError::FormatMismatch`].
    pub fn from_pem(pem: &str) -> Result<Self> {
        let begin = pem
            .find("-----BEGIN CERTIFICATE-----")
            .ok_or(CertificateError::FormatMismatch)?;
        let end_marker = "-----END CERTIFICATE-----";
        let end = pem[begin..]
            .find(end_marker)
            .ok_or(CertificateError::FormatMismatch)?;

        let leaf = &pem[begin..begin + end + end_marker.len()];
        let cert = X509::from_pem(leaf.as_bytes())
            .map_err(|_| CertificateError::FormatMismatch)?;

        Ok(Self {
            cert,
            pem: leaf.to_string(),
        })
    }

    /// The DNS subject alternative names.
    ///
    /// # Errors
    ///
    /// [`CertificateError::NoDnsNames`] when the certificate has no SAN
    /// extension or a SAN entry is not DNS.
    pub fn dns_names(&self) -> Result<Vec<String>> {
        let entries = self
            .cert
            .subject_alt_names()
            .ok_or(CertificateError::NoDnsNames)?;

        let mut names = Vec::new();
        for entry in entries {
            let name = entry.dnsname().ok_or(CertificateError::NoDnsNames)?;
            names.push(name.to_string());
        }

        if names.is_empty() {
            return Err(CertificateError::NoDnsNames);
        }
        Ok(names)
    }

    /// The domain an installation targets: the shortest SAN, the apex when
    /// the certificate covers apex plus subdomains.
    pub fn install_domain(&self) -> Result<String> {
        let names = self.dns_names()?;
        let shortest = names
            .into_iter()
            .min_by_key(String::len)
            .ok_or(CertificateError::NoDnsNames)?;
        Ok(shortest)
    }

    /// Whether `key_pair` is the certificate's subject key.
    pub fn matches_key(&self, key_pair: &KeyPair) -> Result<bool> {
        Ok(self.cert.public_key()?.public_eq(&key_pair.pri_key))
    }

    /// Whether fewer than `threshold_days` of validity remain. An expired
    /// certificate always renews.
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        let now = Asn1Time::from_unix(Utc::now().timestamp())?;
        let not_after = self.cert.not_after();

        if not_after <= &*now {
            return Ok(true);
        }

        let remaining = now.diff(not_after)?;
        let remaining_secs = i64::from(remaining.days) * 86_400 + i64::from(remaining.secs);
        Ok(remaining_secs <= i64::from(threshold_days) * 86_400)
    }

    /// The leaf's PEM block.
    pub fn pem(&self) -> &str {
        &self.pem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::{
        hash::MessageDigest,
        nid::Nid,
        x509::{extension::SubjectAlternativeName, X509Builder, X509Name},
    };

    fn self_signed(days: u32, sans: &[&str]) -> (String, KeyPair) {
        let key_pair = KeyPair::generate().unwrap();

        let mut name = X509Name::builder().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, sans[0]).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key_pair.pri_key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(days).unwrap())
            .unwrap();

        let mut san = SubjectAlternativeName::new();
        for entry in sans {
            san.dns(entry);
        }
        let san = san.build(&builder.x509v3_context(None, None)).unwrap();
        builder.append_extension(san).unwrap();

        builder.sign(&key_pair.pri_key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();
        (
            String::from_utf8(cert.to_pem().unwrap()).unwrap(),
            key_pair,
        )
    }

    #[test]
    fn test_parse_extracts_leaf_of_chain() {
        let (leaf_pem, _) = self_signed(90, &["example.com"]);
        let (issuer_pem, _) = self_signed(365, &["ca.example.org"]);
        let chain = format!("{leaf_pem}{issuer_pem}");

        let certificate = Certificate::from_pem(&chain).unwrap();
        assert_eq!(certificate.dns_names().unwrap(), vec!["example.com"]);
        assert!(certificate.pem().trim_start().starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(!certificate.pem().contains("ca.example.org"));
    }

    #[test]
    fn test_garbage_is_format_mismatch() {
        assert!(matches!(
            Certificate::from_pem("not a certificate"),
            Err(CertificateError::FormatMismatch)
        ));
    }

    #[test]
    fn test_install_domain_is_shortest_san() {
        let (pem, _) = self_signed(90, &["www.example.com", "example.com", "mail.example.com"]);
        let certificate = Certificate::from_pem(&pem).unwrap();
        assert_eq!(certificate.install_domain().unwrap(), "example.com");
    }

    #[test]
    fn test_matches_key() {
        let (pem, key_pair) = self_signed(90, &["example.com"]);
        let certificate = Certificate::from_pem(&pem).unwrap();

        assert!(certificate.matches_key(&key_pair).unwrap());
        let other = KeyPair::generate().unwrap();
        assert!(!certificate.matches_key(&other).unwrap());
    }

    #[test]
    fn test_should_renew_thresholds() {
        let (pem, _) = self_signed(90, &["example.com"]);
        let certificate = Certificate::from_pem(&pem).unwrap();

        assert!(!certificate.should_renew(30).unwrap());
        assert!(certificate.should_renew(91).unwrap());
    }
}
