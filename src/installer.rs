//! Installation of a stored certificate into the hosting control panel.
//!
//! Validation happens here, before anything touches the panel: the stored
//! certificate and key must exist, parse, and correspond to each other.

use std::{io, process::Command};

use log::info;
use thiserror::Error;

use crate::{
    certificate::{Certificate, CertificateError},
    key_pair::{KeyError, KeyPair},
    storage::{Storage, StorageError, CERTIFICATE_FILE, CERTIFICATE_KEY_FILE},
};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("no stored certificate to install")]
    MissingCertificate,
    #[error("no stored certificate key to install")]
    MissingKey,
    #[error("certificate and key do not correspond")]
    KeyMismatch,
    #[error("install command failed: {0}")]
    CommandFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, InstallError>;

/// Pushes a certificate and key onto a hosting target for one domain.
pub trait Installer {
    fn install(&self, domain: &str, certificate_pem: &str, key_pem: &str) -> Result<()>;
}

/// Installer backed by cPanel's `uapi` command, run as the account user.
///
/// Installs the certificate for the domain and switches the domain's HTTP
/// traffic to redirect to HTTPS.
#[derive(Debug, Default)]
pub struct UapiInstaller;

impl UapiInstaller {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, args: &[String]) -> Result<()> {
        let output = Command::new("uapi").args(args).output()?;

        if !output.status.success() {
            return Err(InstallError::CommandFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        // uapi reports failures through its JSON envelope, not its exit code.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value = serde_json::from_str(&stdout)
            .map_err(|_| InstallError::CommandFailed(stdout.clone().into_owned()))?;
        if parsed["result"]["status"] != 1 {
            return Err(InstallError::CommandFailed(stdout.into_owned()));
        }

        Ok(())
    }
}

impl Installer for UapiInstaller {
    fn install(&self, domain: &str, certificate_pem: &str, key_pem: &str) -> Result<()> {
        self.run(&[
            "SSL".to_string(),
            "install_ssl".to_string(),
            format!("domain={domain}"),
            format!("cert={}", url_encode(certificate_pem)),
            format!("key={}", url_encode(key_pem)),
            "--output=json".to_string(),
        ])?;

        self.run(&[
            "SSL".to_string(),
            "toggle_ssl_redirect_for_domains".to_string(),
            format!("domains={domain}"),
            "state=1".to_string(),
            "--output=json".to_string(),
        ])?;

        info!("installed certificate for {domain} and enabled the HTTPS redirect");
        Ok(())
    }
}

/// Percent-encodes everything outside the URL-unreserved set, as uapi
/// expects for PEM-valued parameters.
fn url_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => {
                out.push('%');
                out.push_str(&format!("{other:02X}"));
            }
        }
    }
    out
}

/// Validates the stored certificate and key, then installs them for the
/// certificate's shortest SAN. Returns the domain installed for.
pub fn install_stored(storage: &dyn Storage, installer: &dyn Installer) -> Result<String> {
    let certificate_pem = storage
        .read(CERTIFICATE_FILE)?
        .ok_or(InstallError::MissingCertificate)?;
    let key_pem = storage
        .read(CERTIFICATE_KEY_FILE)?
        .ok_or(InstallError::MissingKey)?;

    let certificate = Certificate::from_pem(&String::from_utf8_lossy(&certificate_pem))?;
    let key_pair = KeyPair::from_pem(&key_pem)?;

    if !certificate.matches_key(&key_pair)? {
        return Err(InstallError::KeyMismatch);
    }

    let domain = certificate.install_domain()?;
    installer.install(
        &domain,
        certificate.pem(),
        &String::from_utf8_lossy(&key_pem),
    )?;

    Ok(domain)
}
