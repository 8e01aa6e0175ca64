//! Authorization material and http-01 proof-file handling.
//!
//! Proof files live under `.well-known/acme-challenge/` in the webroot and
//! exist only for the duration of validation; [`HttpChallengeFiles`] removes
//! them on drop so they vanish on every exit path, successful or not.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::warn;
use serde::Deserialize;
use thiserror::Error;

use crate::{payload::Identifier, transport::ProblemDetails};

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("challenge token is not a safe file name: {0}")]
    InvalidToken(String),
}

type Result<T> = std::result::Result<T, ChallengeError>;

/// Authorization lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// One challenge offered inside an authorization.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub token: String,
    /// The CA's explanation when validation failed.
    #[serde(default)]
    pub error: Option<ProblemDetails>,
}

/// An authorization object as returned by its URL.
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub challenges: Vec<ChallengeDescriptor>,
}

impl Authorization {
    /// The http-01 challenge, the only type this client answers.
    pub fn http01(&self) -> Option<&ChallengeDescriptor> {
        self.challenges.iter().find(|c| c.kind == "http-01")
    }
}

/// Path of the challenge directory relative to the webroot.
pub const WELL_KNOWN: &str = ".well-known/acme-challenge";

/// Proof files published for a validation round. Dropping the value removes
/// every file it wrote.
#[derive(Debug)]
pub struct HttpChallengeFiles {
    dir: PathBuf,
    tokens: Vec<String>,
}

fn check_token(token: &str) -> Result<()> {
    if token.is_empty()
        || token.contains('/')
        || token.contains('\\')
        || token.contains('\0')
        || token.contains("..")
    {
        return Err(ChallengeError::InvalidToken(token.to_string()));
    }
    Ok(())
}

impl HttpChallengeFiles {
    /// Writes one `{token}.{thumbprint}` key-authorization file per token
    /// under the webroot's well-known directory.
    ///
    /// Files written before a failure are tracked and cleaned up by the
    /// returned guard's drop, same as on success.
    pub fn publish<S: AsRef<str>>(
        webroot: &Path,
        tokens: &[S],
        thumbprint: &str,
    ) -> Result<Self> {
        let dir = webroot.join(WELL_KNOWN);

        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new().recursive(true).mode(0o755).create(&dir)?;
        }
        #[cfg(not(unix))]
        fs::create_dir_all(&dir)?;

        let mut published = Self {
            dir,
            tokens: Vec::with_capacity(tokens.len()),
        };

        for token in tokens {
            let token = token.as_ref();
            check_token(token)?;

            let path = published.dir.join(token);
            fs::write(&path, format!("{token}.{thumbprint}"))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
            }

            published.tokens.push(token.to_string());
        }

        Ok(published)
    }
}

impl Drop for HttpChallengeFiles {
    fn drop(&mut self) {
        for token in &self.tokens {
            let path = self.dir.join(token);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("failed to remove challenge file {}: {e}", path.display());
                }
            }
        }
    }
}
