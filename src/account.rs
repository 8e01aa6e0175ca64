//! Account provisioning: reuse the stored key when one exists, register a
//! fresh one otherwise, and bind the account URL used as `kid` afterwards.

use std::str::FromStr;

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    directory::{Directory, DirectoryError},
    jwk::{Jwk, JwkError},
    key_pair::{KeyError, KeyPair},
    payload::{LookupAccountPayload, RegisterAccountPayload, UpdateContactPayload},
    protection::Identity,
    storage::{Storage, StorageError},
    transport::{Payload, Signer, Transport, TransportError},
};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("unknown environment: {0} (expected \"staging\" or \"production\")")]
    UnknownEnvironment(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("account response carried no Location header")]
    MissingLocation,
}

type Result<T> = std::result::Result<T, AccountError>;

/// Which CA instance a run talks to. Staging issues certificates browsers
/// reject and is rate-limited generously; it keeps its own account key so
/// test runs never touch the production identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    /// The directory URL of the Let's Encrypt instance.
    pub fn directory_url(self) -> &'static str {
        match self {
            Environment::Staging => "https://acme-staging-v02.api.letsencrypt.org/directory",
            Environment::Production => "https://acme-v02.api.letsencrypt.org/directory",
        }
    }

    /// Storage name of this environment's account key.
    pub fn account_key_name(self) -> &'static str {
        match self {
            Environment::Staging => "account-staging.key",
            Environment::Production => "account.key",
        }
    }
}

impl FromStr for Environment {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(AccountError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// An established account: the key, its derived JWK material and the account
/// URL the CA assigned.
#[derive(Debug)]
pub struct Account {
    pub environment: Environment,
    pub key_pair: KeyPair,
    pub jwk: Jwk,
    pub thumbprint: String,
    pub directory: Directory,
    pub url: String,
}

impl Account {
    /// Loads or creates the account for `environment`.
    ///
    /// A stored key is looked up with `onlyReturnExisting` (200 OK). A fresh
    /// key is registered (201 Created) and persisted only after the CA
    /// accepts it, so a failed registration leaves no stale key behind.
    ///
    /// # Errors
    ///
    /// [`KeyError::Malformed`] when a stored key fails to parse. The key is
    /// never silently regenerated: replacing it would strand the account and
    /// its pending authorizations.
    pub fn establish(
        environment: Environment,
        storage: &dyn Storage,
        transport: &mut Transport,
    ) -> Result<Self> {
        let key_name = environment.account_key_name();
        let stored = storage.read(key_name)?;
        let preexisting = stored.is_some();

        let key_pair = match stored {
            Some(pem) => KeyPair::from_pem(&pem)?,
            None => {
                info!("no stored account key ({key_name}); generating a new one");
                KeyPair::generate()?
            }
        };

        let jwk = key_pair.jwk()?;
        let thumbprint = key_pair.thumbprint()?;

        let directory = Directory::fetch(transport, environment.directory_url())?;

        let signer = Signer {
            key_pair: &key_pair,
            identity: Identity::PublicKey(&jwk),
        };

        let response = if preexisting {
            debug!("looking up account for stored key {key_name}");
            transport.send(
                &directory.new_account,
                200,
                Payload::json(&LookupAccountPayload::new())?,
                signer,
            )?
        } else {
            let response = transport.send(
                &directory.new_account,
                201,
                Payload::json(&RegisterAccountPayload::new())?,
                signer,
            )?;
            // Persist only once the CA has accepted the key.
            storage.write(key_name, &key_pair.to_pem()?, 0o600)?;
            info!("registered new account; key stored as {key_name}");
            response
        };

        let url = response
            .header("Location")
            .ok_or(AccountError::MissingLocation)?
            .to_string();

        Ok(Account {
            environment,
            key_pair,
            jwk,
            thumbprint,
            directory,
            url,
        })
    }

    /// The `kid`-based signer every post-establishment request uses.
    pub fn signer(&self) -> Signer<'_> {
        Signer {
            key_pair: &self.key_pair,
            identity: Identity::KeyId(&self.url),
        }
    }
}

/// Replaces the account's contact addresses with the given emails.
///
/// The response log is flushed whether the update succeeds or fails.
pub fn update_contact<S: AsRef<str>>(
    environment: Environment,
    emails: &[S],
    storage: &dyn Storage,
    transport: &mut Transport,
) -> Result<()> {
    let outcome = run_update(environment, emails, storage, transport);

    if let Err(e) = transport.flush_responses(storage) {
        warn!("failed to write response log: {e}");
        if outcome.is_ok() {
            return Err(e.into());
        }
    }

    outcome
}

fn run_update<S: AsRef<str>>(
    environment: Environment,
    emails: &[S],
    storage: &dyn Storage,
    transport: &mut Transport,
) -> Result<()> {
    let account = Account::establish(environment, storage, transport)?;

    let url = account.url.clone();
    transport.send(
        &url,
        200,
        Payload::json(&UpdateContactPayload::new(emails))?,
        account.signer(),
    )?;

    info!("updated contact addresses for {url}");
    Ok(())
}
