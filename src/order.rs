//! Order orchestration: the full pipeline from domain list to issued
//! certificate.
//!
//! The pipeline is strictly sequential and blocking. Polling is bounded by
//! [`PollPolicy`]; the CA is never polled forever. All pacing sleeps are
//! carried in [`Pacing`] so tests run with zero delays.

use std::{path::PathBuf, thread, time::Duration};

use log::{info, warn};
use thiserror::Error;

use crate::{
    account::{Account, AccountError, Environment},
    challenge::{Authorization, AuthorizationStatus, ChallengeError, HttpChallengeFiles},
    csr::{self, CsrError},
    key_pair::KeyError,
    payload::{FinalizeOrderPayload, Identifier, NewOrderPayload, ReadyForValidationPayload},
    storage::{Storage, StorageError, CERTIFICATE_FILE, CERTIFICATE_KEY_FILE},
    transport::{Payload, Signer, Transport, TransportError},
};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("order response carried no Location header")]
    MissingLocation,
    #[error("no http-01 challenge offered for {identifier}")]
    NoHttp01Challenge { identifier: String },
    #[error("authorization still pending after {attempts} attempts")]
    AuthorizationTimeout { attempts: usize },
    #[error("order not valid after {attempts} attempts")]
    OrderTimeout { attempts: usize },
    #[error("{kind}: {detail}")]
    AuthorizationFailed { kind: String, detail: String },
    #[error("authorization ended in state {0:?}")]
    AuthorizationRejected(AuthorizationStatus),
    #[error("order ended in state {0:?}")]
    OrderFailed(OrderStatus),
    #[error("valid order carried no certificate URL")]
    MissingCertificateUrl,
}

type Result<T> = std::result::Result<T, OrderError>;

/// Order lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// An order object as returned by the CA.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Order {
    pub status: OrderStatus,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub authorizations: Vec<String>,
    pub finalize: String,
    #[serde(default)]
    pub certificate: Option<String>,
}

/// Bounded-polling parameters for authorization and order state.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(2),
        }
    }
}

/// Fixed grace periods between pipeline stages, giving proof files time to
/// become servable and the CA time to act before the first poll.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// After writing proof files, before triggering validation.
    pub publish_grace: Duration,
    /// After triggering validation, before the first authorization poll.
    pub validation_grace: Duration,
    /// After submitting the CSR, before the first order poll.
    pub finalize_grace: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            publish_grace: Duration::from_secs(2),
            validation_grace: Duration::from_secs(6),
            finalize_grace: Duration::from_secs(2),
        }
    }
}

impl Pacing {
    /// All grace periods zero, for tests.
    pub fn none() -> Self {
        Self {
            publish_grace: Duration::ZERO,
            validation_grace: Duration::ZERO,
            finalize_grace: Duration::ZERO,
        }
    }
}

/// Everything an acquisition run needs besides the domain list.
#[derive(Debug)]
pub struct AcquireOptions {
    pub environment: Environment,
    /// Directory the http-01 proof files are served from.
    pub webroot: PathBuf,
    pub poll: PollPolicy,
    pub pacing: Pacing,
}

impl AcquireOptions {
    pub fn new(environment: Environment, webroot: impl Into<PathBuf>) -> Self {
        Self {
            environment,
            webroot: webroot.into(),
            poll: PollPolicy::default(),
            pacing: Pacing::default(),
        }
    }
}

/// The issued certificate chain and its private key.
#[derive(Debug)]
pub struct Issued {
    pub certificate_pem: String,
    pub certificate_key_pem: String,
}

/// Runs the full acquisition pipeline for `domains`.
///
/// Production runs persist the certificate and key through `storage`;
/// staging runs deliberately do not, so a test run can never clobber a live
/// certificate. The response log is flushed on every exit path.
pub fn acquire_certificate<S: AsRef<str>>(
    domains: &[S],
    options: &AcquireOptions,
    storage: &dyn Storage,
    transport: &mut Transport,
) -> Result<Issued> {
    let outcome = run_order(domains, options, storage, transport);

    if let Err(e) = transport.flush_responses(storage) {
        warn!("failed to write response log: {e}");
        if outcome.is_ok() {
            return Err(e.into());
        }
    }

    outcome
}

fn run_order<S: AsRef<str>>(
    domains: &[S],
    options: &AcquireOptions,
    storage: &dyn Storage,
    transport: &mut Transport,
) -> Result<Issued> {
    let account = Account::establish(options.environment, storage, transport)?;
    let signer = account.signer();

    // Create the order.
    let response = transport.send(
        &account.directory.new_order,
        201,
        Payload::json(&NewOrderPayload::new(domains))?,
        signer,
    )?;
    let order_url = response
        .header("Location")
        .ok_or(OrderError::MissingLocation)?
        .to_string();
    let order: Order = serde_json::from_str(&response.body)?;
    info!("order created at {order_url}");

    // Inspect every authorization; already-valid ones need no work.
    let mut pending_urls = Vec::new();
    let mut challenge_urls = Vec::new();
    let mut tokens = Vec::new();

    for auth_url in &order.authorizations {
        let response = transport.send(auth_url, 200, Payload::PostAsGet, signer)?;
        let authorization: Authorization = serde_json::from_str(&response.body)?;

        if authorization.status == AuthorizationStatus::Valid {
            info!("authorization for {} already valid", authorization.identifier.value);
            continue;
        }

        let challenge = authorization
            .http01()
            .ok_or_else(|| OrderError::NoHttp01Challenge {
                identifier: authorization.identifier.value.clone(),
            })?;

        pending_urls.push(auth_url.clone());
        challenge_urls.push(challenge.url.clone());
        tokens.push(challenge.token.clone());
    }

    if !pending_urls.is_empty() {
        // Proof files live only inside this block; the guard's drop removes
        // them whether validation succeeds or fails.
        let _proof_files =
            HttpChallengeFiles::publish(&options.webroot, &tokens, &account.thumbprint)?;
        pause(options.pacing.publish_grace);

        for challenge_url in &challenge_urls {
            transport.send(
                challenge_url,
                200,
                Payload::json(&ReadyForValidationPayload::default())?,
                signer,
            )?;
        }
        pause(options.pacing.validation_grace);

        for auth_url in &pending_urls {
            let authorization = poll_authorization(transport, signer, auth_url, options.poll)?;
            if authorization.status != AuthorizationStatus::Valid {
                if let Some(problem) = authorization
                    .http01()
                    .and_then(|challenge| challenge.error.clone())
                {
                    return Err(OrderError::AuthorizationFailed {
                        kind: problem.kind,
                        detail: problem.detail,
                    });
                }
                return Err(OrderError::AuthorizationRejected(authorization.status));
            }
        }
    }

    // Finalize with a fresh certificate key.
    let identifiers: Vec<Identifier> = if order.identifiers.is_empty() {
        domains.iter().map(|d| Identifier::dns(d.as_ref())).collect()
    } else {
        order.identifiers.clone()
    };
    let request = csr::generate(&identifiers)?;

    let response = transport.send(
        &order.finalize,
        200,
        Payload::json(&FinalizeOrderPayload::new(request.csr.as_str()))?,
        signer,
    )?;
    let mut order: Order = serde_json::from_str(&response.body)?;

    if order.status != OrderStatus::Valid {
        pause(options.pacing.finalize_grace);
        order = poll_order(transport, signer, &order_url, options.poll)?;
        if order.status != OrderStatus::Valid {
            return Err(OrderError::OrderFailed(order.status));
        }
    }

    // Download the certificate chain.
    let certificate_url = order.certificate.ok_or(OrderError::MissingCertificateUrl)?;
    let response = transport.send(&certificate_url, 200, Payload::PostAsGet, signer)?;

    let issued = Issued {
        certificate_pem: response.body,
        certificate_key_pem: String::from_utf8(request.key_pair.to_pem()?)?,
    };

    if options.environment == Environment::Production {
        storage.write(CERTIFICATE_FILE, issued.certificate_pem.as_bytes(), 0o644)?;
        storage.write(
            CERTIFICATE_KEY_FILE,
            issued.certificate_key_pem.as_bytes(),
            0o600,
        )?;
        info!("certificate and key persisted");
    } else {
        info!("staging run: certificate not persisted");
    }

    Ok(issued)
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

fn poll_authorization(
    transport: &mut Transport,
    signer: Signer<'_>,
    url: &str,
    policy: PollPolicy,
) -> Result<Authorization> {
    for attempt in 1..=policy.attempts {
        let response = transport.send(url, 200, Payload::PostAsGet, signer)?;
        let authorization: Authorization = serde_json::from_str(&response.body)?;

        if authorization.status != AuthorizationStatus::Pending {
            return Ok(authorization);
        }
        if attempt == policy.attempts {
            break;
        }
        pause(policy.delay);
    }

    Err(OrderError::AuthorizationTimeout {
        attempts: policy.attempts,
    })
}

fn poll_order(
    transport: &mut Transport,
    signer: Signer<'_>,
    url: &str,
    policy: PollPolicy,
) -> Result<Order> {
    for attempt in 1..=policy.attempts {
        let response = transport.send(url, 200, Payload::PostAsGet, signer)?;
        let order: Order = serde_json::from_str(&response.body)?;

        // Pending, ready and processing are all states the CA can still
        // move out of on its own.
        if !matches!(
            order.status,
            OrderStatus::Pending | OrderStatus::Ready | OrderStatus::Processing
        ) {
            return Ok(order);
        }
        if attempt == policy.attempts {
            break;
        }
        pause(policy.delay);
    }

    Err(OrderError::OrderTimeout {
        attempts: policy.attempts,
    })
}
