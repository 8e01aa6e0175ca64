//! Typed request bodies, one struct per ACME endpoint.
//!
//! Keeping each payload an explicit shape (rather than an ad-hoc JSON map)
//! catches field-name mistakes at compile time and keeps the serde renames
//! in one place.

use serde::{Deserialize, Serialize};

/// Registers a fresh account. The CA answers 201 Created.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAccountPayload {
    terms_of_service_agreed: bool,
}

impl RegisterAccountPayload {
    pub fn new() -> Self {
        Self {
            terms_of_service_agreed: true,
        }
    }
}

impl Default for RegisterAccountPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// Looks up the account registered for an existing key. Never a mutation;
/// the CA answers 200 OK with the account URL in `Location`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupAccountPayload {
    only_return_existing: bool,
}

impl LookupAccountPayload {
    pub fn new() -> Self {
        Self {
            only_return_existing: true,
        }
    }
}

impl Default for LookupAccountPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// Replaces the account's contact addresses.
#[derive(Debug, Serialize)]
pub struct UpdateContactPayload {
    contact: Vec<String>,
}

impl UpdateContactPayload {
    /// Prefixes each address with `mailto:` unless already present.
    pub fn new<S: AsRef<str>>(emails: &[S]) -> Self {
        let contact = emails
            .iter()
            .map(|email| {
                let email = email.as_ref();
                if email.starts_with("mailto:") {
                    email.to_string()
                } else {
                    format!("mailto:{email}")
                }
            })
            .collect();

        Self { contact }
    }
}

/// A subject the certificate must cover. Only DNS identifiers are issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            kind: "dns".to_string(),
            value: value.into(),
        }
    }
}

/// Creates a new order covering the given identifiers.
#[derive(Debug, Serialize)]
pub struct NewOrderPayload {
    identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        Self {
            identifiers: domains.iter().map(|d| Identifier::dns(d.as_ref())).collect(),
        }
    }
}

/// The empty-object body POSTed to a challenge URL.
///
/// It carries no proof (the proof is the file at the well-known path); it
/// exists only to tell the CA "please validate now". Encodes to `e30`
/// (`{}`), never to the empty payload segment of a POST-as-GET.
#[derive(Debug, Default, Serialize)]
pub struct ReadyForValidationPayload {}

/// Submits the CSR to the order's finalize URL.
#[derive(Debug, Serialize)]
pub struct FinalizeOrderPayload {
    csr: String,
}

impl FinalizeOrderPayload {
    /// `csr` is the URL-safe Base64 of the DER request.
    pub fn new(csr: impl Into<String>) -> Self {
        Self { csr: csr.into() }
    }
}
