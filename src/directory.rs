//! Discovery of the CA's endpoint map, the single entry point every run
//! starts from.

use serde::Deserialize;
use thiserror::Error;

use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, DirectoryError>;

/// The three directory endpoints this client uses. A conforming directory
/// may list more; they are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Directory {
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    #[serde(rename = "newAccount")]
    pub new_account: String,
    #[serde(rename = "newOrder")]
    pub new_order: String,
}

impl Directory {
    /// Fetches the directory and wires the transport's nonce refreshes to
    /// its `newNonce` endpoint.
    pub fn fetch(transport: &mut Transport, url: &str) -> Result<Self> {
        let response = transport.get(url, 200)?;
        let directory: Directory = serde_json::from_str(&response.body)?;
        transport.set_nonce_url(directory.new_nonce.clone());
        Ok(directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HttpResponse, ScriptedExchange};

    #[test]
    fn test_fetch_parses_and_wires_nonce_url() {
        let exchange = ScriptedExchange::new();
        exchange.enqueue(HttpResponse::new(
            200,
            vec![],
            r#"{
                "newNonce": "https://ca.test/new-nonce",
                "newAccount": "https://ca.test/new-acct",
                "newOrder": "https://ca.test/new-order",
                "revokeCert": "https://ca.test/revoke"
            }"#,
        ));
        exchange.enqueue(HttpResponse::new(
            204,
            vec![("Replay-Nonce".to_string(), "n1".to_string())],
            "",
        ));

        let mut transport = Transport::new(Box::new(exchange.clone()));
        let directory = Directory::fetch(&mut transport, "https://ca.test/directory").unwrap();

        assert_eq!(directory.new_account, "https://ca.test/new-acct");
        assert_eq!(directory.new_order, "https://ca.test/new-order");

        // the nonce endpoint was wired: a 204 fetch succeeds
        transport.get("https://ca.test/new-nonce", 204).unwrap();
        assert_eq!(exchange.requests().len(), 2);
    }

    #[test]
    fn test_missing_endpoint_is_an_error() {
        let exchange = ScriptedExchange::new();
        exchange.enqueue(HttpResponse::new(
            200,
            vec![],
            r#"{"newNonce": "https://ca.test/new-nonce"}"#,
        ));

        let mut transport = Transport::new(Box::new(exchange));
        let err = Directory::fetch(&mut transport, "https://ca.test/directory").unwrap_err();
        assert!(matches!(err, DirectoryError::Json(_)));
    }
}
