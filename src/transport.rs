//! The HTTP layer shared by every ACME call: request dispatch, response-body
//! logging, problem-document decoding and nonce bookkeeping.
//!
//! Every response body that arrives here is recorded, success or failure, so
//! the run can be reconstructed from `responses.txt` afterwards.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64,
    jws::{Jws, JwsError},
    key_pair::KeyPair,
    nonce::NonceKeeper,
    protection::{Identity, ProtectedHeader},
    storage::{Storage, StorageError, RESPONSE_LOG_FILE},
};

/// Transport failures, including the CA's own error documents.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{kind}: {detail}")]
    Problem { kind: String, detail: String },
    #[error("unexpected status {got} from {url} (expected {expected})")]
    UnexpectedStatus {
        url: String,
        got: u16,
        expected: u16,
    },
    #[error("nonce endpoint not configured")]
    NonceEndpointUnset,
    #[error("nonce endpoint returned no Replay-Nonce header")]
    NoNonce,
    #[error("no scripted response for {0}")]
    Unscripted(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
}

type Result<T> = std::result::Result<T, TransportError>;

/// An RFC 7807 problem document, the CA's structured error report.
#[derive(Debug, Clone, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub detail: String,
}

/// One outgoing request. A body means POST `application/jose+json`; no body
/// means plain GET.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub body: Option<String>,
}

/// One response, headers flattened to name/value pairs.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The single seam between the protocol logic and the network.
pub trait HttpExchange {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Real network exchange over a blocking reqwest client.
pub struct ReqwestExchange {
    client: reqwest::blocking::Client,
}

impl ReqwestExchange {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("certsmith/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl HttpExchange for ReqwestExchange {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = match request.body {
            Some(body) => self
                .client
                .post(&request.url)
                .header("Content-Type", "application/jose+json")
                .body(body)
                .send()?,
            None => self.client.get(&request.url).send()?,
        };

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.text()?;

        Ok(HttpResponse::new(status, headers, body))
    }
}

#[derive(Debug, Default)]
struct ScriptedInner {
    responses: VecDeque<HttpResponse>,
    requests: Vec<HttpRequest>,
}

/// Queue-driven exchange for tests. Clones share the queue and the request
/// record, so a test can keep a handle after handing one to the transport.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExchange {
    inner: Rc<RefCell<ScriptedInner>>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, response: HttpResponse) {
        self.inner.borrow_mut().responses.push_back(response);
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.inner.borrow().requests.clone()
    }

    /// Responses still queued.
    pub fn remaining(&self) -> usize {
        self.inner.borrow().responses.len()
    }
}

impl HttpExchange for ScriptedExchange {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut inner = self.inner.borrow_mut();
        let url = request.url.clone();
        inner.requests.push(request);
        inner
            .responses
            .pop_front()
            .ok_or(TransportError::Unscripted(url))
    }
}

/// The two signed request shapes.
pub enum Payload {
    /// Signed request with the empty-string payload segment (POST-as-GET).
    PostAsGet,
    /// Signed request with a JSON body.
    Json(String),
}

impl Payload {
    pub fn json<T: Serialize>(value: &T) -> std::result::Result<Self, serde_json::Error> {
        Ok(Payload::Json(serde_json::to_string(value)?))
    }

    /// The Base64 payload segment.
    ///
    /// POST-as-GET yields the empty string, which is deliberately not the
    /// encoding of `{}`.
    fn to_segment(&self) -> String {
        match self {
            Payload::PostAsGet => String::new(),
            Payload::Json(json) => base64::encode_url(json.as_bytes()),
        }
    }
}

/// The key and identity a signed request is made under.
#[derive(Clone, Copy)]
pub struct Signer<'a> {
    pub key_pair: &'a KeyPair,
    pub identity: Identity<'a>,
}

/// Accumulates raw response bodies for the diagnostic dump.
#[derive(Debug, Default)]
struct ResponseLog {
    entries: Vec<String>,
}

impl ResponseLog {
    fn record(&mut self, body: &str) {
        self.entries.push(body.to_string());
    }

    /// Most recent response first, entries separated by a rule.
    fn dump(&self) -> String {
        let mut ordered: Vec<&str> = self.entries.iter().map(String::as_str).collect();
        ordered.reverse();
        ordered.join("\n\n-----\n\n")
    }
}

/// Stateful ACME transport: owns the nonce, the nonce endpoint and the
/// response log, and turns payloads into signed `application/jose+json`
/// requests.
pub struct Transport {
    exchange: Box<dyn HttpExchange>,
    nonce: NonceKeeper,
    new_nonce_url: Option<String>,
    log: ResponseLog,
}

impl Transport {
    pub fn new(exchange: Box<dyn HttpExchange>) -> Self {
        Self {
            exchange,
            nonce: NonceKeeper::new(),
            new_nonce_url: None,
            log: ResponseLog::default(),
        }
    }

    /// Transport over the real network.
    pub fn with_reqwest() -> Result<Self> {
        Ok(Self::new(Box::new(ReqwestExchange::new()?)))
    }

    /// Points nonce refreshes at the directory's `newNonce` endpoint.
    pub fn set_nonce_url(&mut self, url: impl Into<String>) {
        self.new_nonce_url = Some(url.into());
    }

    /// Unauthenticated GET expecting `expected`.
    pub fn get(&mut self, url: &str, expected: u16) -> Result<HttpResponse> {
        self.dispatch(HttpRequest {
            url: url.to_string(),
            body: None,
        }, expected)
    }

    /// Signed POST expecting `expected`.
    pub fn send(
        &mut self,
        url: &str,
        expected: u16,
        payload: Payload,
        signer: Signer<'_>,
    ) -> Result<HttpResponse> {
        let segment = payload.to_segment();

        let nonce = match self.nonce.take() {
            Some(nonce) => nonce,
            None => self.refresh_nonce()?,
        };

        let header = ProtectedHeader::new(&nonce, url, signer.identity);
        let jws = Jws::sign(&header, &segment, signer.key_pair)?;
        let body = jws.to_json()?;

        self.dispatch(HttpRequest {
            url: url.to_string(),
            body: Some(body),
        }, expected)
    }

    /// Fetches a fresh nonce from the `newNonce` endpoint.
    fn refresh_nonce(&mut self) -> Result<String> {
        let url = self
            .new_nonce_url
            .clone()
            .ok_or(TransportError::NonceEndpointUnset)?;

        self.get(&url, 204)?;
        self.nonce.take().ok_or(TransportError::NoNonce)
    }

    fn dispatch(&mut self, request: HttpRequest, expected: u16) -> Result<HttpResponse> {
        let url = request.url.clone();
        let response = self.exchange.execute(request)?;

        // Record before status checks so failing responses are captured too.
        self.log.record(&response.body);

        if response.status != expected {
            // Problem documents carry the CA's own explanation; surface it
            // verbatim instead of the bare status.
            let is_problem = response
                .header("Content-Type")
                .is_some_and(|value| value.starts_with("application/problem+json"));
            if is_problem {
                if let Ok(problem) = serde_json::from_str::<ProblemDetails>(&response.body) {
                    return Err(TransportError::Problem {
                        kind: problem.kind,
                        detail: problem.detail,
                    });
                }
            }
            return Err(TransportError::UnexpectedStatus {
                url,
                got: response.status,
                expected,
            });
        }

        self.nonce.absorb(response.header("Replay-Nonce"));

        Ok(response)
    }

    /// The accumulated diagnostic dump, most recent response first.
    pub fn response_log(&self) -> String {
        self.log.dump()
    }

    /// Writes the dump to [`RESPONSE_LOG_FILE`].
    pub fn flush_responses(
        &self,
        storage: &dyn Storage,
    ) -> std::result::Result<(), StorageError> {
        storage.write(RESPONSE_LOG_FILE, self.log.dump().as_bytes(), 0o644)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{key_pair::KeyPair, payload::RegisterAccountPayload};

    fn nonce_headers(nonce: &str) -> Vec<(String, String)> {
        vec![("Replay-Nonce".to_string(), nonce.to_string())]
    }

    fn transport_with(exchange: &ScriptedExchange) -> Transport {
        let mut transport = Transport::new(Box::new(exchange.clone()));
        transport.set_nonce_url("https://ca.test/new-nonce");
        transport
    }

    fn decode_segment(body: &str, field: &str) -> String {
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        json[field].as_str().unwrap().to_string()
    }

    #[test]
    fn test_nonce_fetched_lazily_and_reused() {
        let exchange = ScriptedExchange::new();
        exchange.enqueue(HttpResponse::new(204, nonce_headers("n1"), ""));
        exchange.enqueue(HttpResponse::new(200, nonce_headers("n2"), "{}"));
        exchange.enqueue(HttpResponse::new(200, nonce_headers("n3"), "{}"));

        let key_pair = KeyPair::generate().unwrap();
        let jwk = key_pair.jwk().unwrap();
        let signer = Signer {
            key_pair: &key_pair,
            identity: Identity::PublicKey(&jwk),
        };

        let mut transport = transport_with(&exchange);
        let payload = Payload::json(&RegisterAccountPayload::new()).unwrap();
        transport
            .send("https://ca.test/new-acct", 200, payload, signer)
            .unwrap();
        transport
            .send("https://ca.test/order", 200, Payload::PostAsGet, signer)
            .unwrap();

        let requests = exchange.requests();
        assert_eq!(requests.len(), 3);
        // first request is the nonce fetch, not the account call
        assert_eq!(requests[0].url, "https://ca.test/new-nonce");
        assert!(requests[0].body.is_none());

        // second signed request reuses n2 without another nonce fetch
        let protected = decode_segment(requests[2].body.as_deref().unwrap(), "protected");
        let header = base64::decode_url(&protected).unwrap();
        let header: serde_json::Value = serde_json::from_slice(&header).unwrap();
        assert_eq!(header["nonce"], "n2");
    }

    #[test]
    fn test_post_as_get_and_json_segments_differ() {
        let exchange = ScriptedExchange::new();
        exchange.enqueue(HttpResponse::new(204, nonce_headers("n1"), ""));
        exchange.enqueue(HttpResponse::new(200, nonce_headers("n2"), "{}"));
        exchange.enqueue(HttpResponse::new(200, nonce_headers("n3"), "{}"));

        let key_pair = KeyPair::generate().unwrap();
        let signer = Signer {
            key_pair: &key_pair,
            identity: Identity::KeyId("https://ca.test/acct/1"),
        };

        let mut transport = transport_with(&exchange);
        transport
            .send("https://ca.test/authz/1", 200, Payload::PostAsGet, signer)
            .unwrap();
        transport
            .send(
                "https://ca.test/chal/1",
                200,
                Payload::Json("{}".to_string()),
                signer,
            )
            .unwrap();

        let requests = exchange.requests();
        assert_eq!(
            decode_segment(requests[1].body.as_deref().unwrap(), "payload"),
            ""
        );
        assert_eq!(
            decode_segment(requests[2].body.as_deref().unwrap(), "payload"),
            "e30"
        );
    }

    #[test]
    fn test_problem_document_surfaces_verbatim() {
        let exchange = ScriptedExchange::new();
        exchange.enqueue(HttpResponse::new(
            400,
            vec![(
                "Content-Type".to_string(),
                "application/problem+json".to_string(),
            )],
            r#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"JWS has an invalid anti-replay nonce"}"#,
        ));

        let mut transport = transport_with(&exchange);
        let err = transport.get("https://ca.test/order", 200).unwrap_err();

        match err {
            TransportError::Problem { kind, detail } => {
                assert_eq!(kind, "urn:ietf:params:acme:error:badNonce");
                assert_eq!(detail, "JWS has an invalid anti-replay nonce");
            }
            other => panic!("expected problem, got {other:?}"),
        }
    }

    #[test]
    fn test_non_problem_mismatch_is_generic() {
        let exchange = ScriptedExchange::new();
        exchange.enqueue(HttpResponse::new(502, vec![], "bad gateway"));

        let mut transport = transport_with(&exchange);
        let err = transport.get("https://ca.test/dir", 200).unwrap_err();

        match err {
            TransportError::UnexpectedStatus { got, expected, url } => {
                assert_eq!(got, 502);
                assert_eq!(expected, 200);
                assert_eq!(url, "https://ca.test/dir");
            }
            other => panic!("expected status mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_log_is_most_recent_first() {
        let exchange = ScriptedExchange::new();
        exchange.enqueue(HttpResponse::new(200, vec![], "first"));
        exchange.enqueue(HttpResponse::new(200, vec![], "second"));

        let mut transport = transport_with(&exchange);
        transport.get("https://ca.test/a", 200).unwrap();
        transport.get("https://ca.test/b", 200).unwrap();

        assert_eq!(transport.response_log(), "second\n\n-----\n\nfirst");
    }

    #[test]
    fn test_failed_response_is_still_logged() {
        let exchange = ScriptedExchange::new();
        exchange.enqueue(HttpResponse::new(500, vec![], "boom"));

        let mut transport = transport_with(&exchange);
        assert!(transport.get("https://ca.test/a", 200).is_err());
        assert_eq!(transport.response_log(), "boom");
    }
}
