//! The client-side HTTP transport.
//!
//! [`Transport`] adapts an [`HttpClient`] to ACME semantics: it signs
//! POST bodies as JWS envelopes using nonces from the pool, classifies
//! response status, converts 4xx/5xx into [`ServerError`] and records
//! fresh `Replay-Nonce` headers after every successful exchange.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Request, Response, Uri, header};
use http_body_util::Full;
use serde::Serialize;

use crate::codec::MediaType;
use crate::crypto::SigningKey;
use crate::jws;
use crate::nonce::NonceStack;
use crate::types::{Error, Problem, REPLAY_NONCE};

/// An HTTP engine able to perform one request. Implemented by the
/// built-in hyper client and by test stubs.
pub trait HttpClient: Send + Sync {
    /// Perform the request, returning the response with its body fully
    /// read.
    fn request(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Pin<Box<dyn Future<Output = Result<Response<Bytes>, Error>> + Send>>;
}

/// An error reported by the ACME server, or synthesized for one.
#[derive(Debug)]
pub struct ServerError {
    /// The HTTP method used, when the error came from a client exchange.
    pub method: Option<Method>,
    /// The request URL, when the error came from a client exchange.
    pub url: Option<Uri>,
    /// The response status.
    pub status: http::StatusCode,
    /// The problem document, if one was supplied.
    pub problem: Option<Problem>,
}

impl ServerError {
    /// A server-side error carrying a problem document, used to pick the
    /// response status of a failing handler.
    pub fn problem(
        status: http::StatusCode,
        kind: crate::types::ProblemType,
        detail: impl Into<String>,
    ) -> ServerError {
        ServerError {
            method: None,
            url: None,
            status,
            problem: Some(Problem::new(kind, detail, status)),
        }
    }

    fn from_response(method: Method, url: Uri, rsp: &Response<Bytes>) -> ServerError {
        let problem = rsp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|ct| *ct == MediaType::ProblemJson.as_str())
            .and_then(|_| serde_json::from_slice(rsp.body()).ok());

        ServerError {
            method: Some(method),
            url: Some(url),
            status: rsp.status(),
            problem,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("server error")?;
        if let (Some(method), Some(url)) = (&self.method, &self.url) {
            write!(f, " on {method} {url}")?;
        }
        match &self.problem {
            Some(problem) => write!(
                f,
                ": {} ({} {})",
                problem.detail,
                self.status.as_u16(),
                problem.kind
            ),
            None => write!(f, ": {}", self.status),
        }
    }
}

impl std::error::Error for ServerError {}

/// The ACME HTTP client: marshals requests, identifies errors,
/// and records nonces.
pub struct Transport {
    http: Box<dyn HttpClient>,
    signer: Option<Arc<dyn SigningKey>>,
    dir_uri: String,
    nonces: NonceStack,
}

impl Transport {
    /// Wrap an HTTP engine. Without a signer, POSTs with a body fail with
    /// [`Error::NoSigner`]. The directory URI is used to replenish the
    /// nonce pool on demand.
    pub fn new(
        http: Box<dyn HttpClient>,
        signer: Option<Arc<dyn SigningKey>>,
        dir_uri: impl Into<String>,
    ) -> Transport {
        Transport {
            http,
            signer,
            dir_uri: dir_uri.into(),
            nonces: NonceStack::default(),
        }
    }

    /// Perform a GET with the given `Accept` header.
    pub async fn get(&self, url: &str, accept: &str) -> Result<Response<Bytes>, Error> {
        let req = Request::builder()
            .method(Method::GET)
            .uri(url)
            .header(header::ACCEPT, accept)
            .body(Full::default())?;
        self.round_trip(req).await
    }

    /// Perform a HEAD, used to probe endpoints and replenish nonces.
    pub async fn head(&self, url: &str) -> Result<Response<Bytes>, Error> {
        let req = Request::builder()
            .method(Method::HEAD)
            .uri(url)
            .body(Full::default())?;
        self.round_trip(req).await
    }

    /// Perform a POST. A body is marshaled as JSON, wrapped in a signed
    /// JWS envelope carrying a popped nonce, and sent as
    /// `application/json`.
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        accept: &str,
        body: Option<&B>,
    ) -> Result<Response<Bytes>, Error> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(header::ACCEPT, accept);

        let full = match body {
            Some(body) => {
                let signer = self.signer.as_deref().ok_or(Error::NoSigner)?;
                let payload = serde_json::to_vec(body)?;
                let nonce = self.take_nonce().await?;
                let envelope = jws::sign(signer, Some(nonce), &payload)?;
                builder = builder.header(header::CONTENT_TYPE, MediaType::Json.as_str());
                Full::new(Bytes::from(serde_json::to_vec(&envelope)?))
            }
            None => Full::default(),
        };

        self.round_trip(builder.body(full)?).await
    }

    async fn take_nonce(&self) -> Result<String, Error> {
        match self.nonces.pop() {
            Err(Error::NoNonce) => {
                log::debug!("nonce pool empty, priming via HEAD {}", self.dir_uri);
                self.head(&self.dir_uri).await?;
                self.nonces.pop()
            }
            other => other,
        }
    }

    async fn round_trip(&self, req: Request<Full<Bytes>>) -> Result<Response<Bytes>, Error> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        log::debug!("{method} {uri}");

        let rsp = self.http.request(req).await?;
        match rsp.status().as_u16() / 100 {
            2 | 3 => {}
            4 | 5 => return Err(ServerError::from_response(method, uri, &rsp).into()),
            _ => {
                return Err(Error::UnexpectedStatus {
                    op: "request",
                    status: rsp.status(),
                });
            }
        }

        if let Some(nonce) = rsp
            .headers()
            .get(REPLAY_NONCE)
            .and_then(|v| v.to_str().ok())
        {
            self.nonces.push(nonce);
        }

        Ok(rsp)
    }
}
