//! The server-side HTTP dispatcher.
//!
//! [`Dispatcher`] gives incoming ACME requests their lowest-level
//! interpretation: method and Accept checking, JWS and nonce
//! verification, content-type-driven body decoding, and problem-document
//! error serialization. It is transport-agnostic — a fully-read
//! `http::Request<Bytes>` in, an `http::Response<Bytes>` out — so it can
//! be mounted under any HTTP server. [`BoulderMux`] routes the
//! Boulder-compatible paths onto one dispatcher.

use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode, header};

use crate::challenge::{Challenge, ChallengeResponse};
use crate::codec::{self, MediaType, Payload};
use crate::crypto::Verifier;
use crate::jws::{self, JoseJson, Jwk};
use crate::nonce::NonceSource;
use crate::transport::ServerError;
use crate::types::{
    Authorization, CertificateIssuance, CertificateRevocation, Directory, Error, Problem,
    ProblemType, REPLAY_NONCE, Recovery, Registration, paths,
};

/// The maximum number of bytes read from a request body, as basic DoS
/// protection.
pub const REQUEST_BODY_LIMIT: usize = 1 << 20;

/// HTTP metadata a handler attaches to its response: the status code
/// (200 when unset) and extra headers such as `Location`, `Link` and
/// `Retry-After`.
#[derive(Clone, Debug, Default)]
pub struct HttpMeta {
    /// Response status. `None` means 200 OK.
    pub status: Option<StatusCode>,
    /// Extra response headers.
    pub headers: http::HeaderMap,
}

/// An application that responds to dispatched ACME requests. Request
/// data has been authenticated where possible: POST handlers receive the
/// JWK that verified the request signature.
///
/// Implementations must be safe to call from parallel request handlers.
pub trait HttpServer: Send + Sync {
    /// Serve the directory resource.
    fn directory(&self) -> Result<(Directory, HttpMeta), Error>;
    /// Handle a new-reg or reg request.
    fn post_registration(
        &self,
        key: &Jwk,
        uri: &str,
        req: Registration,
    ) -> Result<(Registration, HttpMeta), Error>;
    /// Handle a recover-reg request.
    fn post_account_recovery(
        &self,
        key: &Jwk,
        uri: &str,
        req: Recovery,
    ) -> Result<(Registration, HttpMeta), Error>;
    /// Handle a new-authz or authz request.
    fn post_authorization(
        &self,
        key: &Jwk,
        uri: &str,
        req: Authorization,
    ) -> Result<(Authorization, HttpMeta), Error>;
    /// Look up an authz resource.
    fn authorization(&self, uri: &str) -> Result<(Authorization, HttpMeta), Error>;
    /// Handle a challenge response.
    fn post_response(
        &self,
        key: &Jwk,
        uri: &str,
        req: ChallengeResponse,
    ) -> Result<(Challenge, HttpMeta), Error>;
    /// Handle a new-cert request. `None` means issuance is still pending
    /// and the metadata carries a `Retry-After`.
    fn post_certificate_issuance(
        &self,
        key: &Jwk,
        uri: &str,
        req: CertificateIssuance,
    ) -> Result<(Option<Vec<u8>>, HttpMeta), Error>;
    /// Look up a cert resource.
    fn certificate(&self, uri: &str) -> Result<(Vec<u8>, HttpMeta), Error>;
    /// Handle a revoke-cert request.
    fn post_certificate_revocation(
        &self,
        key: &Jwk,
        uri: &str,
        req: CertificateRevocation,
    ) -> Result<HttpMeta, Error>;
}

type GetFn<'a> = &'a dyn Fn() -> Result<(Option<Payload>, HttpMeta), Error>;
type PostFn<'a> = &'a dyn Fn(&Jwk, &[u8], MediaType) -> Result<(Option<Payload>, HttpMeta), Error>;

/// Maps URIs to resources and validates request data before calling into
/// an [`HttpServer`].
pub struct Dispatcher<S> {
    server: S,
    nonces: Arc<dyn NonceSource>,
    verifier: Arc<dyn Verifier>,
}

impl<S: HttpServer> Dispatcher<S> {
    /// Create a dispatcher. The nonce source mints response nonces and
    /// consumes request nonces; the verifier checks request signatures
    /// against the JWK in the protected header.
    pub fn new(server: S, nonces: Arc<dyn NonceSource>, verifier: Arc<dyn Verifier>) -> Self {
        Dispatcher {
            server,
            nonces,
            verifier,
        }
    }

    /// Serve the directory endpoint.
    pub fn serve_directory(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let get = || -> Result<(Option<Payload>, HttpMeta), Error> {
            let (dir, meta) = self.server.directory()?;
            Ok((Some(Payload::json(&dir)?), meta))
        };
        self.serve(req, MediaType::Json.as_str(), Some(&get), None)
    }

    /// Serve an authorization resource: GET for lookups, POST for
    /// updates.
    pub fn serve_authz(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let uri = req.uri().to_string();
        let get = || -> Result<(Option<Payload>, HttpMeta), Error> {
            let (authz, meta) = self.server.authorization(&uri)?;
            Ok((Some(Payload::json(&authz)?), meta))
        };
        let post = |key: &Jwk, body: &[u8], media: MediaType| -> Result<(Option<Payload>, HttpMeta), Error> {
            let authz: Authorization = codec::decode_json(media, body)?;
            let (authz, meta) = self.server.post_authorization(key, &uri, authz)?;
            Ok((Some(Payload::json(&authz)?), meta))
        };
        self.serve(req, MediaType::Json.as_str(), Some(&get), Some(&post))
    }

    /// Serve the new-authz endpoint.
    pub fn serve_new_authz(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let uri = req.uri().to_string();
        let post = |key: &Jwk, body: &[u8], media: MediaType| -> Result<(Option<Payload>, HttpMeta), Error> {
            let authz: Authorization = codec::decode_json(media, body)?;
            let (authz, meta) = self.server.post_authorization(key, &uri, authz)?;
            Ok((Some(Payload::json(&authz)?), meta))
        };
        self.serve(req, MediaType::Json.as_str(), None, Some(&post))
    }

    /// Serve a certificate resource.
    pub fn serve_cert(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let uri = req.uri().to_string();
        let get = || -> Result<(Option<Payload>, HttpMeta), Error> {
            let (der, meta) = self.server.certificate(&uri)?;
            Ok((Some(Payload::Der(der)), meta))
        };
        self.serve(req, MediaType::PkixCert.as_str(), Some(&get), None)
    }

    /// Serve the new-cert endpoint.
    pub fn serve_new_cert(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let uri = req.uri().to_string();
        let post = |key: &Jwk, body: &[u8], media: MediaType| -> Result<(Option<Payload>, HttpMeta), Error> {
            let issuance: CertificateIssuance = codec::decode_json(media, body)?;
            let (der, meta) = self.server.post_certificate_issuance(key, &uri, issuance)?;
            Ok((der.map(Payload::Der), meta))
        };
        self.serve(req, MediaType::PkixCert.as_str(), None, Some(&post))
    }

    /// Serve a challenge resource.
    pub fn serve_challenge(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let uri = req.uri().to_string();
        let post = |key: &Jwk, body: &[u8], media: MediaType| -> Result<(Option<Payload>, HttpMeta), Error> {
            let response: ChallengeResponse = codec::decode_json(media, body)?;
            let (challenge, meta) = self.server.post_response(key, &uri, response)?;
            Ok((Some(Payload::json(&challenge)?), meta))
        };
        self.serve(req, MediaType::Json.as_str(), None, Some(&post))
    }

    /// Serve the recover-reg endpoint.
    pub fn serve_recover_reg(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let uri = req.uri().to_string();
        let post = |key: &Jwk, body: &[u8], media: MediaType| -> Result<(Option<Payload>, HttpMeta), Error> {
            let recovery: Recovery = codec::decode_json(media, body)?;
            let (reg, meta) = self.server.post_account_recovery(key, &uri, recovery)?;
            Ok((Some(Payload::json(&reg)?), meta))
        };
        self.serve(req, MediaType::Json.as_str(), None, Some(&post))
    }

    /// Serve a registration resource; handles both new-reg and reg paths.
    pub fn serve_reg(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let uri = req.uri().to_string();
        let post = |key: &Jwk, body: &[u8], media: MediaType| -> Result<(Option<Payload>, HttpMeta), Error> {
            let reg: Registration = codec::decode_json(media, body)?;
            let (reg, meta) = self.server.post_registration(key, &uri, reg)?;
            Ok((Some(Payload::json(&reg)?), meta))
        };
        self.serve(req, MediaType::Json.as_str(), None, Some(&post))
    }

    /// Serve the revoke-cert endpoint.
    pub fn serve_revoke_cert(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let uri = req.uri().to_string();
        let post = |key: &Jwk, body: &[u8], media: MediaType| -> Result<(Option<Payload>, HttpMeta), Error> {
            let revocation: CertificateRevocation = codec::decode_json(media, body)?;
            let meta = self
                .server
                .post_certificate_revocation(key, &uri, revocation)?;
            Ok((None, meta))
        };
        self.serve(req, "*/*", None, Some(&post))
    }

    // Handles all methods of one path. HEAD is always valid; a method
    // with no handler is 405.
    fn serve(
        &self,
        req: &Request<Bytes>,
        accept: &'static str,
        get: Option<GetFn<'_>>,
        post: Option<PostFn<'_>>,
    ) -> Response<Bytes> {
        match req.method().as_str() {
            "HEAD" => self.write_response(req, accept, None, HttpMeta::default()),

            "GET" => {
                let Some(get) = get else {
                    return error_response(method_not_allowed(req));
                };
                if let Err(err) = check_accept(req, accept) {
                    return error_response(err);
                }
                match get() {
                    Ok((payload, meta)) => self.write_response(req, accept, payload, meta),
                    Err(err) => error_response(err),
                }
            }

            "POST" => {
                let Some(post) = post else {
                    return error_response(method_not_allowed(req));
                };
                if let Err(err) = check_accept(req, accept) {
                    return error_response(err);
                }
                let (jwk, payload, media) = match self.read_request(req) {
                    Ok(read) => read,
                    Err(err) => return error_response(err),
                };
                match post(&jwk, &payload, media) {
                    Ok((payload, meta)) => self.write_response(req, accept, payload, meta),
                    Err(err) => error_response(err),
                }
            }

            _ => error_response(method_not_allowed(req)),
        }
    }

    // Verifies the JWS envelope in the body: exactly one signature,
    // signature valid for the embedded JWK, nonce valid and unused.
    // Returns the verified key, the inner payload and the content type
    // it should be decoded under.
    fn read_request(&self, req: &Request<Bytes>) -> Result<(Jwk, Vec<u8>, MediaType), Error> {
        if req.body().len() > REQUEST_BODY_LIMIT {
            return Err(ServerError::problem(
                StatusCode::BAD_REQUEST,
                ProblemType::MALFORMED,
                "request body too large",
            )
            .into());
        }

        let envelope: JoseJson = serde_json::from_slice(req.body()).map_err(|err| {
            ServerError::problem(
                StatusCode::BAD_REQUEST,
                ProblemType::MALFORMED,
                err.to_string(),
            )
        })?;

        let verified = jws::verify(&envelope, self.verifier.as_ref()).map_err(|err| {
            ServerError::problem(
                StatusCode::FORBIDDEN,
                ProblemType::UNAUTHORIZED,
                err.to_string(),
            )
        })?;

        let nonce = verified.nonce.as_deref().unwrap_or_default();
        self.nonces.verify(nonce).map_err(|err| {
            ServerError::problem(
                StatusCode::FORBIDDEN,
                ProblemType::UNAUTHORIZED,
                err.to_string(),
            )
        })?;

        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let media = MediaType::parse(content_type)?;

        Ok((verified.jwk, verified.payload, media))
    }

    // Encodes and writes a handler result. HEAD and POST responses carry
    // a fresh nonce.
    fn write_response(
        &self,
        req: &Request<Bytes>,
        accept: &'static str,
        payload: Option<Payload>,
        meta: HttpMeta,
    ) -> Response<Bytes> {
        let mut builder = Response::builder().status(meta.status.unwrap_or(StatusCode::OK));
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in meta.headers.iter() {
                headers.append(name, value.clone());
            }
        }

        if matches!(req.method().as_str(), "HEAD" | "POST") {
            match self.nonces.mint() {
                Ok(nonce) => builder = builder.header(REPLAY_NONCE, nonce),
                Err(err) => return error_response(err),
            }
        }

        let body = match payload {
            None => Bytes::new(),
            Some(payload) => {
                let requested = req
                    .headers()
                    .get(header::ACCEPT)
                    .and_then(|v| v.to_str().ok());
                let effective = match requested {
                    None | Some("*/*") => accept,
                    Some(requested) => requested,
                };
                let media = match MediaType::parse(effective) {
                    Ok(media) => media,
                    Err(err) => return error_response(err),
                };
                match payload.encode(media) {
                    Ok(bytes) => {
                        builder = builder.header(header::CONTENT_TYPE, media.as_str());
                        Bytes::from(bytes)
                    }
                    Err(err) => return error_response(err),
                }
            }
        };

        finish(builder, body)
    }
}

/// Routes Boulder-compatible paths onto a [`Dispatcher`].
pub struct BoulderMux<S> {
    dispatcher: Dispatcher<S>,
}

impl<S: HttpServer> BoulderMux<S> {
    /// Wrap a dispatcher.
    pub fn new(dispatcher: Dispatcher<S>) -> Self {
        BoulderMux { dispatcher }
    }

    /// Dispatch one request by path.
    pub fn handle(&self, req: &Request<Bytes>) -> Response<Bytes> {
        let d = &self.dispatcher;
        match req.uri().path() {
            paths::DIRECTORY => d.serve_directory(req),
            paths::NEW_REG => d.serve_reg(req),
            paths::RECOVER_REG => d.serve_recover_reg(req),
            paths::NEW_AUTHZ => d.serve_new_authz(req),
            paths::NEW_CERT => d.serve_new_cert(req),
            paths::REVOKE_CERT => d.serve_revoke_cert(req),
            path if path.starts_with(paths::REG) => d.serve_reg(req),
            path if path.starts_with(paths::AUTHZ) => d.serve_authz(req),
            path if path.starts_with(paths::CHALLENGE) => d.serve_challenge(req),
            path if path.starts_with(paths::CERT) => d.serve_cert(req),
            _ => error_response(
                ServerError::problem(
                    StatusCode::NOT_FOUND,
                    ProblemType::MALFORMED,
                    "no such resource",
                )
                .into(),
            ),
        }
    }
}

fn method_not_allowed(req: &Request<Bytes>) -> Error {
    ServerError::problem(
        StatusCode::METHOD_NOT_ALLOWED,
        ProblemType::MALFORMED,
        format!("method {}", req.method()),
    )
    .into()
}

// Endpoints declaring a concrete media type reject a missing or
// different Accept header; `*/*` always passes.
fn check_accept(req: &Request<Bytes>, accept: &'static str) -> Result<(), Error> {
    if accept == "*/*" {
        return Ok(());
    }
    let requested = req
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok());
    match requested {
        Some("*/*") => Ok(()),
        Some(requested) if requested == accept => Ok(()),
        _ => Err(ServerError::problem(
            StatusCode::NOT_ACCEPTABLE,
            ProblemType::MALFORMED,
            format!(
                "only {accept} supported, got {}",
                requested.unwrap_or_default()
            ),
        )
        .into()),
    }
}

// Serializes an error as a problem document. Handler errors that are
// not ServerError become 500 serverInternal.
fn error_response(err: Error) -> Response<Bytes> {
    let server_error = match err {
        Error::Server(err) => err,
        other => ServerError::problem(
            StatusCode::INTERNAL_SERVER_ERROR,
            ProblemType::SERVER_INTERNAL,
            other.to_string(),
        ),
    };
    let status = server_error.status;
    let problem = server_error
        .problem
        .unwrap_or_else(|| Problem::new(ProblemType::SERVER_INTERNAL, status.to_string(), status));

    let body = match codec::encode_json(MediaType::ProblemJson, &problem) {
        Ok(bytes) => Bytes::from(bytes),
        Err(err) => {
            log::warn!("failed to encode problem document: {err}");
            Bytes::new()
        }
    };
    let builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, MediaType::ProblemJson.as_str());
    finish(builder, body)
}

fn finish(builder: http::response::Builder, body: Bytes) -> Response<Bytes> {
    builder.body(body).unwrap_or_else(|err| {
        log::warn!("failed to build response: {err}");
        let mut rsp = Response::new(Bytes::new());
        *rsp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        rsp
    })
}

/// Decode a problem document from a dispatcher response, for tests and
/// loopback clients.
#[cfg(test)]
pub(crate) fn response_problem(rsp: &Response<Bytes>) -> Option<Problem> {
    serde_json::from_slice(rsp.body()).ok()
}
