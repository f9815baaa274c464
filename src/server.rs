//! Application-facing server traits and the dispatch adapter.
//!
//! Implementors provide [`Server`] (global lookups and account
//! construction) and [`ServerAccount`] (operations with an implicit,
//! already-authenticated account key); [`ServerFacade`] bridges the
//! [`dispatch`](crate::dispatch) layer into them and owns the protocol
//! niceties: Link headers, status codes, the account-recovery stub.

use std::sync::Arc;

use http::{HeaderMap, HeaderValue, StatusCode, header};

use crate::challenge::{Challenge, ChallengeResponse};
use crate::crypto::Verifier;
use crate::dispatch::{BoulderMux, Dispatcher, HttpMeta, HttpServer};
use crate::jws::Jwk;
use crate::nonce::NonceSource;
use crate::transport::ServerError;
use crate::types::{
    self, CertificateIssuance, CertificateRevocation, Directory, Error, LINK, ProblemType,
    Recovery, ResourceType, paths,
};
use crate::{AcmeIdentifier, Authorization, Certificate, Registration};

/// High-level entrypoints for ACME requests. Implementations must be
/// safe to call from parallel request handlers; returning
/// [`ServerError`] from any method controls the HTTP error status.
pub trait Server: Send + Sync {
    /// Associate the given key with an account and set registration
    /// information. Returns the complete registration resource.
    fn register_account(&self, key: &Jwk, reg: &types::Registration)
    -> Result<Registration, Error>;

    /// Look up an authorization previously started by
    /// [`ServerAccount::authorize_identity`].
    fn authorization(&self, uri: &str) -> Result<Authorization, Error>;

    /// Look up a certificate previously issued by
    /// [`ServerAccount::issue_certificate`].
    fn certificate(&self, uri: &str) -> Result<Certificate, Error>;

    /// A server-side view of an account. Called for every authenticated
    /// request, so it should be lightweight; the key has already been
    /// verified against the request signature.
    fn account(&self, key: &Jwk) -> Box<dyn ServerAccount + '_>;
}

/// Operations on one account.
pub trait ServerAccount {
    /// Start an identity authorization.
    fn authorize_identity(&self, id: &AcmeIdentifier) -> Result<Authorization, Error>;
    /// Issue a certificate for the given DER CSR.
    fn issue_certificate(&self, csr: &[u8]) -> Result<Certificate, Error>;
    /// Revoke a previously issued DER certificate.
    fn revoke_certificate(&self, cert: &[u8]) -> Result<(), Error>;
    /// Update the registration resource, returning the complete result.
    fn update_registration(
        &self,
        uri: &str,
        reg: &types::Registration,
    ) -> Result<Registration, Error>;
    /// Accept a challenge response for validation.
    fn validate_challenge(&self, uri: &str, resp: &ChallengeResponse)
    -> Result<Challenge, Error>;
}

/// Adapts a [`Server`] to the dispatcher's [`HttpServer`] interface.
pub struct ServerFacade<S> {
    server: S,
    directory: Directory,
}

impl<S: Server> ServerFacade<S> {
    /// Wrap a server, advertising the given directory.
    pub fn new(server: S, directory: Directory) -> ServerFacade<S> {
        ServerFacade { server, directory }
    }
}

impl<S: Server> HttpServer for ServerFacade<S> {
    fn directory(&self) -> Result<(Directory, HttpMeta), Error> {
        Ok((self.directory.clone(), HttpMeta::default()))
    }

    fn post_registration(
        &self,
        key: &Jwk,
        uri: &str,
        req: types::Registration,
    ) -> Result<(types::Registration, HttpMeta), Error> {
        match req.resource {
            ResourceType::NewReg => {
                let reg = self.server.register_account(key, &req)?;
                let mut meta = registration_meta(&reg, &self.directory)?;
                meta.status = Some(StatusCode::CREATED);
                Ok((reg.to_wire(ResourceType::Reg), meta))
            }

            ResourceType::Reg => {
                let reg = self.server.account(key).update_registration(uri, &req)?;
                let mut meta = registration_meta(&reg, &self.directory)?;
                // Boulder answers updates with 202 Accepted.
                meta.status = Some(StatusCode::ACCEPTED);
                Ok((reg.to_wire(ResourceType::Reg), meta))
            }

            _ => Err(bad_resource()),
        }
    }

    fn post_account_recovery(
        &self,
        _key: &Jwk,
        _uri: &str,
        _req: Recovery,
    ) -> Result<(types::Registration, HttpMeta), Error> {
        Err(ServerError::problem(
            StatusCode::NOT_IMPLEMENTED,
            ProblemType::MALFORMED,
            "account recovery not implemented",
        )
        .into())
    }

    fn post_authorization(
        &self,
        key: &Jwk,
        _uri: &str,
        req: types::Authorization,
    ) -> Result<(types::Authorization, HttpMeta), Error> {
        match req.resource {
            ResourceType::NewAuthz => {
                let id = AcmeIdentifier::from_wire(&req.identifier).map_err(|err| {
                    ServerError::problem(
                        StatusCode::BAD_REQUEST,
                        ProblemType::MALFORMED,
                        err.to_string(),
                    )
                })?;
                let authz = self.server.account(key).authorize_identity(&id)?;

                let mut meta = HttpMeta {
                    status: Some(StatusCode::CREATED),
                    headers: HeaderMap::new(),
                };
                set_header(&mut meta.headers, header::LOCATION, &authz.uri)?;
                add_link(&mut meta.headers, "next", &self.directory.new_cert)?;
                Ok((authz.to_wire(ResourceType::Authz), meta))
            }

            _ => Err(bad_resource()),
        }
    }

    fn authorization(&self, uri: &str) -> Result<(types::Authorization, HttpMeta), Error> {
        let authz = self.server.authorization(uri)?;

        let mut meta = HttpMeta::default();
        set_header(&mut meta.headers, header::LOCATION, &authz.uri)?;
        if !authz.retry_after.is_zero() {
            set_retry_after(&mut meta.headers, authz.retry_after)?;
            meta.status = Some(StatusCode::ACCEPTED);
        } else {
            add_link(&mut meta.headers, "next", &self.directory.new_cert)?;
        }
        Ok((authz.to_wire(ResourceType::Authz), meta))
    }

    fn post_response(
        &self,
        key: &Jwk,
        uri: &str,
        req: ChallengeResponse,
    ) -> Result<(Challenge, HttpMeta), Error> {
        match req.resource() {
            Some(ResourceType::Challenge) => {
                let challenge = self.server.account(key).validate_challenge(uri, &req)?;
                Ok((challenge, HttpMeta::default()))
            }
            _ => Err(bad_resource()),
        }
    }

    fn post_certificate_issuance(
        &self,
        key: &Jwk,
        _uri: &str,
        req: CertificateIssuance,
    ) -> Result<(Option<Vec<u8>>, HttpMeta), Error> {
        match req.resource {
            ResourceType::NewCert => {
                let cert = self
                    .server
                    .account(key)
                    .issue_certificate(req.csr.as_bytes())?;

                let mut meta = HttpMeta::default();
                set_header(&mut meta.headers, header::LOCATION, &cert.uri)?;
                for issuer in &cert.issuer_uris {
                    add_link(&mut meta.headers, types::LINK_UP, issuer)?;
                }
                match cert.retry_after.filter(|d| !d.is_zero()) {
                    Some(retry_after) => {
                        set_retry_after(&mut meta.headers, retry_after)?;
                        meta.status = Some(StatusCode::ACCEPTED);
                        Ok((None, meta))
                    }
                    None => {
                        add_link(&mut meta.headers, "revoke", &self.directory.revoke_cert)?;
                        meta.status = Some(StatusCode::CREATED);
                        Ok((Some(cert.bytes), meta))
                    }
                }
            }

            _ => Err(bad_resource()),
        }
    }

    fn certificate(&self, uri: &str) -> Result<(Vec<u8>, HttpMeta), Error> {
        let cert = self.server.certificate(uri)?;

        let mut meta = HttpMeta::default();
        set_header(&mut meta.headers, header::LOCATION, &cert.uri)?;
        for issuer in &cert.issuer_uris {
            add_link(&mut meta.headers, types::LINK_UP, issuer)?;
        }
        add_link(&mut meta.headers, "revoke", &self.directory.revoke_cert)?;
        Ok((cert.bytes, meta))
    }

    fn post_certificate_revocation(
        &self,
        key: &Jwk,
        _uri: &str,
        req: CertificateRevocation,
    ) -> Result<HttpMeta, Error> {
        match req.resource {
            ResourceType::RevokeCert => {
                self.server
                    .account(key)
                    .revoke_certificate(req.certificate.as_bytes())?;
                Ok(HttpMeta::default())
            }
            _ => Err(bad_resource()),
        }
    }
}

/// The directory for a server mounted at `root` under Boulder paths.
/// `root` must be absolute.
pub fn boulder_directory(root: &str) -> Directory {
    let root = root.trim_end_matches('/');
    Directory {
        new_reg: format!("{root}{}", paths::NEW_REG),
        recover_reg: String::new(),
        new_authz: format!("{root}{}", paths::NEW_AUTHZ),
        new_cert: format!("{root}{}", paths::NEW_CERT),
        revoke_cert: format!("{root}{}", paths::REVOKE_CERT),
    }
}

/// Assemble the full server stack for Boulder-compatible paths: facade,
/// dispatcher and path mux.
pub fn boulder_mux<S: Server>(
    root: &str,
    server: S,
    nonces: Arc<dyn NonceSource>,
    verifier: Arc<dyn Verifier>,
) -> BoulderMux<ServerFacade<S>> {
    let facade = ServerFacade::new(server, boulder_directory(root));
    BoulderMux::new(Dispatcher::new(facade, nonces, verifier))
}

fn registration_meta(reg: &Registration, directory: &Directory) -> Result<HttpMeta, Error> {
    let mut meta = HttpMeta::default();
    if let Some(uri) = &reg.uri {
        set_header(&mut meta.headers, header::LOCATION, uri)?;
    }
    if let Some(terms) = &reg.terms_of_service_uri {
        add_link(&mut meta.headers, "terms-of-service", terms)?;
    }
    add_link(&mut meta.headers, "next", &directory.new_authz)?;
    Ok(meta)
}

fn bad_resource() -> Error {
    ServerError::problem(
        StatusCode::BAD_REQUEST,
        ProblemType::MALFORMED,
        "bad resource",
    )
    .into()
}

fn set_header(
    headers: &mut HeaderMap,
    name: header::HeaderName,
    value: &str,
) -> Result<(), Error> {
    headers.insert(
        name,
        HeaderValue::from_str(value).map_err(|_| Error::Str("invalid header value"))?,
    );
    Ok(())
}

fn add_link(headers: &mut HeaderMap, rel: &str, url: &str) -> Result<(), Error> {
    if url.is_empty() {
        return Ok(());
    }
    let value = format!("<{url}>;rel=\"{rel}\"");
    headers.append(
        LINK,
        HeaderValue::from_str(&value).map_err(|_| Error::Str("invalid header value"))?,
    );
    Ok(())
}

// Rounds up to whole seconds.
fn set_retry_after(headers: &mut HeaderMap, delay: std::time::Duration) -> Result<(), Error> {
    let seconds = (delay.as_millis() + 999) / 1000;
    set_header(headers, header::RETRY_AFTER, &seconds.to_string())
}
