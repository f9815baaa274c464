//! High-level account operations against an ACME v1 server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::{Response, StatusCode};

use crate::crypto::SigningKey;
use crate::issuer::IssuingAccount;
use crate::jws::Jwk;
use crate::ops;
use crate::transport::{HttpClient, Transport};
use crate::types::{
    self, CertificateIssuance, CertificateRevocation, Error, LINK, RETRY_AFTER, RecoveryKey,
    ResourceType,
};
use crate::{AcmeIdentifier, Authorization, Certificate, Registration};

/// Options for creating or updating a registration.
#[derive(Default)]
pub struct RegistrationOptions {
    /// Contact URIs, e.g. `mailto:` addresses.
    pub contact_uris: Vec<String>,
    /// The terms-of-service URI being agreed to.
    pub agreement_uri: Option<String>,
    /// Recovery key material to establish during registration.
    pub recovery_material: Option<RecoveryMaterial>,
}

impl RegistrationOptions {
    /// No options.
    pub fn new() -> RegistrationOptions {
        RegistrationOptions::default()
    }

    /// Set the contact URIs.
    pub fn contact(mut self, uris: impl IntoIterator<Item = String>) -> Self {
        self.contact_uris = uris.into_iter().collect();
        self
    }

    /// Agree to the given terms-of-service URI.
    pub fn agreement(mut self, uri: impl Into<String>) -> Self {
        self.agreement_uri = Some(uri.into());
        self
    }

    /// Offer recovery key material.
    pub fn recovery_material(mut self, material: RecoveryMaterial) -> Self {
        self.recovery_material = Some(material);
        self
    }

    fn is_empty(&self) -> bool {
        self.contact_uris.is_empty()
            && self.agreement_uri.is_none()
            && self.recovery_material.is_none()
    }

    fn apply(&self, req: &mut types::Registration) {
        req.contact_uris = self.contact_uris.clone();
        req.agreement_uri = self.agreement_uri.clone();
        if let Some(material) = &self.recovery_material {
            req.recovery_key = Some(RecoveryKey {
                client: Some(material.public_key.clone()),
                server: None,
                length: Some(material.length),
            });
        }
    }
}

/// The client's half of a recovery key exchange. Only the public half
/// goes on the wire; the caller retains the private half.
pub struct RecoveryMaterial {
    /// The public JWK offered to the server.
    pub public_key: Jwk,
    /// Requested key length.
    pub length: usize,
}

/// A client for one ACME account, bound to its key.
///
/// Caches the directory and (for enumerations) the current registration.
/// Instances serialize their requests; they are not meant for concurrent
/// calls on one account.
pub struct ClientAccount {
    uri: Mutex<String>,
    dir_uri: String,
    transport: Transport,
    directory: Mutex<Option<types::Directory>>,
    registration: Mutex<Option<types::Registration>>,
}

impl ClientAccount {
    /// Connect to an existing account: directory URI, registration URI
    /// and the account key. Performs a HEAD against the directory to
    /// validate it and seed the nonce pool.
    pub async fn new(
        dir_uri: impl Into<String>,
        reg_uri: impl Into<String>,
        key: Arc<dyn SigningKey>,
        http: Box<dyn HttpClient>,
    ) -> Result<ClientAccount, Error> {
        let dir_uri = dir_uri.into();
        let transport = Transport::new(http, Some(key), dir_uri.clone());
        transport.head(&dir_uri).await?;

        Ok(ClientAccount {
            uri: Mutex::new(reg_uri.into()),
            dir_uri,
            transport,
            directory: Mutex::new(None),
            registration: Mutex::new(None),
        })
    }

    /// Register a new account and return a client for it.
    pub async fn register(
        dir_uri: impl Into<String>,
        key: Arc<dyn SigningKey>,
        http: Box<dyn HttpClient>,
        options: RegistrationOptions,
    ) -> Result<(ClientAccount, Registration), Error> {
        let account = ClientAccount::new(dir_uri, String::new(), key, http).await?;
        let new_reg = account.directory().await?.new_reg;

        let (registration, location) = do_registration(
            &account.transport,
            &new_reg,
            types::Registration::new(ResourceType::NewReg),
            &options,
        )
        .await?;

        let location = location.ok_or(Error::MissingHeader("Location"))?;
        *account.uri.lock().expect("account uri poisoned") = location;

        Ok((account, registration))
    }

    /// The registration URI of this account.
    pub fn uri(&self) -> String {
        self.uri.lock().expect("account uri poisoned").clone()
    }

    /// Change one or more aspects of the registration.
    pub async fn update_registration(
        &self,
        options: RegistrationOptions,
    ) -> Result<Registration, Error> {
        if options.is_empty() {
            return Err(Error::Str("nothing to update"));
        }
        let (registration, _) = do_registration(
            &self.transport,
            &self.uri(),
            types::Registration::new(ResourceType::Reg),
            &options,
        )
        .await?;
        Ok(registration)
    }

    /// Fetch the current registration resource.
    pub async fn registration(&self) -> Result<Registration, Error> {
        let (registration, _) = do_registration(
            &self.transport,
            &self.uri(),
            types::Registration::new(ResourceType::Reg),
            &RegistrationOptions::default(),
        )
        .await?;
        Ok(registration)
    }

    /// Start an authorization flow for the given identifier. The result
    /// may be pending and require solving challenges.
    pub async fn authorize_identity(
        &self,
        identifier: &AcmeIdentifier,
    ) -> Result<Authorization, Error> {
        let new_authz = self.directory().await?.new_authz;
        let request =
            types::Authorization::request(ResourceType::NewAuthz, identifier.to_wire());
        let (authz, rsp) = ops::post_authorization(&self.transport, &new_authz, &request).await?;

        if rsp.status() != StatusCode::CREATED {
            return Err(Error::UnexpectedStatus {
                op: "authorize identity",
                status: rsp.status(),
            });
        }

        client_authorization(authz, &rsp, &new_authz)
    }

    /// Fetch an existing authorization.
    pub async fn authorization(&self, uri: &str) -> Result<Authorization, Error> {
        let (authz, rsp) = ops::get_authorization(&self.transport, uri).await?;

        match rsp.status() {
            StatusCode::OK | StatusCode::ACCEPTED => {}
            status => {
                return Err(Error::UnexpectedStatus {
                    op: "get authorization",
                    status,
                });
            }
        }

        client_authorization(authz, &rsp, uri)
    }

    /// The authorization URIs the server knows for this account.
    /// [`Error::Unsupported`] if the server does not advertise the index.
    pub async fn authorization_uris(&self) -> Result<Vec<String>, Error> {
        let registration = self.cached_registration().await?;
        let index = registration
            .authorizations_uri
            .ok_or(Error::Unsupported)?;

        let (uris, rsp) = ops::get_authorization_uris(&self.transport, &index).await?;
        if rsp.status() != StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                op: "get authorization URIs",
                status: rsp.status(),
            });
        }
        Ok(uris.authorizations)
    }

    /// Notify the server that a challenge is ready to be validated. Keep
    /// the solver running until the authorization leaves pending state.
    pub async fn validate_challenge(
        &self,
        uri: &str,
        response: &crate::challenge::ChallengeResponse,
    ) -> Result<crate::challenge::Challenge, Error> {
        let (challenge, rsp) = ops::post_response(&self.transport, uri, response).await?;

        // The protocol says 200 OK here; Boulder answers 202.
        match rsp.status() {
            StatusCode::OK | StatusCode::ACCEPTED => Ok(challenge),
            status => Err(Error::UnexpectedStatus {
                op: "validate challenge",
                status,
            }),
        }
    }

    /// Sign a CSR, blocking until the server completes the request.
    pub async fn issue_certificate(&self, csr: &[u8]) -> Result<Certificate, Error> {
        let new_cert = self.directory().await?.new_cert;
        let request = CertificateIssuance {
            resource: ResourceType::NewCert,
            csr: csr.to_vec().into(),
        };
        let (der, rsp) =
            ops::post_certificate_issuance(&self.transport, &new_cert, &request).await?;

        if rsp.status() != StatusCode::CREATED {
            return Err(Error::UnexpectedStatus {
                op: "issue certificate",
                status: rsp.status(),
            });
        }

        // Servers SHOULD provide Content-Location for the stable URI.
        // Boulder does not, so fall back to Location.
        let uri = header_str(&rsp, "Content-Location")
            .or_else(|| header_str(&rsp, "Location"))
            .ok_or(Error::MissingHeader("Content-Location"))?
            .to_owned();

        if !der.is_empty() {
            return Ok(Certificate {
                bytes: der,
                uri,
                issuer_uris: links(&rsp, "up"),
                retry_after: None,
            });
        }

        tokio::time::sleep(retry_after(&rsp, Duration::from_secs(1))).await;
        self.certificate(&uri).await
    }

    /// Fetch an existing certificate, sleeping out `Retry-After` while it
    /// is pending.
    pub async fn certificate(&self, uri: &str) -> Result<Certificate, Error> {
        loop {
            let (der, rsp) = ops::get_certificate(&self.transport, uri).await?;

            match rsp.status() {
                StatusCode::OK => {
                    return Ok(Certificate {
                        bytes: der,
                        uri: uri.to_owned(),
                        issuer_uris: links(&rsp, "up"),
                        retry_after: None,
                    });
                }
                StatusCode::ACCEPTED => {}
                status => {
                    return Err(Error::UnexpectedStatus {
                        op: "get certificate",
                        status,
                    });
                }
            }

            tokio::time::sleep(retry_after(&rsp, Duration::from_secs(1))).await;
        }
    }

    /// The certificate URIs the server knows for this account.
    pub async fn certificate_uris(&self) -> Result<Vec<String>, Error> {
        let registration = self.cached_registration().await?;
        let index = registration.certificates_uri.ok_or(Error::Unsupported)?;

        let (uris, rsp) = ops::get_certificate_uris(&self.transport, &index).await?;
        if rsp.status() != StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                op: "get certificate URIs",
                status: rsp.status(),
            });
        }
        Ok(uris.certificates)
    }

    /// Revoke a certificate, given exactly the DER returned at issuance.
    pub async fn revoke_certificate(&self, cert: &[u8]) -> Result<(), Error> {
        let revoke_cert = self.directory().await?.revoke_cert;
        let request = CertificateRevocation {
            resource: ResourceType::RevokeCert,
            certificate: cert.to_vec().into(),
        };
        let rsp =
            ops::post_certificate_revocation(&self.transport, &revoke_cert, &request).await?;

        if rsp.status() != StatusCode::OK {
            return Err(Error::UnexpectedStatus {
                op: "revoke certificate",
                status: rsp.status(),
            });
        }
        Ok(())
    }

    async fn directory(&self) -> Result<types::Directory, Error> {
        if let Some(directory) = self.directory.lock().expect("cache poisoned").clone() {
            return Ok(directory);
        }
        let (directory, _) = ops::get_directory(&self.transport, &self.dir_uri).await?;
        *self.directory.lock().expect("cache poisoned") = Some(directory.clone());
        Ok(directory)
    }

    async fn cached_registration(&self) -> Result<types::Registration, Error> {
        if let Some(registration) = self.registration.lock().expect("cache poisoned").clone() {
            return Ok(registration);
        }
        let (registration, _) = ops::post_registration(
            &self.transport,
            &self.uri(),
            &types::Registration::new(ResourceType::Reg),
        )
        .await?;
        *self.registration.lock().expect("cache poisoned") = Some(registration.clone());
        Ok(registration)
    }
}

impl IssuingAccount for ClientAccount {
    async fn authorize_identity(&self, id: &AcmeIdentifier) -> Result<Authorization, Error> {
        ClientAccount::authorize_identity(self, id).await
    }

    async fn authorization(&self, uri: &str) -> Result<Authorization, Error> {
        ClientAccount::authorization(self, uri).await
    }

    async fn validate_challenge(
        &self,
        uri: &str,
        response: &crate::challenge::ChallengeResponse,
    ) -> Result<crate::challenge::Challenge, Error> {
        ClientAccount::validate_challenge(self, uri, response).await
    }

    async fn issue_certificate(&self, csr: &[u8]) -> Result<Certificate, Error> {
        ClientAccount::issue_certificate(self, csr).await
    }
}

// Runs a registration request and builds the client-facing view from the
// response headers.
async fn do_registration(
    transport: &Transport,
    uri: &str,
    mut request: types::Registration,
    options: &RegistrationOptions,
) -> Result<(Registration, Option<String>), Error> {
    options.apply(&mut request);

    let (registration, rsp) = ops::post_registration(transport, uri, &request).await?;

    match rsp.status() {
        // Boulder answers reg updates with 202 Accepted.
        StatusCode::CREATED | StatusCode::ACCEPTED => {}
        status => {
            return Err(Error::UnexpectedStatus {
                op: "registration",
                status,
            });
        }
    }

    // Offering recovery material is as far as this client goes; a
    // server-issued half has no handling yet.
    if options.recovery_material.is_some() && registration.recovery_key.is_some() {
        return Err(Error::RecoveryNotImplemented);
    }

    let location = header_str(&rsp, "Location").map(str::to_owned);
    let terms_of_service = links(&rsp, "terms-of-service").into_iter().next();

    Ok((
        Registration::from_wire(registration, location.clone(), terms_of_service),
        location,
    ))
}

fn client_authorization(
    authz: types::Authorization,
    rsp: &Response<Bytes>,
    fallback_uri: &str,
) -> Result<Authorization, Error> {
    let uri = header_str(rsp, "Location")
        .unwrap_or(fallback_uri)
        .to_owned();
    Authorization::from_wire(authz, uri, retry_after(rsp, Duration::ZERO))
}

pub(crate) fn header_str<'a>(rsp: &'a Response<Bytes>, name: &str) -> Option<&'a str> {
    rsp.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Parse `Retry-After` as whole seconds, falling back to `default`.
/// HTTP-date forms are not understood.
pub(crate) fn retry_after(rsp: &Response<Bytes>, default: Duration) -> Duration {
    rsp.headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

/// Extract `Link` header targets with the given rel. Targets are taken
/// verbatim; Boulder emits absolute URLs.
pub(crate) fn links(rsp: &Response<Bytes>, rel: &str) -> Vec<String> {
    rsp.headers()
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| parse_link(v, rel))
        .collect()
}

// One Link header value: `<target>;param=value;rel="up";...`.
fn parse_link(value: &str, rel: &str) -> Option<String> {
    let value = value.trim();
    let rest = value.strip_prefix('<')?;
    let (target, params) = rest.split_once('>')?;

    for param in params.split(';') {
        let Some((name, param_value)) = param.split_once('=') else {
            continue;
        };
        if name.trim() == "rel" && param_value.trim().trim_matches('"') == rel {
            return Some(target.to_owned());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MediaType;
    use crate::crypto::CryptoProvider;
    use crate::transport::tests::StubHttp;
    use crate::types::{REPLAY_NONCE, Status};

    fn account_key() -> Arc<dyn SigningKey> {
        Arc::from(CryptoProvider::ring().keys.generate_key().unwrap().0)
    }

    fn response(status: u16) -> http::response::Builder {
        Response::builder().status(status).header(REPLAY_NONCE, "n")
    }

    fn json_body(builder: http::response::Builder, body: &str) -> Response<Bytes> {
        builder
            .header(http::header::CONTENT_TYPE, MediaType::Json.as_str())
            .body(Bytes::from(body.to_owned()))
            .unwrap()
    }

    const DIRECTORY_BODY: &str = r#"{
        "new-reg": "http://ex/acme/new-reg",
        "new-authz": "http://ex/acme/new-authz",
        "new-cert": "http://ex/acme/new-cert",
        "revoke-cert": "http://ex/acme/revoke-cert"
    }"#;

    async fn account_with(responses: Vec<Response<Bytes>>) -> (ClientAccount, Arc<StubHttp>) {
        let mut all = vec![response(200).body(Bytes::new()).unwrap()];
        all.extend(responses);
        let stub = Arc::new(StubHttp::new(all));
        let account = ClientAccount::new(
            "http://ex/directory",
            "http://ex/acme/reg/1",
            account_key(),
            Box::new(Arc::clone(&stub)),
        )
        .await
        .unwrap();
        (account, stub)
    }

    #[test]
    fn link_parsing_matches_rel() {
        let rsp = Response::builder()
            .header(LINK, "<http://ex/i1>;rel=\"up\"")
            .header(LINK, "<http://ex/tos>;rel=\"terms-of-service\"")
            .header(LINK, "<http://ex/i2>;title=\"x\";rel=\"up\";type=\"a/b\"")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(links(&rsp, "up"), vec!["http://ex/i1", "http://ex/i2"]);
        assert_eq!(links(&rsp, "terms-of-service"), vec!["http://ex/tos"]);
        assert!(links(&rsp, "next").is_empty());
    }

    #[test]
    fn retry_after_parses_whole_seconds() {
        let rsp = Response::builder()
            .header(RETRY_AFTER, "7")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(retry_after(&rsp, Duration::ZERO), Duration::from_secs(7));

        let rsp = Response::builder()
            .header(RETRY_AFTER, "soon")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(
            retry_after(&rsp, Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[tokio::test]
    async fn register_captures_location_and_terms() {
        let reg_rsp = json_body(
            response(201)
                .header("Location", "http://ex/acme/reg/7")
                .header(LINK, "<http://ex/tos>;rel=\"terms-of-service\""),
            r#"{"resource":"reg","contact":["mailto:a@example.com"]}"#,
        );
        let stub = Arc::new(StubHttp::new(vec![
            response(200).body(Bytes::new()).unwrap(),
            json_body(response(200), DIRECTORY_BODY),
            reg_rsp,
        ]));

        let (account, registration) = ClientAccount::register(
            "http://ex/directory",
            account_key(),
            Box::new(Arc::clone(&stub)),
            RegistrationOptions::new().contact(["mailto:a@example.com".to_owned()]),
        )
        .await
        .unwrap();

        assert_eq!(account.uri(), "http://ex/acme/reg/7");
        assert_eq!(registration.uri.as_deref(), Some("http://ex/acme/reg/7"));
        assert_eq!(
            registration.terms_of_service_uri.as_deref(),
            Some("http://ex/tos")
        );
    }

    #[tokio::test]
    async fn server_issued_recovery_key_is_rejected() {
        let reg_rsp = json_body(
            response(201).header("Location", "http://ex/acme/reg/7"),
            r#"{"resource":"reg","recoveryKey":{"length":32}}"#,
        );
        let stub = Arc::new(StubHttp::new(vec![
            response(200).body(Bytes::new()).unwrap(),
            json_body(response(200), DIRECTORY_BODY),
            reg_rsp,
        ]));

        let material = RecoveryMaterial {
            public_key: CryptoProvider::ring()
                .keys
                .generate_key()
                .unwrap()
                .0
                .public_jwk(),
            length: 32,
        };
        let Err(err) = ClientAccount::register(
            "http://ex/directory",
            account_key(),
            Box::new(Arc::clone(&stub)),
            RegistrationOptions::new().recovery_material(material),
        )
        .await
        else {
            panic!("expected an error");
        };
        assert!(matches!(err, Error::RecoveryNotImplemented));
    }

    #[tokio::test]
    async fn authorize_identity_normalizes_the_response() {
        let authz_rsp = json_body(
            response(201)
                .header("Location", "http://ex/acme/authz/1")
                .header(RETRY_AFTER, "3"),
            // No status: defaults to pending.
            r#"{"resource":"authz","identifier":{"type":"dns","value":"a.example.com"}}"#,
        );
        let (account, _stub) = account_with(vec![
            json_body(response(200), DIRECTORY_BODY),
            authz_rsp,
        ])
        .await;

        let authz = account
            .authorize_identity(&AcmeIdentifier::Dns("a.example.com".to_owned()))
            .await
            .unwrap();
        assert_eq!(authz.status, Status::Pending);
        assert_eq!(authz.uri, "http://ex/acme/authz/1");
        assert_eq!(authz.retry_after, Duration::from_secs(3));
        assert_eq!(authz.identifier.to_string(), "dns:a.example.com");
    }

    #[tokio::test]
    async fn authorize_identity_requires_created() {
        let authz_rsp = json_body(
            response(200).header("Location", "http://ex/acme/authz/1"),
            r#"{"resource":"authz","identifier":{"type":"dns","value":"a.example.com"}}"#,
        );
        let (account, _stub) = account_with(vec![
            json_body(response(200), DIRECTORY_BODY),
            authz_rsp,
        ])
        .await;

        let err = account
            .authorize_identity(&AcmeIdentifier::Dns("a.example.com".to_owned()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedStatus { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn issue_certificate_prefers_content_location_and_polls() {
        let issue_rsp = response(201)
            .header("Location", "http://ex/unstable")
            .header("Content-Location", "http://ex/acme/cert/1")
            .header(RETRY_AFTER, "2")
            .body(Bytes::new())
            .unwrap();
        let pending_rsp = response(202)
            .header(RETRY_AFTER, "2")
            .body(Bytes::new())
            .unwrap();
        let cert_rsp = response(200)
            .header(http::header::CONTENT_TYPE, MediaType::PkixCert.as_str())
            .header(LINK, "<http://ex/i1>;rel=\"up\"")
            .body(Bytes::from_static(b"hello"))
            .unwrap();
        let (account, stub) = account_with(vec![
            json_body(response(200), DIRECTORY_BODY),
            issue_rsp,
            pending_rsp,
            cert_rsp,
        ])
        .await;

        let cert = account.issue_certificate(b"csr-der").await.unwrap();
        assert_eq!(cert.bytes, b"hello");
        assert_eq!(cert.uri, "http://ex/acme/cert/1");
        assert_eq!(cert.issuer_uris, vec!["http://ex/i1"]);

        let requests = stub.requests.lock().unwrap();
        // HEAD, GET directory, POST new-cert, then two GETs on the
        // Content-Location.
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[3].1, "http://ex/acme/cert/1");
        assert_eq!(requests[4].1, "http://ex/acme/cert/1");
    }

    #[tokio::test]
    async fn enumerations_require_advertised_index() {
        let reg_rsp = json_body(
            response(202),
            r#"{"resource":"reg","contact":["mailto:a@example.com"]}"#,
        );
        let (account, _stub) = account_with(vec![reg_rsp]).await;

        let err = account.authorization_uris().await.unwrap_err();
        assert!(matches!(err, Error::Unsupported));
    }
}
