//! Full-stack exercise without sockets: the real client transport signs
//! requests that flow straight into the real dispatcher, facade and an
//! in-memory server.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use acmev1::challenge::{
    self, Challenge, ChallengeResponse, Http01Challenge, key_authorization, respond_http01,
};
use acmev1::crypto::{CryptoProvider, SigningAlgorithm, SigningKey, Verifier};
use acmev1::dispatch::BoulderMux;
use acmev1::issuer::{CertificateIssuer, SigningRequest};
use acmev1::jws::Jwk;
use acmev1::nonce::SequenceNonceSource;
use acmev1::server::{self, Server, ServerAccount, ServerFacade};
use acmev1::solver::{Solver, StopFn};
use acmev1::transport::HttpClient;
use acmev1::types::{self, Error, Status};
use acmev1::{
    AcmeIdentifier, Authorization, Certificate, ClientAccount, Registration, RegistrationOptions,
};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};

const ROOT: &str = "http://ex";

struct RingVerifier;

impl Verifier for RingVerifier {
    fn verify(
        &self,
        alg: SigningAlgorithm,
        jwk: &Jwk,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        CryptoProvider::ring()
            .verifier
            .verify(alg, jwk, message, signature)
    }
}

#[derive(Default)]
struct MemState {
    next_id: u64,
    registrations: HashMap<String, Registration>,
    authorizations: HashMap<String, Authorization>,
    challenge_owner: HashMap<String, String>,
    certificates: HashMap<String, Certificate>,
    revoked: Vec<Vec<u8>>,
}

#[derive(Default)]
struct MemServer {
    state: Mutex<MemState>,
}

impl MemServer {
    fn next_id(state: &mut MemState) -> u64 {
        state.next_id += 1;
        state.next_id
    }
}

#[derive(Clone)]
struct MemServerHandle(Arc<MemServer>);

impl std::ops::Deref for MemServerHandle {
    type Target = MemServer;

    fn deref(&self) -> &MemServer {
        &self.0
    }
}

impl Server for MemServerHandle {
    fn register_account(
        &self,
        key: &Jwk,
        reg: &types::Registration,
    ) -> Result<Registration, Error> {
        let mut state = self.state.lock().unwrap();
        let id = MemServer::next_id(&mut state);
        let uri = format!("{ROOT}/acme/reg/{id}");

        let registration = Registration {
            uri: Some(uri.clone()),
            key: Some(key.clone()),
            contact_uris: reg.contact_uris.clone(),
            agreement_uri: reg.agreement_uri.clone(),
            authorizations_uri: None,
            certificates_uri: None,
            recovery_key: None,
            terms_of_service_uri: Some(format!("{ROOT}/tos")),
        };
        state.registrations.insert(uri, registration.clone());
        Ok(registration)
    }

    fn authorization(&self, uri: &str) -> Result<Authorization, Error> {
        self.state
            .lock()
            .unwrap()
            .authorizations
            .get(uri)
            .cloned()
            .ok_or(Error::Str("no such authorization"))
    }

    fn certificate(&self, uri: &str) -> Result<Certificate, Error> {
        self.state
            .lock()
            .unwrap()
            .certificates
            .get(uri)
            .cloned()
            .ok_or(Error::Str("no such certificate"))
    }

    fn account(&self, key: &Jwk) -> Box<dyn ServerAccount + '_> {
        Box::new(MemAccount {
            server: &self.0,
            key: key.clone(),
        })
    }
}

struct MemAccount<'a> {
    server: &'a MemServer,
    key: Jwk,
}

impl ServerAccount for MemAccount<'_> {
    fn authorize_identity(&self, id: &AcmeIdentifier) -> Result<Authorization, Error> {
        let mut state = self.server.state.lock().unwrap();
        let id_num = MemServer::next_id(&mut state);
        let authz_uri = format!("{ROOT}/acme/authz/{id_num}");
        let challenge_uri = format!("{ROOT}/acme/challenge/{id_num}");

        let authz = Authorization {
            identifier: id.clone(),
            status: Status::Pending,
            expires: None,
            challenges: vec![Challenge::Http01(Http01Challenge {
                resource: Some(types::ResourceType::Challenge),
                kind: Some(challenge::HTTP01),
                uri: challenge_uri.clone(),
                status: Some(Status::Pending),
                validated: None,
                error: None,
                token: format!("tok-{id_num}"),
            })],
            combinations: vec![vec![0]],
            uri: authz_uri.clone(),
            retry_after: std::time::Duration::ZERO,
        };
        state.challenge_owner.insert(challenge_uri, authz_uri.clone());
        state.authorizations.insert(authz_uri, authz.clone());
        Ok(authz)
    }

    fn issue_certificate(&self, _csr: &[u8]) -> Result<Certificate, Error> {
        let mut state = self.server.state.lock().unwrap();
        let id = MemServer::next_id(&mut state);
        let uri = format!("{ROOT}/acme/cert/{id}");

        let cert = Certificate {
            bytes: b"hello".to_vec(),
            uri: uri.clone(),
            issuer_uris: vec![format!("{ROOT}/i1")],
            retry_after: None,
        };
        state.certificates.insert(uri, cert.clone());
        Ok(cert)
    }

    fn revoke_certificate(&self, cert: &[u8]) -> Result<(), Error> {
        self.server
            .state
            .lock()
            .unwrap()
            .revoked
            .push(cert.to_vec());
        Ok(())
    }

    fn update_registration(
        &self,
        uri: &str,
        reg: &types::Registration,
    ) -> Result<Registration, Error> {
        let mut state = self.server.state.lock().unwrap();
        let registration = state
            .registrations
            .get_mut(uri)
            .ok_or(Error::Str("no such registration"))?;
        registration.contact_uris = reg.contact_uris.clone();
        Ok(registration.clone())
    }

    fn validate_challenge(
        &self,
        uri: &str,
        resp: &ChallengeResponse,
    ) -> Result<Challenge, Error> {
        // The key authorization must bind the token to the signing key.
        let ChallengeResponse::Http01(resp) = resp else {
            return Err(Error::Str("unexpected response type"));
        };

        let mut state = self.server.state.lock().unwrap();
        let authz_uri = state
            .challenge_owner
            .get(uri)
            .cloned()
            .ok_or(Error::Str("no such challenge"))?;
        let authz = state
            .authorizations
            .get_mut(&authz_uri)
            .ok_or(Error::Str("no such authorization"))?;
        let Challenge::Http01(posed) = &mut authz.challenges[0] else {
            return Err(Error::Str("unexpected challenge type"));
        };

        let expected =
            key_authorization(&posed.token, &self.key, CryptoProvider::ring().sha256);
        if resp.key_authorization != expected {
            return Err(Error::Str("key authorization mismatch"));
        }

        posed.status = Some(Status::Valid);
        let validated = Challenge::Http01(posed.clone());
        authz.status = Status::Valid;
        Ok(validated)
    }
}

/// Routes client requests straight into the mux.
struct Loopback {
    mux: Arc<BoulderMux<ServerFacade<MemServerHandle>>>,
}

impl HttpClient for Loopback {
    fn request(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Pin<Box<dyn Future<Output = Result<Response<Bytes>, Error>> + Send>> {
        let mux = Arc::clone(&self.mux);
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body.collect().await.expect("infallible body").to_bytes();
            Ok(mux.handle(&Request::from_parts(parts, body)))
        })
    }
}

struct Http01Solver {
    jwk: Jwk,
    stop_count: Arc<AtomicUsize>,
}

impl Solver for Http01Solver {
    fn cost(&self, challenges: &[Challenge]) -> Result<f64, Error> {
        if challenges
            .iter()
            .all(|c| c.kind() == Some(&challenge::HTTP01))
        {
            Ok(challenges.len() as f64)
        } else {
            Err(Error::Unsolvable)
        }
    }

    fn solve(&self, challenges: &[Challenge]) -> Result<(Vec<ChallengeResponse>, StopFn), Error> {
        let responses = challenges
            .iter()
            .map(|c| {
                let Challenge::Http01(c) = c else {
                    return Err(Error::Unsolvable);
                };
                respond_http01(&self.jwk, CryptoProvider::ring().sha256, c)
                    .map(ChallengeResponse::Http01)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let stops = Arc::clone(&self.stop_count);
        Ok((
            responses,
            Box::new(move || {
                stops.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ))
    }
}

struct Stack {
    server: Arc<MemServer>,
    key: Arc<dyn SigningKey>,
    jwk: Jwk,
}

impl Stack {
    fn new() -> Stack {
        let key: Arc<dyn SigningKey> =
            Arc::from(CryptoProvider::ring().keys.generate_key().unwrap().0);
        let jwk = key.public_jwk();
        Stack {
            server: Arc::new(MemServer::default()),
            key,
            jwk,
        }
    }

    fn client(&self) -> Box<dyn HttpClient> {
        let mux = server::boulder_mux(
            ROOT,
            MemServerHandle(Arc::clone(&self.server)),
            Arc::new(SequenceNonceSource::new()),
            Arc::new(RingVerifier),
        );
        Box::new(Loopback { mux: Arc::new(mux) })
    }
}

#[tokio::test]
async fn register_authorize_issue_and_revoke() {
    let stack = Stack::new();

    let (account, registration) = ClientAccount::register(
        format!("{ROOT}/directory"),
        Arc::clone(&stack.key),
        stack.client(),
        RegistrationOptions::new()
            .contact(["mailto:admin@example.com".to_owned()])
            .agreement(format!("{ROOT}/tos")),
    )
    .await
    .unwrap();

    assert_eq!(account.uri(), format!("{ROOT}/acme/reg/1"));
    assert_eq!(
        registration.terms_of_service_uri.as_deref(),
        Some("http://ex/tos")
    );
    assert_eq!(registration.contact_uris, vec!["mailto:admin@example.com"]);

    let solver = Http01Solver {
        jwk: stack.jwk.clone(),
        stop_count: Arc::new(AtomicUsize::new(0)),
    };
    let stop_count = Arc::clone(&solver.stop_count);

    let issuer = CertificateIssuer::new(account);
    let cert = issuer
        .authorize_and_issue(
            &SigningRequest {
                der: b"fake-csr-der".to_vec(),
                common_name: Some("a.example.com".to_owned()),
                dns_names: vec!["b.example.com".to_owned()],
            },
            &solver,
        )
        .await
        .unwrap();

    assert_eq!(cert.bytes, b"hello");
    assert_eq!(cert.issuer_uris, vec![format!("{ROOT}/i1")]);
    assert_eq!(stop_count.load(Ordering::SeqCst), 1);

    // Both names were authorized and their challenges validated.
    {
        let state = stack.server.state.lock().unwrap();
        assert_eq!(state.authorizations.len(), 2);
        assert!(
            state
                .authorizations
                .values()
                .all(|authz| authz.status == Status::Valid)
        );
    }

    // Revocation round-trips through the same stack. The issuer owns the
    // account now, so reconnect to it.
    let account = ClientAccount::new(
        format!("{ROOT}/directory"),
        format!("{ROOT}/acme/reg/1"),
        Arc::clone(&stack.key),
        stack.client(),
    )
    .await
    .unwrap();
    account.revoke_certificate(&cert.bytes).await.unwrap();
    assert_eq!(
        stack.server.state.lock().unwrap().revoked,
        vec![b"hello".to_vec()]
    );
}

#[tokio::test]
async fn update_registration_round_trips() {
    let stack = Stack::new();

    let (account, _) = ClientAccount::register(
        format!("{ROOT}/directory"),
        Arc::clone(&stack.key),
        stack.client(),
        RegistrationOptions::new(),
    )
    .await
    .unwrap();

    let updated = account
        .update_registration(
            RegistrationOptions::new().contact(["mailto:ops@example.com".to_owned()]),
        )
        .await
        .unwrap();
    assert_eq!(updated.contact_uris, vec!["mailto:ops@example.com"]);
}

#[tokio::test]
async fn wrong_account_key_is_rejected() {
    let stack = Stack::new();

    let (_, _) = ClientAccount::register(
        format!("{ROOT}/directory"),
        Arc::clone(&stack.key),
        stack.client(),
        RegistrationOptions::new(),
    )
    .await
    .unwrap();

    // A different key signs a response for a challenge posed to the
    // first account; the key authorization no longer matches.
    let other_key: Arc<dyn SigningKey> =
        Arc::from(CryptoProvider::ring().keys.generate_key().unwrap().0);
    let other = ClientAccount::new(
        format!("{ROOT}/directory"),
        format!("{ROOT}/acme/reg/1"),
        Arc::clone(&other_key),
        stack.client(),
    )
    .await
    .unwrap();

    let authz = other
        .authorize_identity(&AcmeIdentifier::Dns("a.example.com".to_owned()))
        .await
        .unwrap();
    let Challenge::Http01(posed) = &authz.challenges[0] else {
        panic!("expected http-01 challenge");
    };

    // Respond with the *first* account's key authorization.
    let response = ChallengeResponse::Http01(
        respond_http01(&stack.jwk, CryptoProvider::ring().sha256, posed).unwrap(),
    );
    let err = other
        .validate_challenge(posed.uri.as_str(), &response)
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("key authorization mismatch"),
        "got: {err}"
    );
}
