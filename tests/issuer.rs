//! End-to-end issuance scenarios against a stub account.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use acmev1::challenge::{
    self, Challenge, ChallengeResponse, ChallengeType, GenericChallenge, GenericResponse,
};
use acmev1::issuer::{CertificateIssuer, IssuingAccount, SigningRequest};
use acmev1::solver::{Solver, StopFn};
use acmev1::types::{Error, ResourceType, Status};
use acmev1::{AcmeIdentifier, Authorization, Certificate};
use tokio::sync::mpsc;

fn generic_challenge(kind: ChallengeType, uri: &str) -> Challenge {
    Challenge::Generic(GenericChallenge {
        resource: Some(ResourceType::Challenge),
        kind: Some(kind),
        uri: uri.to_owned(),
        ..GenericChallenge::default()
    })
}

fn authorization(
    name: &str,
    uri: &str,
    status: Status,
    challenges: Vec<Challenge>,
    combinations: Vec<Vec<usize>>,
) -> Authorization {
    Authorization {
        identifier: AcmeIdentifier::Dns(name.to_owned()),
        status,
        expires: None,
        challenges,
        combinations,
        uri: uri.to_owned(),
        retry_after: Duration::ZERO,
    }
}

fn csr(common_name: &str, dns_names: &[&str]) -> SigningRequest {
    SigningRequest {
        der: b"fake-csr-der".to_vec(),
        common_name: Some(common_name.to_owned()),
        dns_names: dns_names.iter().map(|n| n.to_string()).collect(),
    }
}

fn certificate() -> Certificate {
    Certificate {
        bytes: b"hello".to_vec(),
        uri: "http://ex/acme/cert/4".to_owned(),
        issuer_uris: vec!["http://ex/i1".to_owned()],
        retry_after: None,
    }
}

struct StubAccount {
    authorize_results: HashMap<String, Authorization>,
    authorize_seen: Arc<Mutex<Vec<String>>>,
    /// Per-URI status sequence for polls; the last entry repeats.
    polls: Arc<Mutex<HashMap<String, Vec<Status>>>>,
    poll_retry: Duration,
    poll_tx: Option<mpsc::UnboundedSender<()>>,
    validate_status: Status,
    validated: Arc<Mutex<Vec<String>>>,
    issued: Arc<Mutex<Vec<Vec<u8>>>>,
    certificate: Certificate,
}

impl StubAccount {
    fn new() -> StubAccount {
        StubAccount {
            authorize_results: HashMap::new(),
            authorize_seen: Arc::new(Mutex::new(Vec::new())),
            polls: Arc::new(Mutex::new(HashMap::new())),
            poll_retry: Duration::ZERO,
            poll_tx: None,
            validate_status: Status::Pending,
            validated: Arc::new(Mutex::new(Vec::new())),
            issued: Arc::new(Mutex::new(Vec::new())),
            certificate: certificate(),
        }
    }
}

impl IssuingAccount for StubAccount {
    async fn authorize_identity(&self, id: &AcmeIdentifier) -> Result<Authorization, Error> {
        self.authorize_seen.lock().unwrap().push(id.to_string());
        self.authorize_results
            .get(id.value())
            .cloned()
            .ok_or(Error::Str("unexpected identifier"))
    }

    async fn authorization(&self, uri: &str) -> Result<Authorization, Error> {
        let status = {
            let mut polls = self.polls.lock().unwrap();
            let sequence = polls
                .get_mut(uri)
                .ok_or(Error::Str("unknown authorization"))?;
            if sequence.len() > 1 {
                sequence.remove(0)
            } else {
                sequence[0]
            }
        };
        if let Some(tx) = &self.poll_tx {
            let _ = tx.send(());
        }
        Ok(Authorization {
            status,
            retry_after: self.poll_retry,
            ..authorization("polled.example.com", uri, status, Vec::new(), Vec::new())
        })
    }

    async fn validate_challenge(
        &self,
        uri: &str,
        response: &ChallengeResponse,
    ) -> Result<Challenge, Error> {
        self.validated.lock().unwrap().push(uri.to_owned());
        Ok(Challenge::Generic(GenericChallenge {
            resource: Some(ResourceType::Challenge),
            kind: response.kind().cloned(),
            status: Some(self.validate_status),
            ..GenericChallenge::default()
        }))
    }

    async fn issue_certificate(&self, csr: &[u8]) -> Result<Certificate, Error> {
        self.issued.lock().unwrap().push(csr.to_vec());
        Ok(self.certificate.clone())
    }
}

struct StubSolver {
    costs: HashMap<&'static str, f64>,
    solve_count: Arc<AtomicUsize>,
    stop_count: Arc<AtomicUsize>,
    /// Drop one response to simulate a broken solver.
    short_response: bool,
}

impl StubSolver {
    fn new(costs: HashMap<&'static str, f64>) -> StubSolver {
        StubSolver {
            costs,
            solve_count: Arc::new(AtomicUsize::new(0)),
            stop_count: Arc::new(AtomicUsize::new(0)),
            short_response: false,
        }
    }
}

impl Solver for StubSolver {
    fn cost(&self, challenges: &[Challenge]) -> Result<f64, Error> {
        challenges
            .iter()
            .map(|c| {
                c.kind()
                    .and_then(|k| self.costs.get(k.as_str()))
                    .copied()
                    .ok_or(Error::Unsolvable)
            })
            .sum()
    }

    fn solve(&self, challenges: &[Challenge]) -> Result<(Vec<ChallengeResponse>, StopFn), Error> {
        self.solve_count.fetch_add(1, Ordering::SeqCst);
        let mut responses: Vec<ChallengeResponse> = challenges
            .iter()
            .map(|c| {
                ChallengeResponse::Generic(GenericResponse {
                    resource: c.resource(),
                    kind: c.kind().cloned(),
                })
            })
            .collect();
        if self.short_response {
            responses.pop();
        }
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

fn dns01_costs() -> HashMap<&'static str, f64> {
    HashMap::from([("dns-01", 1.0)])
}

#[tokio::test]
async fn happy_issuance_with_dns01() {
    let mut account = StubAccount::new();
    account.authorize_results.insert(
        "a.example.com".to_owned(),
        authorization(
            "a.example.com",
            "http://ex/acme/authz/1",
            Status::Pending,
            vec![generic_challenge(challenge::DNS01, "http://ex/acme/challenge/1")],
            vec![vec![0]],
        ),
    );
    account
        .polls
        .lock()
        .unwrap()
        .insert("http://ex/acme/authz/1".to_owned(), vec![Status::Valid]);

    let solver = StubSolver::new(dns01_costs());
    let stop_count = Arc::clone(&solver.stop_count);

    let issuer = CertificateIssuer::new(account);
    let cert = issuer
        .authorize_and_issue(&csr("a.example.com", &[]), &solver)
        .await
        .unwrap();

    assert_eq!(cert.bytes, b"hello");
    assert_eq!(cert.issuer_uris, vec!["http://ex/i1"]);
    assert_eq!(stop_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn already_valid_authorizations_skip_the_solver() {
    let mut account = StubAccount::new();
    for name in ["a.example.com", "b.example.com"] {
        account.authorize_results.insert(
            name.to_owned(),
            authorization(name, "http://ex/acme/authz/0", Status::Valid, Vec::new(), Vec::new()),
        );
    }

    let solver = StubSolver::new(dns01_costs());
    let solve_count = Arc::clone(&solver.solve_count);
    let authorize_seen = Arc::clone(&account.authorize_seen);

    let issuer = CertificateIssuer::new(account);
    let cert = issuer
        .authorize_and_issue(&csr("a.example.com", &["b.example.com", "a.example.com"]), &solver)
        .await
        .unwrap();

    assert_eq!(cert.uri, "http://ex/acme/cert/4");
    assert_eq!(solve_count.load(Ordering::SeqCst), 0);

    // Names were deduplicated before authorization.
    let mut seen = authorize_seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["dns:a.example.com", "dns:b.example.com"]);
}

#[tokio::test(start_paused = true)]
async fn pending_authorization_polls_until_valid() {
    let mut account = StubAccount::new();
    account.authorize_results.insert(
        "a.example.com".to_owned(),
        authorization(
            "a.example.com",
            "http://ex/acme/authz/1",
            Status::Pending,
            vec![generic_challenge(challenge::DNS01, "http://ex/acme/challenge/1")],
            vec![vec![0]],
        ),
    );
    account.polls.lock().unwrap().insert(
        "http://ex/acme/authz/1".to_owned(),
        vec![Status::Pending, Status::Valid],
    );
    account.poll_retry = Duration::from_secs(1);

    let solver = StubSolver::new(dns01_costs());
    let polls = Arc::clone(&account.polls);
    let started = tokio::time::Instant::now();

    let issuer = CertificateIssuer::new(account);
    let cert = issuer
        .authorize_and_issue(&csr("a.example.com", &[]), &solver)
        .await
        .unwrap();

    assert_eq!(cert.bytes, b"hello");
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2),
        "slept {elapsed:?}"
    );
    // Both poll results were consumed: pending first, then valid.
    assert_eq!(polls.lock().unwrap()["http://ex/acme/authz/1"], vec![Status::Valid]);
}

#[tokio::test]
async fn invalid_authorization_fails_before_solving() {
    let mut account = StubAccount::new();
    account.authorize_results.insert(
        "b.example.com".to_owned(),
        authorization(
            "b.example.com",
            "http://ex/acme/authz/2",
            Status::Invalid,
            Vec::new(),
            Vec::new(),
        ),
    );

    let solver = StubSolver::new(dns01_costs());
    let solve_count = Arc::clone(&solver.solve_count);
    let issued = Arc::clone(&account.issued);

    let issuer = CertificateIssuer::new(account);
    let err = issuer
        .authorize_and_issue(&csr("b.example.com", &[]), &solver)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "authorization invalid for \"b.example.com\"");
    assert_eq!(solve_count.load(Ordering::SeqCst), 0);
    assert!(issued.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_wakes_the_polling_sleep() {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut account = StubAccount::new();
    account.authorize_results.insert(
        "a.example.com".to_owned(),
        authorization(
            "a.example.com",
            "http://ex/acme/authz/1",
            Status::Pending,
            vec![generic_challenge(challenge::DNS01, "http://ex/acme/challenge/1")],
            vec![vec![0]],
        ),
    );
    account
        .polls
        .lock()
        .unwrap()
        .insert("http://ex/acme/authz/1".to_owned(), vec![Status::Pending]);
    account.poll_retry = Duration::from_secs(10);
    account.poll_tx = Some(tx);

    let solver = Arc::new(StubSolver::new(dns01_costs()));
    let stop_count = Arc::clone(&solver.stop_count);
    let issuer = Arc::new(CertificateIssuer::new(account));

    let started = std::time::Instant::now();
    let task = tokio::spawn({
        let issuer = Arc::clone(&issuer);
        let solver = Arc::clone(&solver);
        async move {
            issuer
                .authorize_and_issue(&csr("a.example.com", &[]), solver.as_ref())
                .await
        }
    });

    // Cancel once the first poll has gone to sleep.
    rx.recv().await.unwrap();
    issuer.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Canceled));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancel did not wake the sleeper"
    );
    assert_eq!(stop_count.load(Ordering::SeqCst), 1);

    // A canceled issuer fails new invocations early.
    let err = issuer
        .authorize_and_issue(&csr("a.example.com", &[]), solver.as_ref())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

#[tokio::test]
async fn unsolvable_challenges_report_the_authorizations()  {
    let mut account = StubAccount::new();
    account.authorize_results.insert(
        "a.example.com".to_owned(),
        authorization(
            "a.example.com",
            "http://ex/acme/authz/1",
            Status::Pending,
            vec![generic_challenge(
                challenge::TLS_SNI01,
                "http://ex/acme/challenge/1",
            )],
            vec![vec![0]],
        ),
    );

    let solver = StubSolver::new(dns01_costs());
    let issuer = CertificateIssuer::new(account);
    let err = issuer
        .authorize_and_issue(&csr("a.example.com", &[]), &solver)
        .await
        .unwrap_err();

    match &err {
        Error::Authorization(wrapped) => {
            assert!(matches!(*wrapped.error, Error::Unsolvable));
        }
        other => panic!("expected authorization error, got {other}"),
    }
    assert!(err.to_string().contains("(tls-sni-01)"), "got: {err}");
}

#[tokio::test]
async fn failed_challenge_notification_still_stops_the_solver() {
    let mut account = StubAccount::new();
    account.authorize_results.insert(
        "a.example.com".to_owned(),
        authorization(
            "a.example.com",
            "http://ex/acme/authz/1",
            Status::Pending,
            vec![generic_challenge(challenge::DNS01, "http://ex/acme/challenge/1")],
            vec![vec![0]],
        ),
    );
    account.validate_status = Status::Invalid;

    let solver = StubSolver::new(dns01_costs());
    let stop_count = Arc::clone(&solver.stop_count);
    let issued = Arc::clone(&account.issued);

    let issuer = CertificateIssuer::new(account);
    let err = issuer
        .authorize_and_issue(&csr("a.example.com", &[]), &solver)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ChallengeFailed(_)));
    assert_eq!(stop_count.load(Ordering::SeqCst), 1);
    assert!(issued.lock().unwrap().is_empty());
}

#[tokio::test]
async fn short_solver_response_is_a_solver_bug() {
    let mut account = StubAccount::new();
    account.authorize_results.insert(
        "a.example.com".to_owned(),
        authorization(
            "a.example.com",
            "http://ex/acme/authz/1",
            Status::Pending,
            vec![generic_challenge(challenge::DNS01, "http://ex/acme/challenge/1")],
            vec![vec![0]],
        ),
    );

    let mut solver = StubSolver::new(dns01_costs());
    solver.short_response = true;
    let stop_count = Arc::clone(&solver.stop_count);
    let validated = Arc::clone(&account.validated);

    let issuer = CertificateIssuer::new(account);
    let err = issuer
        .authorize_and_issue(&csr("a.example.com", &[]), &solver)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SolverMismatch { .. }));
    // solve() succeeded, so its resources were released.
    assert_eq!(stop_count.load(Ordering::SeqCst), 1);
    assert!(validated.lock().unwrap().is_empty());
}
