//! The certificate issuance orchestrator.
//!
//! [`CertificateIssuer`] drives an [`IssuingAccount`] end to end:
//! authorize every identifier in the CSR, pick the cheapest solvable
//! challenge combination per authorization, run the solver, notify the
//! server, poll the authorizations to completion and finally issue.
//! A running issuance can be canceled from another task; the cancel
//! signal is a one-shot broadcast that also wakes polling sleeps.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use tokio::sync::watch;

use crate::challenge::Challenge;
use crate::solver::{Solver, StopFn};
use crate::types::{Error, Status};
use crate::{AcmeIdentifier, Authorization, Certificate};

/// A parsed certificate signing request, as far as this crate needs one:
/// the DER bytes plus the names to authorize. Parsing X.509 is the
/// caller's business.
#[derive(Clone, Debug)]
pub struct SigningRequest {
    /// The DER-encoded CSR, forwarded verbatim to the server.
    pub der: Vec<u8>,
    /// The subject common name.
    pub common_name: Option<String>,
    /// The DNS subject alternative names.
    pub dns_names: Vec<String>,
}

impl SigningRequest {
    // CN plus SANs, deduplicated.
    fn names(&self) -> BTreeSet<String> {
        self.common_name
            .iter()
            .chain(self.dns_names.iter())
            .cloned()
            .collect()
    }
}

/// The account capabilities issuance needs. [`ClientAccount`]
/// (crate::ClientAccount) implements this.
#[allow(async_fn_in_trait)]
pub trait IssuingAccount {
    /// Start an authorization flow for the identifier.
    async fn authorize_identity(&self, id: &AcmeIdentifier) -> Result<Authorization, Error>;
    /// Fetch an existing authorization.
    async fn authorization(&self, uri: &str) -> Result<Authorization, Error>;
    /// Notify the server that a challenge is ready for validation.
    async fn validate_challenge(
        &self,
        uri: &str,
        response: &crate::challenge::ChallengeResponse,
    ) -> Result<crate::challenge::Challenge, Error>;
    /// Issue a certificate for the DER CSR.
    async fn issue_certificate(&self, csr: &[u8]) -> Result<Certificate, Error>;
}

/// A failure during challenge selection, carrying the authorizations
/// that were being attempted for operator diagnosis.
#[derive(Debug)]
pub struct AuthorizationError {
    /// The underlying failure.
    pub error: Box<Error>,
    /// The pending authorizations with their identifiers, combinations
    /// and challenge types.
    pub authorizations: Vec<Authorization>,
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (authorizations ", self.error)?;
        for (i, authz) in self.authorizations.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "authorization of {}, one of: ", authz.identifier)?;
            for combination in &authz.combinations {
                let kinds: Vec<&str> = combination
                    .iter()
                    .filter_map(|&i| authz.challenges.get(i))
                    .map(|c| c.kind().map_or("unknown", |k| k.as_str()))
                    .collect();
                write!(f, "({})", kinds.join(", "))?;
            }
        }
        f.write_str(")")
    }
}

impl std::error::Error for AuthorizationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.error)
    }
}

/// Authorizes and issues certificates in one go. A running issuance can
/// be canceled; a canceled issuer is not reusable.
pub struct CertificateIssuer<A> {
    account: A,
    cancel: watch::Sender<bool>,
}

impl<A: IssuingAccount> CertificateIssuer<A> {
    /// Create an issuer for the given account.
    pub fn new(account: A) -> CertificateIssuer<A> {
        CertificateIssuer {
            account,
            cancel: watch::Sender::new(false),
        }
    }

    /// Stop any running issuance and make new ones fail early with
    /// [`Error::Canceled`]. Idempotent; observed by all concurrent
    /// invocations.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    fn is_canceled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Issue a certificate for the signing request, completing any
    /// necessary identity authorizations first.
    ///
    /// The solver is consulted for the cost of every challenge
    /// combination and the cheapest solvable one per authorization is
    /// used; the cost unit does not matter but must be consistent across
    /// solvers. If one solver instance serves multiple types, combined
    /// combinations may reach it in a single `solve` call.
    pub async fn authorize_and_issue(
        &self,
        csr: &SigningRequest,
        solver: &dyn Solver,
    ) -> Result<Certificate, Error> {
        let pending = self.authorize_identities(csr).await?;

        if !pending.is_empty() {
            let challenges = best_challenges(solver, &pending).map_err(|error| {
                Error::Authorization(AuthorizationError {
                    error: Box::new(error),
                    authorizations: pending.clone(),
                })
            })?;

            let stop = self.start_solver(solver, &challenges).await?;
            let result = self.wait_authorizations(pending).await;
            if let Err(err) = stop.release() {
                log::warn!("solver stop failed: {err}");
            }
            result?;
        }

        self.account.issue_certificate(&csr.der).await
    }

    // Requests authorization for every name in the CSR. Only pending
    // authorizations are returned; any invalid one fails the issuance.
    async fn authorize_identities(
        &self,
        csr: &SigningRequest,
    ) -> Result<Vec<Authorization>, Error> {
        let mut pending = Vec::new();
        for name in csr.names() {
            if self.is_canceled() {
                return Err(Error::Canceled);
            }

            let id = AcmeIdentifier::Dns(name.clone());
            let authz = self.account.authorize_identity(&id).await?;
            match authz.status {
                Status::Pending => pending.push(authz),
                Status::Valid => {}
                Status::Invalid => return Err(Error::AuthorizationInvalid(name)),
                status => {
                    return Err(Error::UnknownAuthorizationStatus { name, status });
                }
            }
        }
        Ok(pending)
    }

    // Starts the solver and notifies the server of each response. On
    // success the returned guard owns the solver's stop handle; on any
    // failure after a successful solve the handle has already run.
    async fn start_solver(
        &self,
        solver: &dyn Solver,
        challenges: &[Challenge],
    ) -> Result<StopGuard, Error> {
        let (responses, stop) = solver.solve(challenges)?;
        let guard = StopGuard::new(stop);

        if responses.len() != challenges.len() {
            return Err(Error::SolverMismatch {
                given: challenges.len(),
                returned: responses.len(),
            });
        }

        for (challenge, response) in challenges.iter().zip(&responses) {
            if self.is_canceled() {
                return Err(Error::Canceled);
            }

            let challenge = self
                .account
                .validate_challenge(challenge.uri(), response)
                .await?;
            if challenge.status() == Some(Status::Invalid) {
                return Err(Error::ChallengeFailed(format!("{challenge:?}")));
            }
        }

        Ok(guard)
    }

    // Polls the pending authorizations, treated as a stack, until each
    // is valid. Sleeps the reported Retry-After between polls, waking
    // early on cancellation.
    async fn wait_authorizations(&self, mut pending: Vec<Authorization>) -> Result<(), Error> {
        let mut canceled = self.cancel.subscribe();

        while let Some(top) = pending.last() {
            if self.is_canceled() {
                return Err(Error::Canceled);
            }

            let authz = self.account.authorization(&top.uri).await?;
            let mut delay = authz.retry_after;
            match authz.status {
                Status::Valid => {
                    pending.pop();
                    delay = Duration::ZERO;
                }
                Status::Invalid => {
                    return Err(Error::AuthorizationFailed(format!(
                        "{} at {}",
                        authz.identifier, authz.uri
                    )));
                }
                _ => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = canceled.wait_for(|&canceled| canceled) => return Err(Error::Canceled),
            }
        }

        Ok(())
    }
}

// Owns the solver stop handle, running it on drop so error and unwind
// paths release solver resources exactly once.
struct StopGuard {
    stop: Option<StopFn>,
}

impl StopGuard {
    fn new(stop: StopFn) -> StopGuard {
        StopGuard { stop: Some(stop) }
    }

    fn release(mut self) -> Result<(), Error> {
        match self.stop.take() {
            Some(stop) => stop(),
            None => Ok(()),
        }
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop();
        }
    }
}

// Picks the cheapest combination for each authorization, then checks
// that the union is solvable in one go.
fn best_challenges(solver: &dyn Solver, pending: &[Authorization]) -> Result<Vec<Challenge>, Error> {
    let mut selected = Vec::new();
    for authz in pending {
        selected.extend(best_combination(solver, authz)?);
    }

    solver.cost(&selected)?;
    Ok(selected)
}

// The lowest-cost combination of one authorization, or Unsolvable (or
// the last cost error) when none can be solved.
fn best_combination(solver: &dyn Solver, authz: &Authorization) -> Result<Vec<Challenge>, Error> {
    let mut best: Option<(f64, Vec<Challenge>)> = None;
    let mut last_error = None;

    for combination in &authz.combinations {
        let challenges: Vec<Challenge> = combination
            .iter()
            .filter_map(|&i| authz.challenges.get(i).cloned())
            .collect();
        let cost = match solver.cost(&challenges) {
            Ok(cost) => cost,
            Err(err) => {
                last_error = Some(err);
                continue;
            }
        };

        match &best {
            Some((best_cost, _)) if *best_cost <= cost => {}
            _ => best = Some((cost, challenges)),
        }
    }

    match best {
        Some((_, challenges)) => Ok(challenges),
        None => Err(last_error.unwrap_or(Error::Unsolvable)),
    }
}
