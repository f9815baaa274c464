//! ACME v1 (pre-RFC 8555, Boulder-compatible) certificate automation.
//!
//! Both sides of the protocol live here: the client that obtains X.509
//! certificates from an ACME server, and the server-side dispatch and
//! authentication framework. Most requests travel as JWS envelopes
//! carrying replay nonces; the server poses DNS, HTTP and TLS
//! identifier-ownership challenges, the client solves them through
//! caller-supplied [`Solver`]s, and on success the server issues a
//! certificate.
//!
//! The main entry points:
//!
//! * [`ClientAccount`] — one ACME account: register, authorize, validate
//!   challenges, issue and revoke certificates.
//! * [`CertificateIssuer`] — end-to-end issuance orchestration on top of
//!   an [`IssuingAccount`], with cost-minimizing challenge selection and
//!   cooperative cancellation.
//! * [`server::Server`]/[`server::ServerAccount`] — implement these and
//!   mount [`server::boulder_mux`] to serve the protocol.
//!
//! X.509 parsing, concrete HTTP engines and actual challenge-solving I/O
//! stay outside: they enter through [`issuer::SigningRequest`],
//! [`transport::HttpClient`] and [`Solver`] respectively.

#![warn(unreachable_pub)]
#![warn(missing_docs)]

use std::fmt;
use std::time::Duration;

use time::OffsetDateTime;

pub mod account;
pub mod challenge;
pub mod codec;
pub mod crypto;
pub mod dispatch;
#[cfg(feature = "hyper-rustls")]
mod hyper_client;
pub mod issuer;
pub mod jws;
pub mod nonce;
pub mod ops;
pub mod server;
pub mod solver;
pub mod transport;
pub mod types;

pub use account::{ClientAccount, RegistrationOptions, RecoveryMaterial};
#[cfg(feature = "hyper-rustls")]
pub use hyper_client::DefaultClient;
pub use issuer::{AuthorizationError, CertificateIssuer, IssuingAccount, SigningRequest};
pub use solver::{Solver, StopFn, TypeSolver};
pub use types::Error;

use types::{Identifier, IdentifierType, ResourceType, Status};

/// A certificate subject identifier, as the client sees it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AcmeIdentifier {
    /// A fully-qualified domain name.
    Dns(String),
}

impl AcmeIdentifier {
    /// The wire form of this identifier.
    pub fn to_wire(&self) -> Identifier {
        match self {
            AcmeIdentifier::Dns(name) => Identifier {
                kind: IdentifierType::DNS,
                value: name.clone(),
            },
        }
    }

    /// Normalize a wire identifier. Unknown types are an error.
    pub fn from_wire(id: &Identifier) -> Result<AcmeIdentifier, Error> {
        if id.kind == IdentifierType::DNS {
            Ok(AcmeIdentifier::Dns(id.value.clone()))
        } else {
            Err(Error::UnknownIdentifier(id.kind.to_string()))
        }
    }

    /// The bare identifier value.
    pub fn value(&self) -> &str {
        match self {
            AcmeIdentifier::Dns(name) => name,
        }
    }
}

impl fmt::Display for AcmeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcmeIdentifier::Dns(name) => write!(f, "dns:{name}"),
        }
    }
}

/// An authorization as the client (or the server's application code)
/// sees it: wire fields normalized, plus the resource URI and the poll
/// interval derived from response headers.
#[derive(Clone, Debug, PartialEq)]
pub struct Authorization {
    /// The identifier being authorized.
    pub identifier: AcmeIdentifier,
    /// Progress; a missing wire status means pending.
    pub status: Status,
    /// When the authorization expires.
    pub expires: Option<OffsetDateTime>,
    /// The challenges the server poses.
    pub challenges: Vec<challenge::Challenge>,
    /// Sets of indices into `challenges`; completing any one set
    /// satisfies the authorization.
    pub combinations: Vec<Vec<usize>>,
    /// URI of the authorization resource.
    pub uri: String,
    /// How long the server asked us to wait before polling again.
    pub retry_after: Duration,
}

impl Authorization {
    pub(crate) fn from_wire(
        wire: types::Authorization,
        uri: String,
        retry_after: Duration,
    ) -> Result<Authorization, Error> {
        Ok(Authorization {
            identifier: AcmeIdentifier::from_wire(&wire.identifier)?,
            // Missing status means pending.
            status: wire.status.unwrap_or(Status::Pending),
            expires: wire.expires,
            challenges: wire.challenges,
            combinations: wire.combinations,
            uri,
            retry_after,
        })
    }

    pub(crate) fn to_wire(&self, resource: ResourceType) -> types::Authorization {
        types::Authorization {
            resource,
            identifier: self.identifier.to_wire(),
            status: Some(self.status),
            expires: self.expires,
            challenges: self.challenges.clone(),
            combinations: self.combinations.clone(),
        }
    }
}

/// An issued certificate with the metadata the protocol attaches to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    /// The DER-encoded certificate.
    pub bytes: Vec<u8>,
    /// URI of the certificate resource.
    pub uri: String,
    /// Issuer certificate URIs, from `up` links.
    pub issuer_uris: Vec<String>,
    /// Set server-side while issuance is still pending.
    pub retry_after: Option<Duration>,
}

/// A registration as the client (or the server's application code) sees
/// it: the wire fields plus the resource URI and the terms-of-service
/// link.
#[derive(Clone, Debug, PartialEq)]
pub struct Registration {
    /// URI of the registration resource.
    pub uri: Option<String>,
    /// The account public key, in server-originated copies.
    pub key: Option<jws::Jwk>,
    /// Contact URIs.
    pub contact_uris: Vec<String>,
    /// URI of the agreed terms-of-service document.
    pub agreement_uri: Option<String>,
    /// Index of the account's authorizations.
    pub authorizations_uri: Option<String>,
    /// Index of the account's certificates.
    pub certificates_uri: Option<String>,
    /// Recovery key material echoed by the server.
    pub recovery_key: Option<types::RecoveryKey>,
    /// The terms-of-service URI surfaced through a Link header.
    pub terms_of_service_uri: Option<String>,
}

impl Registration {
    pub(crate) fn from_wire(
        wire: types::Registration,
        uri: Option<String>,
        terms_of_service_uri: Option<String>,
    ) -> Registration {
        Registration {
            uri,
            key: wire.key,
            contact_uris: wire.contact_uris,
            agreement_uri: wire.agreement_uri,
            authorizations_uri: wire.authorizations_uri,
            certificates_uri: wire.certificates_uri,
            recovery_key: wire.recovery_key,
            terms_of_service_uri,
        }
    }

    pub(crate) fn to_wire(&self, resource: ResourceType) -> types::Registration {
        types::Registration {
            resource,
            key: self.key.clone(),
            contact_uris: self.contact_uris.clone(),
            agreement_uri: self.agreement_uri.clone(),
            authorizations_uri: self.authorizations_uri.clone(),
            certificates_uri: self.certificates_uri.clone(),
            recovery_key: self.recovery_key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_display_and_wire_forms() {
        let id = AcmeIdentifier::Dns("a.example.com".to_owned());
        assert_eq!(id.to_string(), "dns:a.example.com");
        assert_eq!(id.value(), "a.example.com");

        let wire = id.to_wire();
        assert_eq!(wire.kind, IdentifierType::DNS);
        assert_eq!(AcmeIdentifier::from_wire(&wire).unwrap(), id);

        let unknown = Identifier {
            kind: IdentifierType(std::borrow::Cow::Borrowed("ip")),
            value: "10.0.0.1".to_owned(),
        };
        assert!(matches!(
            AcmeIdentifier::from_wire(&unknown),
            Err(Error::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn missing_wire_status_normalizes_to_pending() {
        let wire = types::Authorization::request(
            ResourceType::Authz,
            Identifier {
                kind: IdentifierType::DNS,
                value: "a.example.com".to_owned(),
            },
        );
        let authz =
            Authorization::from_wire(wire, "http://ex/acme/authz/1".to_owned(), Duration::ZERO)
                .unwrap();
        assert_eq!(authz.status, Status::Pending);
    }
}
