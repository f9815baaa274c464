//! Wire-level ACME v1 resources and the crate error type.
//!
//! These structs mirror the JSON bodies exchanged with a Boulder-compatible
//! server. Client-facing views (with normalized status, resource URI and
//! header-derived data) live at the crate root.

use std::borrow::Cow;
use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use time::OffsetDateTime;

use crate::challenge::Challenge;
use crate::issuer::AuthorizationError;
use crate::jws::{JoseJson, Jwk};
use crate::transport::ServerError;

/// The `Link` header name.
pub const LINK: &str = "Link";
/// The `Replay-Nonce` header name.
pub const REPLAY_NONCE: &str = "Replay-Nonce";
/// The `Retry-After` header name.
pub const RETRY_AFTER: &str = "Retry-After";
/// The `Link` rel value pointing at an issuer certificate.
pub const LINK_UP: &str = "up";

/// Boulder's default URL paths, from Let's Encrypt's web front end. Not
/// mandated by the protocol, but good defaults for interoperability.
pub mod paths {
    /// Directory resource.
    pub const DIRECTORY: &str = "/directory";
    /// Registration creation.
    pub const NEW_REG: &str = "/acme/new-reg";
    /// Account recovery.
    pub const RECOVER_REG: &str = "/acme/recover-reg";
    /// Registration resources (prefix).
    pub const REG: &str = "/acme/reg/";
    /// Authorization creation.
    pub const NEW_AUTHZ: &str = "/acme/new-authz";
    /// Authorization resources (prefix).
    pub const AUTHZ: &str = "/acme/authz/";
    /// Challenge resources (prefix).
    pub const CHALLENGE: &str = "/acme/challenge/";
    /// Certificate issuance.
    pub const NEW_CERT: &str = "/acme/new-cert";
    /// Certificate resources (prefix).
    pub const CERT: &str = "/acme/cert/";
    /// Certificate revocation.
    pub const REVOKE_CERT: &str = "/acme/revoke-cert";
}

/// The resource tag carried by every POST body, disambiguating its meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    /// Registration creation.
    #[serde(rename = "new-reg")]
    NewReg,
    /// Account recovery.
    #[serde(rename = "recover-reg")]
    RecoverReg,
    /// Authorization creation.
    #[serde(rename = "new-authz")]
    NewAuthz,
    /// Certificate issuance.
    #[serde(rename = "new-cert")]
    NewCert,
    /// Certificate revocation.
    #[serde(rename = "revoke-cert")]
    RevokeCert,
    /// An existing registration.
    #[serde(rename = "reg")]
    Reg,
    /// An existing authorization.
    #[serde(rename = "authz")]
    Authz,
    /// A challenge resource.
    #[serde(rename = "challenge")]
    Challenge,
    /// A certificate resource.
    #[serde(rename = "cert")]
    Cert,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceType::NewReg => "new-reg",
            ResourceType::RecoverReg => "recover-reg",
            ResourceType::NewAuthz => "new-authz",
            ResourceType::NewCert => "new-cert",
            ResourceType::RevokeCert => "revoke-cert",
            ResourceType::Reg => "reg",
            ResourceType::Authz => "authz",
            ResourceType::Challenge => "challenge",
            ResourceType::Cert => "cert",
        })
    }
}

/// Progress of an authorization or challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not yet determined.
    Unknown,
    /// Waiting for challenges to complete.
    Pending,
    /// Being validated by the server.
    Processing,
    /// Usable.
    Valid,
    /// Terminally failed.
    Invalid,
    /// Revoked by the server or the account holder.
    Revoked,
}

/// Identifier type tag. Only [`IdentifierType::DNS`] is defined by the
/// protocol, but unknown tags still decode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentifierType(pub Cow<'static, str>);

impl IdentifierType {
    /// A fully-qualified domain name.
    pub const DNS: IdentifierType = IdentifierType(Cow::Borrowed("dns"));
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A certificate subject, as a tagged pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// Identifier type tag.
    #[serde(rename = "type")]
    pub kind: IdentifierType,
    /// The identifier itself, e.g. a domain name.
    pub value: String,
}

/// A reg resource: the account record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Resource tag, `new-reg` or `reg`.
    pub resource: ResourceType,
    /// The account public key. Only present in server-originated copies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Jwk>,
    /// Contact URIs for the account holder.
    #[serde(rename = "contact", default, skip_serializing_if = "Vec::is_empty")]
    pub contact_uris: Vec<String>,
    /// URI of the agreed terms-of-service document.
    #[serde(rename = "agreement", default, skip_serializing_if = "Option::is_none")]
    pub agreement_uri: Option<String>,
    /// Index of the account's authorizations. Server-originated.
    #[serde(
        rename = "authorizations",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub authorizations_uri: Option<String>,
    /// Index of the account's certificates. Server-originated.
    #[serde(
        rename = "certificates",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub certificates_uri: Option<String>,
    /// Account recovery key exchange.
    #[serde(rename = "recoveryKey", default, skip_serializing_if = "Option::is_none")]
    pub recovery_key: Option<RecoveryKey>,
}

impl Registration {
    /// An empty registration body with the given resource tag.
    pub fn new(resource: ResourceType) -> Registration {
        Registration {
            resource,
            key: None,
            contact_uris: Vec::new(),
            agreement_uri: None,
            authorizations_uri: None,
            certificates_uri: None,
            recovery_key: None,
        }
    }
}

/// Key material for account recovery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryKey {
    /// The client's half of the exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<Jwk>,
    /// The server's half of the exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<Jwk>,
    /// Requested key length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

/// An authz resource on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    /// Resource tag, `new-authz` or `authz`.
    pub resource: ResourceType,
    /// The identifier being authorized.
    pub identifier: Identifier,
    /// Progress. Absent means `pending`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// When the authorization expires.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires: Option<OffsetDateTime>,
    /// The challenges the server poses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub challenges: Vec<Challenge>,
    /// Sets of indices into `challenges`; completing any one set satisfies
    /// the authorization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub combinations: Vec<Vec<usize>>,
}

impl Authorization {
    /// A request body for the given identifier, carrying no server-only
    /// fields.
    pub fn request(resource: ResourceType, identifier: Identifier) -> Authorization {
        Authorization {
            resource,
            identifier,
            status: None,
            expires: None,
            challenges: Vec::new(),
            combinations: Vec::new(),
        }
    }
}

/// The index of pending and valid authorization URIs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationUris {
    /// Authorization resource URIs.
    pub authorizations: Vec<String>,
}

/// The index of certificate URIs known for an account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateUris {
    /// Certificate resource URIs.
    pub certificates: Vec<String>,
}

/// The directory resource: a map of well-known operation URIs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    /// Registration creation endpoint.
    #[serde(rename = "new-reg", default, skip_serializing_if = "String::is_empty")]
    pub new_reg: String,
    /// Account recovery endpoint.
    #[serde(
        rename = "recover-reg",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub recover_reg: String,
    /// Authorization creation endpoint.
    #[serde(rename = "new-authz", default, skip_serializing_if = "String::is_empty")]
    pub new_authz: String,
    /// Certificate issuance endpoint.
    #[serde(rename = "new-cert", default, skip_serializing_if = "String::is_empty")]
    pub new_cert: String,
    /// Certificate revocation endpoint.
    #[serde(
        rename = "revoke-cert",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub revoke_cert: String,
}

/// Recovery method selector for recover-reg requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMethod {
    /// MAC-based recovery using the recovery key.
    Mac,
    /// Contact-based recovery.
    Contact,
}

/// A recover-reg request body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recovery {
    /// Resource tag, `recover-reg`.
    pub resource: ResourceType,
    /// Selected recovery method.
    pub method: RecoveryMethod,
    /// URI of the registration being recovered.
    #[serde(rename = "base")]
    pub base_uri: String,
    /// MAC over the request, for [`RecoveryMethod::Mac`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<JoseJson>,
    /// Contact URIs, for [`RecoveryMethod::Contact`].
    #[serde(rename = "contact", default, skip_serializing_if = "Vec::is_empty")]
    pub contact_uris: Vec<String>,
}

/// A new-cert request body: the certificate signing request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateIssuance {
    /// Resource tag, `new-cert`.
    pub resource: ResourceType,
    /// The DER-encoded CSR.
    pub csr: DerData,
}

/// A revoke-cert request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRevocation {
    /// Resource tag, `revoke-cert`.
    pub resource: ResourceType,
    /// The DER-encoded certificate to revoke.
    pub certificate: DerData,
}

/// Raw DER-encoded data, carried in JSON as base64url.
///
/// Decoding accepts input with or without `=` padding; encoding emits no
/// padding.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DerData(pub Vec<u8>);

impl DerData {
    /// The raw DER bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for DerData {
    fn from(bytes: Vec<u8>) -> DerData {
        DerData(bytes)
    }
}

impl Serialize for DerData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::codec::base64url(&self.0))
    }
}

impl<'de> Deserialize<'de> for DerData {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        crate::codec::base64url_decode(&s)
            .map(DerData)
            .map_err(serde::de::Error::custom)
    }
}

/// A problem type URI under the `urn:acme:error:` namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemType(pub Cow<'static, str>);

impl ProblemType {
    /// The CSR was rejected.
    pub const BAD_CSR: ProblemType = ProblemType(Cow::Borrowed("urn:acme:error:badCSR"));
    /// The request nonce was missing, unknown or reused.
    pub const BAD_NONCE: ProblemType = ProblemType(Cow::Borrowed("urn:acme:error:badNonce"));
    /// The server could not connect to the client for validation.
    pub const CONNECTION: ProblemType = ProblemType(Cow::Borrowed("urn:acme:error:connection"));
    /// DNSSEC validation failed.
    pub const DNSSEC: ProblemType = ProblemType(Cow::Borrowed("urn:acme:error:dnssec"));
    /// The request was malformed.
    pub const MALFORMED: ProblemType = ProblemType(Cow::Borrowed("urn:acme:error:malformed"));
    /// The server hit an internal error.
    pub const SERVER_INTERNAL: ProblemType =
        ProblemType(Cow::Borrowed("urn:acme:error:serverInternal"));
    /// A TLS error occurred during validation.
    pub const TLS: ProblemType = ProblemType(Cow::Borrowed("urn:acme:error:tls"));
    /// The signature or nonce did not authenticate the request.
    pub const UNAUTHORIZED: ProblemType = ProblemType(Cow::Borrowed("urn:acme:error:unauthorized"));
    /// The identifier is for a host the server does not know.
    pub const UNKNOWN_HOST: ProblemType = ProblemType(Cow::Borrowed("urn:acme:error:unknownHost"));
}

impl fmt::Display for ProblemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An RFC 7807-style problem document, served as
/// `application/problem+json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Problem type URI.
    #[serde(rename = "type")]
    pub kind: ProblemType,
    /// Short human-readable summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// The HTTP status code this problem was served with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Human-readable explanation.
    pub detail: String,
    /// URI of the specific occurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl Problem {
    /// A problem with just a type, detail and status.
    pub fn new(kind: ProblemType, detail: impl Into<String>, status: StatusCode) -> Problem {
        Problem {
            kind,
            title: None,
            status: Some(status.as_u16()),
            detail: detail.into(),
            instance: None,
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.detail, self.kind)
    }
}

/// Error type for this crate.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum Error {
    /// A 4xx/5xx response from the ACME server, with the problem document
    /// when one was supplied.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// Failed to (de)serialize a JSON body.
    #[error("failed to (de)serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Failed to base64-decode data.
    #[error("base64 decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Failed to construct an HTTP request.
    #[error("invalid request: {0}")]
    Request(#[from] http::Error),
    /// The underlying HTTP transport failed.
    #[error("HTTP request failure: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A cryptographic operation failed.
    #[error("cryptographic operation failed")]
    Crypto,
    /// Key material could not be loaded.
    #[error("invalid key material")]
    KeyRejected,
    /// The content type is not one this protocol exchanges.
    #[error("unhandled content type: {0:?}")]
    UnhandledContentType(String),
    /// The client nonce pool is empty. Recoverable by performing a HEAD
    /// against the directory.
    #[error("no nonce available")]
    NoNonce,
    /// A nonce failed server-side verification.
    #[error("invalid nonce: {0:?}")]
    BadNonce(String),
    /// A signed request was attempted without a signer.
    #[error("no signer in client")]
    NoSigner,
    /// The server answered an operation with a status it must not use.
    #[error("{op}: unexpected HTTP status: {status}")]
    UnexpectedStatus {
        /// The operation being performed.
        op: &'static str,
        /// The offending status.
        status: StatusCode,
    },
    /// A request carried the wrong resource tag for the operation.
    #[error("invalid {kind} resource: {resource}")]
    InvalidResource {
        /// The operation's resource family.
        kind: &'static str,
        /// The tag that was carried.
        resource: ResourceType,
    },
    /// A server-only field was set on a request body.
    #[error("{0} present in request")]
    FieldNotAllowed(&'static str),
    /// A required response header was missing.
    #[error("missing {0} header")]
    MissingHeader(&'static str),
    /// The server does not advertise the resource needed for this
    /// operation.
    #[error("unsupported operation")]
    Unsupported,
    /// No challenge combination can be solved with the available solvers.
    #[error("unsolvable challenge")]
    Unsolvable,
    /// The operation was canceled.
    #[error("operation canceled")]
    Canceled,
    /// A solver returned the wrong number of responses.
    #[error(
        "solver was given {given} challenges, but returned {returned} responses \
         (the solver code is broken)"
    )]
    SolverMismatch {
        /// Challenges handed to the solver.
        given: usize,
        /// Responses it produced.
        returned: usize,
    },
    /// An identifier's authorization is in terminal `invalid` state.
    #[error("authorization invalid for {0:?}")]
    AuthorizationInvalid(String),
    /// An authorization reported a status this client does not understand.
    #[error("unknown authorization status for {name:?}: {status:?}")]
    UnknownAuthorizationStatus {
        /// The identifier display form.
        name: String,
        /// The reported status.
        status: Status,
    },
    /// Polling found an authorization in terminal `invalid` state.
    #[error("authorization validation failed: {0}")]
    AuthorizationFailed(String),
    /// The server marked a challenge invalid when it was notified.
    #[error("challenge validation failed: {0}")]
    ChallengeFailed(String),
    /// A failure during challenge selection, with the probed
    /// authorizations attached for diagnosis.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    /// Recovery-key flows stop at the protocol boundary.
    #[error("recovery keys are not implemented")]
    RecoveryNotImplemented,
    /// The identifier type is not one this client understands.
    #[error("unknown identifier type {0:?}")]
    UnknownIdentifier(String),
    /// Miscellaneous errors.
    #[error("{0}")]
    Str(&'static str),
}
