//! Challenge and response types, polymorphic over the `type` tag.
//!
//! Decoding peeks at the tag, looks it up in a process-wide registry and
//! decodes into the registered shape; unknown tags fall back to the
//! generic variants so forward compatibility is preserved. The registry
//! is built once at startup and registering a tag twice is a programmer
//! error that fails fast.

use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::codec::base64url;
use crate::crypto::{Sha256, SigningKey};
use crate::jws::{self, JoseJson, Jwk};
use crate::types::{DerData, Error, Identifier, Problem, ResourceType, Status};

/// A challenge type tag, e.g. `http-01`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChallengeType(pub Cow<'static, str>);

/// `http-01`: serve the key authorization over plain HTTP.
pub const HTTP01: ChallengeType = ChallengeType(Cow::Borrowed("http-01"));
/// `dns-01`: publish a digest of the key authorization as a TXT record.
pub const DNS01: ChallengeType = ChallengeType(Cow::Borrowed("dns-01"));
/// `tls-sni-01` (deprecated): answer TLS for derived `acme.invalid` names.
pub const TLS_SNI01: ChallengeType = ChallengeType(Cow::Borrowed("tls-sni-01"));
/// `tls-alpn-01`: present a validation certificate over the `acme-tls/1`
/// protocol.
pub const TLS_ALPN01: ChallengeType = ChallengeType(Cow::Borrowed("tls-alpn-01"));
/// `proofOfPossession-01`: prove control of a previously-certified key.
pub const POSSESSION01: ChallengeType = ChallengeType(Cow::Borrowed("proofOfPossession-01"));

/// DNS label under which `dns-01` TXT records are published.
pub const DNS01_LABEL: &str = "_acme-challenge";
/// Well-known path prefix serving `http-01` key authorizations.
pub const HTTP01_BASE_PATH: &str = "/.well-known/acme-challenge";
/// Domain suffix of `tls-sni-01` server names.
pub const TLS_SNI01_SUFFIX: &str = "acme.invalid";

impl ChallengeType {
    /// The tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChallengeType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! challenge_accessors {
    ($($variant:ident),+) => {
        /// Resource tag, if set.
        pub fn resource(&self) -> Option<ResourceType> {
            match self { $(Self::$variant(c) => c.resource),+ }
        }

        /// Challenge type tag, if set.
        pub fn kind(&self) -> Option<&ChallengeType> {
            match self { $(Self::$variant(c) => c.kind.as_ref()),+ }
        }

        /// URI of the challenge resource.
        pub fn uri(&self) -> &str {
            match self { $(Self::$variant(c) => &c.uri),+ }
        }

        /// Progress reported by the server.
        pub fn status(&self) -> Option<Status> {
            match self { $(Self::$variant(c) => c.status),+ }
        }

        /// When the challenge was validated.
        pub fn validated(&self) -> Option<OffsetDateTime> {
            match self { $(Self::$variant(c) => c.validated),+ }
        }

        /// The error that failed the challenge, if any.
        pub fn error(&self) -> Option<&Problem> {
            match self { $(Self::$variant(c) => c.error.as_ref()),+ }
        }
    };
}

/// An authorization challenge, discriminated by its `type` tag.
#[derive(Clone, Debug, PartialEq)]
pub enum Challenge {
    /// An `http-01` challenge.
    Http01(Http01Challenge),
    /// A `dns-01` challenge.
    Dns01(Dns01Challenge),
    /// A `tls-sni-01` challenge.
    TlsSni01(TlsSni01Challenge),
    /// A `tls-alpn-01` challenge.
    TlsAlpn01(TlsAlpn01Challenge),
    /// A `proofOfPossession-01` challenge.
    Possession01(Possession01Challenge),
    /// A challenge of a type this crate has no shape for.
    Generic(GenericChallenge),
}

impl Challenge {
    challenge_accessors!(Http01, Dns01, TlsSni01, TlsAlpn01, Possession01, Generic);
}

impl Serialize for Challenge {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Challenge::Http01(c) => c.serialize(serializer),
            Challenge::Dns01(c) => c.serialize(serializer),
            Challenge::TlsSni01(c) => c.serialize(serializer),
            Challenge::TlsAlpn01(c) => c.serialize(serializer),
            Challenge::Possession01(c) => c.serialize(serializer),
            Challenge::Generic(c) => c.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Challenge {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let decoded = match peek_entry(&value) {
            Some(entry) => (entry.challenge)(value),
            None => serde_json::from_value(value).map(Challenge::Generic),
        };
        decoded.map_err(serde::de::Error::custom)
    }
}

/// A reply to a challenge, discriminated the same way as [`Challenge`].
#[derive(Clone, Debug, PartialEq)]
pub enum ChallengeResponse {
    /// Reply to `http-01`.
    Http01(Http01Response),
    /// Reply to `dns-01`.
    Dns01(Dns01Response),
    /// Reply to `tls-sni-01`.
    TlsSni01(TlsSni01Response),
    /// Reply to `tls-alpn-01`.
    TlsAlpn01(TlsAlpn01Response),
    /// Reply to `proofOfPossession-01`.
    Possession01(Possession01Response),
    /// Reply of a type this crate has no shape for.
    Generic(GenericResponse),
}

impl ChallengeResponse {
    /// Resource tag, if set.
    pub fn resource(&self) -> Option<ResourceType> {
        match self {
            ChallengeResponse::Http01(r) => r.resource,
            ChallengeResponse::Dns01(r) => r.resource,
            ChallengeResponse::TlsSni01(r) => r.resource,
            ChallengeResponse::TlsAlpn01(r) => r.resource,
            ChallengeResponse::Possession01(r) => r.resource,
            ChallengeResponse::Generic(r) => r.resource,
        }
    }

    /// Challenge type tag, if set.
    pub fn kind(&self) -> Option<&ChallengeType> {
        match self {
            ChallengeResponse::Http01(r) => r.kind.as_ref(),
            ChallengeResponse::Dns01(r) => r.kind.as_ref(),
            ChallengeResponse::TlsSni01(r) => r.kind.as_ref(),
            ChallengeResponse::TlsAlpn01(r) => r.kind.as_ref(),
            ChallengeResponse::Possession01(r) => r.kind.as_ref(),
            ChallengeResponse::Generic(r) => r.kind.as_ref(),
        }
    }
}

impl Serialize for ChallengeResponse {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ChallengeResponse::Http01(r) => r.serialize(serializer),
            ChallengeResponse::Dns01(r) => r.serialize(serializer),
            ChallengeResponse::TlsSni01(r) => r.serialize(serializer),
            ChallengeResponse::TlsAlpn01(r) => r.serialize(serializer),
            ChallengeResponse::Possession01(r) => r.serialize(serializer),
            ChallengeResponse::Generic(r) => r.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ChallengeResponse {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let decoded = match peek_entry(&value) {
            Some(entry) => (entry.response)(value),
            None => serde_json::from_value(value).map(ChallengeResponse::Generic),
        };
        decoded.map_err(serde::de::Error::custom)
    }
}

fn peek_entry(value: &serde_json::Value) -> Option<&'static RegistryEntry> {
    let tag = value.get("type")?.as_str()?;
    registry().get(tag)
}

/// An `http-01` challenge body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Http01Challenge {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
    /// URI of the challenge resource.
    #[serde(default)]
    pub uri: String,
    /// Progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Validation time.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub validated: Option<OffsetDateTime>,
    /// The error that failed the challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    /// The printable-ASCII token to serve back.
    #[serde(default)]
    pub token: String,
}

/// Reply to an `http-01` challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Http01Response {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
    /// The key authorization being served.
    #[serde(rename = "keyAuthorization", default)]
    pub key_authorization: String,
}

/// A `dns-01` challenge body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dns01Challenge {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
    /// URI of the challenge resource.
    #[serde(default)]
    pub uri: String,
    /// Progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Validation time.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub validated: Option<OffsetDateTime>,
    /// The error that failed the challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    /// The token bound into the TXT record.
    #[serde(default)]
    pub token: String,
}

/// Reply to a `dns-01` challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dns01Response {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
    /// The key authorization whose digest is published.
    #[serde(rename = "keyAuthorization", default)]
    pub key_authorization: String,
}

/// A `tls-sni-01` challenge body (deprecated).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TlsSni01Challenge {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
    /// URI of the challenge resource.
    #[serde(default)]
    pub uri: String,
    /// Progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Validation time.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub validated: Option<OffsetDateTime>,
    /// The error that failed the challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    /// The token bound into the derived names.
    #[serde(default)]
    pub token: String,
    /// Iteration count for name derivation.
    #[serde(default)]
    pub n: usize,
}

/// Reply to a `tls-sni-01` challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TlsSni01Response {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
    /// The key authorization the names derive from.
    #[serde(rename = "keyAuthorization", default)]
    pub key_authorization: String,
}

/// A `tls-alpn-01` challenge body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TlsAlpn01Challenge {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
    /// URI of the challenge resource.
    #[serde(default)]
    pub uri: String,
    /// Progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Validation time.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub validated: Option<OffsetDateTime>,
    /// The error that failed the challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    /// The token bound into the validation certificate.
    #[serde(default)]
    pub token: String,
}

/// Reply to a `tls-alpn-01` challenge. Carries no type-specific data; the
/// proof lives in the certificate extension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TlsAlpn01Response {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
}

/// A `proofOfPossession-01` challenge body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Possession01Challenge {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
    /// URI of the challenge resource.
    #[serde(default)]
    pub uri: String,
    /// Progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Validation time.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub validated: Option<OffsetDateTime>,
    /// The error that failed the challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    /// Certificates whose keys the account may prove possession of.
    #[serde(default)]
    pub certs: Vec<DerData>,
}

/// The payload signed into a `proofOfPossession-01` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Possession01Validation {
    /// Type tag, `proofOfPossession-01`.
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    /// The identifiers being validated.
    pub identifiers: Vec<Identifier>,
    /// The ACME account key this proof binds to.
    #[serde(rename = "accountKey")]
    pub account_key: Jwk,
}

/// Reply to a `proofOfPossession-01` challenge: a JWS over the validation
/// object, signed with the possessed key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Possession01Response {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
    /// The signed validation object.
    pub authorization: JoseJson,
}

/// A challenge with no type-specific data: the decode fallback for
/// unknown tags.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericChallenge {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
    /// URI of the challenge resource.
    #[serde(default)]
    pub uri: String,
    /// Progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Validation time.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub validated: Option<OffsetDateTime>,
    /// The error that failed the challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

/// A response with no type-specific data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericResponse {
    /// Resource tag, `challenge`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceType>,
    /// Type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChallengeType>,
}

type ChallengeDecoder = fn(serde_json::Value) -> Result<Challenge, serde_json::Error>;
type ResponseDecoder = fn(serde_json::Value) -> Result<ChallengeResponse, serde_json::Error>;

struct RegistryEntry {
    challenge: ChallengeDecoder,
    response: ResponseDecoder,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<ChallengeType, RegistryEntry>,
}

impl Registry {
    fn register(&mut self, kind: ChallengeType, entry: RegistryEntry) {
        if self.entries.insert(kind.clone(), entry).is_some() {
            panic!("challenge type {kind:?} already registered");
        }
    }

    fn get(&self, tag: &str) -> Option<&RegistryEntry> {
        self.entries.get(tag)
    }
}

fn registry() -> &'static Registry {
    static REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
        let mut r = Registry::default();
        r.register(
            HTTP01,
            RegistryEntry {
                challenge: |v| serde_json::from_value(v).map(Challenge::Http01),
                response: |v| serde_json::from_value(v).map(ChallengeResponse::Http01),
            },
        );
        r.register(
            DNS01,
            RegistryEntry {
                challenge: |v| serde_json::from_value(v).map(Challenge::Dns01),
                response: |v| serde_json::from_value(v).map(ChallengeResponse::Dns01),
            },
        );
        r.register(
            TLS_SNI01,
            RegistryEntry {
                challenge: |v| serde_json::from_value(v).map(Challenge::TlsSni01),
                response: |v| serde_json::from_value(v).map(ChallengeResponse::TlsSni01),
            },
        );
        r.register(
            TLS_ALPN01,
            RegistryEntry {
                challenge: |v| serde_json::from_value(v).map(Challenge::TlsAlpn01),
                response: |v| serde_json::from_value(v).map(ChallengeResponse::TlsAlpn01),
            },
        );
        r.register(
            POSSESSION01,
            RegistryEntry {
                challenge: |v| serde_json::from_value(v).map(Challenge::Possession01),
                response: |v| serde_json::from_value(v).map(ChallengeResponse::Possession01),
            },
        );
        r
    });
    &*REGISTRY
}

/// The key authorization for a challenge token and account key:
/// `<token>.<base64url(thumbprint)>`.
pub fn key_authorization(token: &str, key: &Jwk, sha256: &dyn Sha256) -> String {
    format!("{token}.{}", key.thumbprint(sha256))
}

/// The TXT record data published for `dns-01` under
/// `_acme-challenge.<domain>`: the unpadded base64url SHA-256 of the key
/// authorization.
pub fn dns01_txt_record(key_authz: &str, sha256: &dyn Sha256) -> String {
    base64url(&sha256.hash(key_authz.as_bytes()))
}

/// The `n` server names for `tls-sni-01`, each
/// `<z[0:32]>.<z[32:64]>.acme.invalid` over the lowercase-hex digest
/// chain seeded by the key authorization.
pub fn tls_sni01_names(key_authz: &str, n: usize, sha256: &dyn Sha256) -> Vec<String> {
    let mut z = key_authz.to_owned();
    let mut names = Vec::with_capacity(n);
    for _ in 0..n {
        z = hex_lower(&sha256.hash(z.as_bytes()));
        names.push(format!("{}.{}.{TLS_SNI01_SUFFIX}", &z[..32], &z[32..]));
    }
    names
}

/// The digest embedded in a `tls-alpn-01` validation certificate:
/// SHA-256 of the key authorization.
pub fn tls_alpn01_validation(token: &str, key: &Jwk, sha256: &dyn Sha256) -> [u8; 32] {
    sha256.hash(key_authorization(token, key, sha256).as_bytes())
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn expect_challenge(
    resource: Option<ResourceType>,
    kind: &Option<ChallengeType>,
    want: &ChallengeType,
) -> Result<(), Error> {
    if resource != Some(ResourceType::Challenge) {
        return Err(Error::Str("unexpected resource type in challenge"));
    }
    if kind.as_ref() != Some(want) {
        return Err(Error::Str("unexpected challenge type"));
    }
    Ok(())
}

/// Build the reply to an `http-01` challenge for the given account key.
pub fn respond_http01(
    key: &Jwk,
    sha256: &dyn Sha256,
    challenge: &Http01Challenge,
) -> Result<Http01Response, Error> {
    expect_challenge(challenge.resource, &challenge.kind, &HTTP01)?;
    Ok(Http01Response {
        resource: challenge.resource,
        kind: challenge.kind.clone(),
        key_authorization: key_authorization(&challenge.token, key, sha256),
    })
}

/// Build the reply to a `dns-01` challenge for the given account key.
pub fn respond_dns01(
    key: &Jwk,
    sha256: &dyn Sha256,
    challenge: &Dns01Challenge,
) -> Result<Dns01Response, Error> {
    expect_challenge(challenge.resource, &challenge.kind, &DNS01)?;
    Ok(Dns01Response {
        resource: challenge.resource,
        kind: challenge.kind.clone(),
        key_authorization: key_authorization(&challenge.token, key, sha256),
    })
}

/// Build the reply to a `tls-sni-01` challenge for the given account key.
pub fn respond_tls_sni01(
    key: &Jwk,
    sha256: &dyn Sha256,
    challenge: &TlsSni01Challenge,
) -> Result<TlsSni01Response, Error> {
    expect_challenge(challenge.resource, &challenge.kind, &TLS_SNI01)?;
    Ok(TlsSni01Response {
        resource: challenge.resource,
        kind: challenge.kind.clone(),
        key_authorization: key_authorization(&challenge.token, key, sha256),
    })
}

/// Build the reply to a `tls-alpn-01` challenge.
pub fn respond_tls_alpn01(challenge: &TlsAlpn01Challenge) -> Result<TlsAlpn01Response, Error> {
    expect_challenge(challenge.resource, &challenge.kind, &TLS_ALPN01)?;
    Ok(TlsAlpn01Response {
        resource: challenge.resource,
        kind: challenge.kind.clone(),
    })
}

/// Build the reply to a `proofOfPossession-01` challenge, signing the
/// validation object with the possessed certificate key.
pub fn respond_possession01(
    possessed_key: &dyn SigningKey,
    validation: &Possession01Validation,
    challenge: &Possession01Challenge,
) -> Result<Possession01Response, Error> {
    expect_challenge(challenge.resource, &challenge.kind, &POSSESSION01)?;
    let payload = serde_json::to_vec(validation)?;
    Ok(Possession01Response {
        resource: challenge.resource,
        kind: challenge.kind.clone(),
        authorization: jws::sign(possessed_key, None, &payload)?,
    })
}
