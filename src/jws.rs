//! JWS envelopes in the full-serialization form used by ACME v1.
//!
//! Every authenticated request body is wrapped as
//! `{"payload", "protected", "signature"}` with base64url segments. The
//! protected header carries the algorithm, the signing JWK and the replay
//! nonce. Exactly one signature per message is accepted; the general
//! serialization is tolerated only when it carries a single entry.

use serde::{Deserialize, Serialize};

use crate::codec::{base64url, base64url_decode};
use crate::crypto::{Sha256, SigningAlgorithm, SigningKey, Verifier};
use crate::types::Error;

/// A JSON Web Key: the only public-key representation this crate uses.
///
/// Extra members (`alg`, `use`, …) are ignored on decode; encoding emits
/// the required members only, which keeps the struct canonical for
/// RFC 7638 thumbprints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// An elliptic-curve public key.
    #[serde(rename = "EC")]
    Ec {
        /// Curve name, e.g. `P-256`.
        crv: String,
        /// Base64url X coordinate.
        x: String,
        /// Base64url Y coordinate.
        y: String,
    },
    /// An RSA public key.
    #[serde(rename = "RSA")]
    Rsa {
        /// Base64url modulus.
        n: String,
        /// Base64url public exponent.
        e: String,
    },
}

impl Jwk {
    /// The RFC 7638 thumbprint: SHA-256 over the canonical JSON form with
    /// required members in lexicographic order, base64url encoded without
    /// padding.
    pub fn thumbprint(&self, sha256: &dyn Sha256) -> String {
        // Serialized by hand: member order is load-bearing here.
        let canonical = match self {
            Jwk::Ec { crv, x, y } => {
                format!(r#"{{"crv":"{crv}","kty":"EC","x":"{x}","y":"{y}"}}"#)
            }
            Jwk::Rsa { n, e } => format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#),
        };
        base64url(&sha256.hash(canonical.as_bytes()))
    }
}

/// The protected header of an ACME v1 JWS.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// Signature algorithm.
    pub alg: SigningAlgorithm,
    /// The signing public key. Required on the wire; ACME v1 has no
    /// key-id form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    /// The replay nonce consumed by this request. Absent for inner JWS
    /// uses such as proof-of-possession responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// A JWS in full (flattened) serialization.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JoseJson {
    /// Base64url protected header.
    pub protected: String,
    /// Base64url payload.
    pub payload: String,
    /// Base64url signature.
    pub signature: String,
}

// Accepts the flattened form and the general form with exactly one
// signature. More than one signature is malformed.
impl<'de> Deserialize<'de> for JoseJson {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        #[derive(Deserialize)]
        struct RawSignature {
            protected: Option<String>,
            signature: Option<String>,
        }

        #[derive(Deserialize)]
        struct RawEnvelope {
            payload: Option<String>,
            protected: Option<String>,
            signature: Option<String>,
            signatures: Option<Vec<RawSignature>>,
        }

        let raw = RawEnvelope::deserialize(deserializer)?;
        let payload = raw.payload.ok_or_else(|| D::Error::custom("missing payload"))?;
        let (protected, signature) = match raw.signatures {
            Some(mut sigs) => {
                if sigs.len() != 1 {
                    return Err(D::Error::custom("expected exactly one signature"));
                }
                let sig = sigs.remove(0);
                (sig.protected, sig.signature)
            }
            None => (raw.protected, raw.signature),
        };

        Ok(JoseJson {
            protected: protected.ok_or_else(|| D::Error::custom("missing protected header"))?,
            payload,
            signature: signature.ok_or_else(|| D::Error::custom("missing signature"))?,
        })
    }
}

/// A verified envelope: the payload bytes, the verifying key and the
/// nonce it consumed.
#[derive(Debug)]
pub struct Verified {
    /// The decoded payload.
    pub payload: Vec<u8>,
    /// The JWK the signature verified against.
    pub jwk: Jwk,
    /// The nonce from the protected header, if any.
    pub nonce: Option<String>,
}

/// Wrap an already-JSON-marshaled payload in a signed envelope.
pub fn sign(key: &dyn SigningKey, nonce: Option<String>, payload: &[u8]) -> Result<JoseJson, Error> {
    let protected = ProtectedHeader {
        alg: key.algorithm(),
        jwk: Some(key.public_jwk()),
        nonce,
    };
    let protected = base64url(&serde_json::to_vec(&protected)?);
    let payload = base64url(payload);
    let input = format!("{protected}.{payload}");
    let signature = base64url(&key.sign(input.as_bytes())?);

    Ok(JoseJson {
        protected,
        payload,
        signature,
    })
}

/// Verify an envelope against the JWK embedded in its protected header.
pub fn verify(envelope: &JoseJson, verifier: &dyn Verifier) -> Result<Verified, Error> {
    let header: ProtectedHeader =
        serde_json::from_slice(&base64url_decode(&envelope.protected)?)?;
    let jwk = header.jwk.ok_or(Error::Str("no JWK in protected header"))?;

    let input = format!("{}.{}", envelope.protected, envelope.payload);
    let signature = base64url_decode(&envelope.signature)?;
    verifier.verify(header.alg, &jwk, input.as_bytes(), &signature)?;

    Ok(Verified {
        payload: base64url_decode(&envelope.payload)?,
        jwk,
        nonce: header.nonce,
    })
}
