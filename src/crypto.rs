//! JOSE primitives behind small traits.
//!
//! The protocol code never touches key material directly: signing,
//! verification and hashing are supplied through these traits, with a
//! built-in provider backed by ring behind the `ring` feature. Implement
//! them to plug in another backend or key type without changes to this
//! crate.

use rustls_pki_types::PrivatePkcs8KeyDer;
use serde::{Deserialize, Serialize};

use crate::jws::Jwk;
use crate::types::Error;

#[cfg(feature = "ring")]
mod ring;

/// JWS signature algorithms used by ACME.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSASSA-PKCS1-v1_5 using SHA-256.
    #[serde(rename = "RS256")]
    Rs256,
    /// ECDSA using P-256 and SHA-256.
    #[serde(rename = "ES256")]
    Es256,
    /// ECDSA using P-384 and SHA-384.
    #[serde(rename = "ES384")]
    Es384,
    /// ECDSA using P-521 and SHA-512.
    #[serde(rename = "ES512")]
    Es512,
}

impl SigningAlgorithm {
    /// Suggest an algorithm from the shape of a private key.
    ///
    /// RSA keys sign RS256, the letsencrypt client default. For ECDSA the
    /// curve size picks the hash, generalizing what the ACME ECDH flows
    /// use.
    pub fn for_key(shape: KeyShape) -> SigningAlgorithm {
        match shape {
            KeyShape::Rsa => SigningAlgorithm::Rs256,
            KeyShape::Ecdsa { curve_bits } if curve_bits < 256 => SigningAlgorithm::Es256,
            KeyShape::Ecdsa { curve_bits } if curve_bits < 521 => SigningAlgorithm::Es384,
            KeyShape::Ecdsa { .. } => SigningAlgorithm::Es512,
        }
    }
}

/// The shape of a private key, for algorithm selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyShape {
    /// An RSA key of any size.
    Rsa,
    /// An ECDSA key over a curve of the given bit size.
    Ecdsa {
        /// Curve size in bits.
        curve_bits: u32,
    },
}

/// A signing key for ACME account operations.
///
/// Bundles signing, JWS algorithm identification and JWK serialization.
pub trait SigningKey: Send + Sync {
    /// Sign the given data. Hashing happens internally where the
    /// algorithm requires it.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error>;

    /// The JWS `alg` header value for this key.
    fn algorithm(&self) -> SigningAlgorithm;

    /// The public half as a JWK.
    fn public_jwk(&self) -> Jwk;
}

/// Verify JWS signatures against a JWK, server-side.
pub trait Verifier: Send + Sync {
    /// Check `signature` over `message` under the given algorithm and key.
    fn verify(
        &self,
        alg: SigningAlgorithm,
        jwk: &Jwk,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Error>;
}

/// SHA-256, used for JWK thumbprints and challenge digests.
pub trait Sha256: Send + Sync {
    /// Compute the SHA-256 digest of `data`.
    fn hash(&self, data: &[u8]) -> [u8; 32];
}

/// Load existing account keys and generate new ones.
pub trait KeyProvider: Send + Sync {
    /// Load a signing key from PKCS#8 DER encoding.
    fn load_key(&self, pkcs8: PrivatePkcs8KeyDer<'static>) -> Result<Box<dyn SigningKey>, Error>;

    /// Generate a new key pair, returning the key and its PKCS#8 DER
    /// encoding.
    fn generate_key(&self) -> Result<(Box<dyn SigningKey>, PrivatePkcs8KeyDer<'static>), Error>;
}

/// A bundle of crypto primitives for one backend.
pub struct CryptoProvider {
    /// Load and generate signing keys.
    pub keys: &'static dyn KeyProvider,
    /// SHA-256 for thumbprints and challenge digests.
    pub sha256: &'static dyn Sha256,
    /// Server-side JWS verification.
    pub verifier: &'static dyn Verifier,
}

impl CryptoProvider {
    /// The ring-backed provider: ES256 account keys, plus ES384 and RS256
    /// verification.
    #[cfg(feature = "ring")]
    pub fn ring() -> &'static CryptoProvider {
        ring::PROVIDER
    }
}

impl std::fmt::Debug for CryptoProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoProvider").finish_non_exhaustive()
    }
}
