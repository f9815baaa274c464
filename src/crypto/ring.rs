use ring::digest;
use ring::rand::SystemRandom;
use ring::signature::{
    ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING, ECDSA_P384_SHA384_FIXED,
    EcdsaKeyPair, KeyPair, RSA_PKCS1_2048_8192_SHA256, RsaPublicKeyComponents, UnparsedPublicKey,
};
use rustls_pki_types::PrivatePkcs8KeyDer;

use super::{CryptoProvider, KeyProvider, Sha256, SigningAlgorithm, SigningKey, Verifier};
use crate::codec::{base64url, base64url_decode};
use crate::jws::Jwk;
use crate::types::Error;

pub(crate) static PROVIDER: &CryptoProvider = &CryptoProvider {
    keys: &P256KeyProvider,
    sha256: &RingSha256,
    verifier: &RingVerifier,
};

struct P256KeyProvider;

impl KeyProvider for P256KeyProvider {
    fn load_key(&self, pkcs8: PrivatePkcs8KeyDer<'static>) -> Result<Box<dyn SigningKey>, Error> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_FIXED_SIGNING,
            pkcs8.secret_pkcs8_der(),
            &rng,
        )
        .map_err(|_| Error::KeyRejected)?;
        Ok(Box::new(P256Key { key_pair, rng }))
    }

    fn generate_key(&self) -> Result<(Box<dyn SigningKey>, PrivatePkcs8KeyDer<'static>), Error> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| Error::Crypto)?;
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .map_err(|_| Error::KeyRejected)?;
        let pkcs8_der = PrivatePkcs8KeyDer::from(pkcs8.as_ref().to_vec());
        Ok((Box::new(P256Key { key_pair, rng }), pkcs8_der))
    }
}

struct P256Key {
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl SigningKey for P256Key {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.key_pair
            .sign(&self.rng, data)
            .map(|sig| sig.as_ref().to_vec())
            .map_err(|_| Error::Crypto)
    }

    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::Es256
    }

    fn public_jwk(&self) -> Jwk {
        let (x, y) = self.key_pair.public_key().as_ref()[1..].split_at(32);
        Jwk::Ec {
            crv: "P-256".to_owned(),
            x: base64url(x),
            y: base64url(y),
        }
    }
}

struct RingSha256;

impl Sha256 for RingSha256 {
    fn hash(&self, data: &[u8]) -> [u8; 32] {
        digest::digest(&digest::SHA256, data)
            .as_ref()
            .try_into()
            .expect("SHA-256 output is always 32 bytes")
    }
}

struct RingVerifier;

impl Verifier for RingVerifier {
    fn verify(
        &self,
        alg: SigningAlgorithm,
        jwk: &Jwk,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        match (alg, jwk) {
            (SigningAlgorithm::Es256, Jwk::Ec { crv, x, y }) if crv == "P-256" => {
                let point = uncompressed_point(x, y)?;
                UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &point)
                    .verify(message, signature)
                    .map_err(|_| Error::Crypto)
            }
            (SigningAlgorithm::Es384, Jwk::Ec { crv, x, y }) if crv == "P-384" => {
                let point = uncompressed_point(x, y)?;
                UnparsedPublicKey::new(&ECDSA_P384_SHA384_FIXED, &point)
                    .verify(message, signature)
                    .map_err(|_| Error::Crypto)
            }
            (SigningAlgorithm::Rs256, Jwk::Rsa { n, e }) => {
                let components = RsaPublicKeyComponents {
                    n: base64url_decode(n)?,
                    e: base64url_decode(e)?,
                };
                components
                    .verify(&RSA_PKCS1_2048_8192_SHA256, message, signature)
                    .map_err(|_| Error::Crypto)
            }
            _ => Err(Error::Crypto),
        }
    }
}

fn uncompressed_point(x: &str, y: &str) -> Result<Vec<u8>, Error> {
    let x = base64url_decode(x)?;
    let y = base64url_decode(y)?;
    let mut point = Vec::with_capacity(1 + x.len() + y.len());
    point.push(4);
    point.extend_from_slice(&x);
    point.extend_from_slice(&y);
    Ok(point)
}
