//! Replay-nonce handling.
//!
//! The client keeps a bounded LIFO of nonces harvested from
//! `Replay-Nonce` response headers. The server mints nonces and verifies
//! each at most once through the [`NonceSource`] trait; both built-in
//! sources are safe to share between parallel request handlers.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::types::Error;

/// Whether a string is shaped like a replay nonce: one or more base64url
/// alphabet characters.
pub(crate) fn valid_nonce(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// The client-side nonce pool: a bounded LIFO.
#[derive(Debug, Default)]
pub(crate) struct NonceStack {
    stack: Mutex<VecDeque<String>>,
}

impl NonceStack {
    const CAPACITY: usize = 32;

    /// Record a nonce from a response header. Invalid values are dropped;
    /// overflow discards the oldest entry.
    pub(crate) fn push(&self, nonce: &str) {
        if !valid_nonce(nonce) {
            return;
        }
        log::trace!("recording replay nonce");
        let mut stack = self.stack.lock().expect("nonce stack poisoned");
        if stack.len() == Self::CAPACITY {
            stack.pop_front();
        }
        stack.push_back(nonce.to_owned());
    }

    /// Take the most recent nonce. On [`Error::NoNonce`] the caller
    /// replenishes with a HEAD against the directory.
    pub(crate) fn pop(&self) -> Result<String, Error> {
        self.stack
            .lock()
            .expect("nonce stack poisoned")
            .pop_back()
            .ok_or(Error::NoNonce)
    }
}

/// Server-side nonce minting and single-use verification.
pub trait NonceSource: Send + Sync {
    /// Mint a fresh nonce for a `Replay-Nonce` response header.
    fn mint(&self) -> Result<String, Error>;

    /// Consume a nonce from a signed request. Fails if the nonce was not
    /// minted here or has already been consumed.
    fn verify(&self, nonce: &str) -> Result<(), Error>;
}

/// A deterministic nonce source handing out counter values; intended for
/// tests.
#[derive(Debug, Default)]
pub struct SequenceNonceSource {
    state: Mutex<SequenceState>,
}

#[derive(Debug, Default)]
struct SequenceState {
    next: u64,
    unseen: HashSet<u64>,
}

impl SequenceNonceSource {
    /// A source starting at zero.
    pub fn new() -> SequenceNonceSource {
        SequenceNonceSource::default()
    }
}

impl NonceSource for SequenceNonceSource {
    fn mint(&self) -> Result<String, Error> {
        let mut state = self.state.lock().expect("nonce state poisoned");
        let id = state.next;
        state.next += 1;
        state.unseen.insert(id);
        Ok(id.to_string())
    }

    fn verify(&self, nonce: &str) -> Result<(), Error> {
        let id: u64 = nonce
            .parse()
            .map_err(|_| Error::BadNonce(nonce.to_owned()))?;
        let mut state = self.state.lock().expect("nonce state poisoned");
        if state.unseen.remove(&id) {
            Ok(())
        } else {
            Err(Error::BadNonce(nonce.to_owned()))
        }
    }
}

/// A production nonce source minting cryptographically unpredictable
/// tokens and tracking the outstanding ones.
#[cfg(feature = "ring")]
#[derive(Debug, Default)]
pub struct RandomNonceSource {
    outstanding: Mutex<HashSet<String>>,
}

#[cfg(feature = "ring")]
impl RandomNonceSource {
    /// An empty source.
    pub fn new() -> RandomNonceSource {
        RandomNonceSource::default()
    }
}

#[cfg(feature = "ring")]
impl NonceSource for RandomNonceSource {
    fn mint(&self) -> Result<String, Error> {
        use ring::rand::{SecureRandom, SystemRandom};

        let mut bytes = [0u8; 16];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| Error::Crypto)?;
        let nonce = crate::codec::base64url(&bytes);
        self.outstanding
            .lock()
            .expect("nonce set poisoned")
            .insert(nonce.clone());
        Ok(nonce)
    }

    fn verify(&self, nonce: &str) -> Result<(), Error> {
        if self
            .outstanding
            .lock()
            .expect("nonce set poisoned")
            .remove(nonce)
        {
            Ok(())
        } else {
            Err(Error::BadNonce(nonce.to_owned()))
        }
    }
}
