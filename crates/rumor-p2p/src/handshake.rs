//! Cookie-and-proof admission handshake.
//!
//! The accepting side seals a [`Cookie`] for the new connection and sends it
//! as a challenge. The dialing side searches for a nonce such that the
//! SHA-256 digest of the [`CookieProof`] has enough leading zero bits, and
//! returns the cookie with that nonce. Nothing is stored between the two
//! steps: the cookie itself carries the destination and issuance time.

use crate::config::StrategyConfig;
use crate::error::{P2pError, P2pResult};
use rumor_admission::{
    ConnectionId, Cookie, CookieKey, PowCarrier, ProofOfWork, check_proof_of_work, difficulty,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Frame kind written into the proof header.
const PROOF_KIND: u16 = 0x0002;

/// Largest cookie accepted in a challenge or proof.
///
/// Sealed cookies are a few dozen bytes plus the destination address; the
/// bound keeps every length in the proof header within `u16`.
pub const MAX_COOKIE_LEN: usize = 1024;

/// Rejects cookies longer than [`MAX_COOKIE_LEN`].
///
/// # Errors
///
/// Returns [`P2pError::CookieTooLarge`] for oversized cookies.
pub fn check_cookie_len(cookie: &[u8]) -> P2pResult<()> {
    if cookie.len() > MAX_COOKIE_LEN {
        return Err(P2pError::CookieTooLarge {
            len: cookie.len(),
            max: MAX_COOKIE_LEN,
        });
    }
    Ok(())
}

/// Header bytes excluded from the digest.
const HEADER_SIZE: usize = 4;

/// A sealed cookie and the nonce proving work over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieProof {
    cookie: Vec<u8>,
    nonce: u64,
}

impl CookieProof {
    /// Creates a proof carrier.
    #[must_use]
    pub const fn new(cookie: Vec<u8>, nonce: u64) -> Self {
        Self { cookie, nonce }
    }

    /// Returns the sealed cookie.
    #[must_use]
    pub fn cookie(&self) -> &[u8] {
        &self.cookie
    }

    /// Splits the proof into cookie and nonce.
    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, u64) {
        (self.cookie, self.nonce)
    }
}

impl PowCarrier for CookieProof {
    type Nonce = u64;

    /// `size:u16 | kind:u16 | cookie_len:u16 | cookie | nonce:u64`, big-endian.
    ///
    /// Lengths saturate at `u16::MAX`; cookies within [`MAX_COOKIE_LEN`]
    /// never reach it.
    fn marshal(&self) -> Vec<u8> {
        let body_len = 2 + self.cookie.len() + 8;
        let size = u16::try_from(HEADER_SIZE + body_len).unwrap_or(u16::MAX);
        let cookie_len = u16::try_from(self.cookie.len()).unwrap_or(u16::MAX);
        let mut out = Vec::with_capacity(HEADER_SIZE + body_len);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&PROOF_KIND.to_be_bytes());
        out.extend_from_slice(&cookie_len.to_be_bytes());
        out.extend_from_slice(&self.cookie);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out
    }

    fn nonce(&self) -> u64 {
        self.nonce
    }

    fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    fn skip_prefix(&self) -> usize {
        HEADER_SIZE
    }
}

/// Proof-of-work settings detached from the cookie key, for use off the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofSolver {
    engine: ProofOfWork,
    difficulty: u32,
}

impl ProofSolver {
    /// Creates a solver.
    #[must_use]
    pub const fn new(engine: ProofOfWork, difficulty: u32) -> Self {
        Self { engine, difficulty }
    }

    /// Solves a challenge on the blocking pool.
    ///
    /// Returns `None` if cancelled or if the blocking task failed.
    pub async fn solve(self, cookie: Vec<u8>, cancel: CancellationToken) -> Option<CookieProof> {
        let carrier = CookieProof::new(cookie, rand::random());
        let bits = self.difficulty;
        tokio::task::spawn_blocking(move || {
            self.engine.solve(&carrier, difficulty(bits), &cancel)
        })
        .await
        .ok()
        .flatten()
    }
}

/// Issues challenges and verifies proofs.
#[derive(Debug, Clone)]
pub struct Admission {
    key: CookieKey,
    solver: ProofSolver,
    cookie_max_age: Duration,
}

impl Admission {
    /// Creates an admission controller.
    #[must_use]
    pub const fn new(key: CookieKey, solver: ProofSolver, cookie_max_age: Duration) -> Self {
        Self {
            key,
            solver,
            cookie_max_age,
        }
    }

    /// Creates an admission controller with a fresh random key.
    #[must_use]
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(
            CookieKey::generate(),
            ProofSolver::new(ProofOfWork::new(config.pow_workers), config.difficulty),
            config.cookie_max_age,
        )
    }

    /// Returns the solver for answering challenges.
    #[must_use]
    pub const fn solver(&self) -> ProofSolver {
        self.solver
    }

    /// Seals a fresh cookie for `destination`.
    ///
    /// # Errors
    ///
    /// Returns an error if sealing fails.
    pub fn issue(&self, destination: &ConnectionId) -> P2pResult<Vec<u8>> {
        Ok(Cookie::new(destination.clone()).seal(&self.key)?)
    }

    /// Checks a proof received on connection `from`.
    ///
    /// # Errors
    ///
    /// Returns [`P2pError::CookieTooLarge`] for an oversized cookie,
    /// [`P2pError::Admission`] if the cookie does not open, names another
    /// connection, or is stale, and [`P2pError::InsufficientWork`] if the
    /// digest misses the difficulty.
    pub fn verify(&self, from: &ConnectionId, proof: &CookieProof) -> P2pResult<()> {
        check_cookie_len(proof.cookie())?;
        let cookie = Cookie::open(&self.key, proof.cookie())?;
        cookie.check(from, self.cookie_max_age)?;
        if !check_proof_of_work(proof, difficulty(self.solver.difficulty)) {
            debug!(peer = %from, "proof misses difficulty");
            return Err(P2pError::InsufficientWork);
        }
        Ok(())
    }
}
