//! Parallel proof-of-work search.
//!
//! A carrier is any value whose serialized form ends in a fixed-width
//! big-endian nonce. The engine searches for a nonce whose SHA-256 digest over
//! the serialized carrier (minus an optional skipped prefix) satisfies a
//! caller supplied predicate.
//!
//! Work is split across `W` scoped threads: worker `i` tests
//! `start + i`, `start + i + W`, `start + i + 2W`, ... so no candidate is tested
//! twice. The invariant part of the message is hashed once and the hasher
//! state is cloned for each candidate.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// A SHA-256 digest.
pub type HashDigest = [u8; 32];

/// Default number of search workers.
pub const DEFAULT_WORKERS: usize = 32;

/// How often workers poll the external cancellation token.
const CANCEL_POLL_INTERVAL: u64 = 256;

/// Unsigned integer usable as a proof-of-work nonce.
pub trait PowNonce: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Width of the big-endian encoding in bytes.
    const WIDTH: usize;

    /// Adds `by` with wraparound.
    #[must_use]
    fn wrapping_step(self, by: u64) -> Self;

    /// Feeds the big-endian encoding into `hasher`.
    fn hash_into(self, hasher: &mut Sha256);
}

macro_rules! impl_pow_nonce {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PowNonce for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn wrapping_step(self, by: u64) -> Self {
                    self.wrapping_add(by as $ty)
                }

                fn hash_into(self, hasher: &mut Sha256) {
                    hasher.update(self.to_be_bytes());
                }
            }
        )*
    };
}

impl_pow_nonce!(u8, u16, u32, u64, u128);

/// A value carrying a proof-of-work nonce.
///
/// `marshal` must end with the nonce encoded as `Self::Nonce::WIDTH` big-endian
/// bytes. Bytes before `skip_prefix()` are excluded from the digest.
pub trait PowCarrier: Clone + Send + Sync {
    /// Nonce type.
    type Nonce: PowNonce;

    /// Serializes the carrier, nonce last.
    fn marshal(&self) -> Vec<u8>;

    /// Returns the current nonce.
    fn nonce(&self) -> Self::Nonce;

    /// Replaces the nonce.
    fn set_nonce(&mut self, nonce: Self::Nonce);

    /// Advances the nonce by one, wrapping at the type's maximum.
    fn increment_nonce(&mut self) {
        let next = self.nonce().wrapping_step(1);
        self.set_nonce(next);
    }

    /// Number of leading marshaled bytes that are not hashed.
    fn skip_prefix(&self) -> usize {
        0
    }
}

/// Computes the digest of a carrier as submitted.
#[must_use]
pub fn digest_of<C: PowCarrier>(carrier: &C) -> HashDigest {
    let bytes = carrier.marshal();
    let skip = carrier.skip_prefix().min(bytes.len());
    Sha256::digest(&bytes[skip..]).into()
}

/// Evaluates `predicate` once over the carrier's digest.
pub fn check_proof_of_work<C, P>(carrier: &C, predicate: P) -> bool
where
    C: PowCarrier,
    P: Fn(&HashDigest) -> bool,
{
    predicate(&digest_of(carrier))
}

/// Counts the leading zero bits of a digest.
#[must_use]
pub fn leading_zero_bits(digest: &HashDigest) -> u32 {
    let mut bits = 0;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// Predicate requiring at least `bits` leading zero bits.
#[must_use]
pub fn difficulty(bits: u32) -> impl Fn(&HashDigest) -> bool + Copy + Send + Sync {
    move |digest| leading_zero_bits(digest) >= bits
}

/// Multi-threaded nonce search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    workers: usize,
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl ProofOfWork {
    /// Creates an engine with `workers` threads (at least one).
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Searches for a nonce, starting from the carrier's current one.
    ///
    /// Blocks the calling thread until a solution is found, the nonce space
    /// is exhausted, or `cancel` fires. Every worker thread has exited by the
    /// time this returns. Returns `None` when no solution was found.
    pub fn solve<C, P>(&self, carrier: &C, predicate: P, cancel: &CancellationToken) -> Option<C>
    where
        C: PowCarrier,
        P: Fn(&HashDigest) -> bool + Sync,
    {
        let width = <C::Nonce as PowNonce>::WIDTH;
        let marshaled = carrier.marshal();
        let Some(body_end) = marshaled.len().checked_sub(width) else {
            warn!(
                len = marshaled.len(),
                width, "carrier is shorter than its nonce, refusing to search"
            );
            return None;
        };
        let skip = carrier.skip_prefix().min(body_end);

        let mut base = Sha256::new();
        base.update(&marshaled[skip..body_end]);

        // Bounded only for nonce types narrower than u128.
        let space: Option<u128> = (width < 16).then(|| 1u128 << (width * 8));
        let stride = self.workers as u64;
        let start = carrier.nonce();

        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::sync_channel::<C::Nonce>(1);

        std::thread::scope(|scope| {
            for worker in 0..self.workers {
                let tx = tx.clone();
                let base = &base;
                let stop = &stop;
                let predicate = &predicate;
                scope.spawn(move || {
                    let mut nonce = start.wrapping_step(worker as u64);
                    let mut tested: u64 = 0;
                    loop {
                        if stop.load(Ordering::Relaxed) {
                            return;
                        }
                        if tested % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
                            stop.store(true, Ordering::Relaxed);
                            return;
                        }
                        if let Some(space) = space {
                            let offset = worker as u128 + u128::from(tested) * u128::from(stride);
                            if offset >= space {
                                trace!(worker, tested, "nonce space exhausted");
                                return;
                            }
                        }

                        let mut hasher = base.clone();
                        nonce.hash_into(&mut hasher);
                        let digest: HashDigest = hasher.finalize().into();
                        if predicate(&digest) {
                            // Only the first winner fills the slot.
                            let _ = tx.try_send(nonce);
                            stop.store(true, Ordering::Relaxed);
                            return;
                        }

                        nonce = nonce.wrapping_step(stride);
                        tested += 1;
                    }
                });
            }
        });
        drop(tx);

        let nonce = rx.try_recv().ok()?;
        let mut solved = carrier.clone();
        solved.set_nonce(nonce);
        debug!(?nonce, workers = self.workers, "proof of work found");
        Some(solved)
    }
}
