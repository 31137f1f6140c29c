//! # rumor-admission
//!
//! Admission control primitives for the rumor gossip network.
//!
//! This crate provides:
//!
//! - Stateless challenge cookies sealed with ChaCha20-Poly1305
//! - A parallel proof-of-work solver over SHA-256 digests
//! - Connection identities shared by the transport and routing layers
//!
//! ## Core Types
//!
//! - [`Cookie`]: Challenge bound to a connection and an issuance time
//! - [`CookieKey`]: Symmetric key used to seal cookies
//! - [`ProofOfWork`]: Multi-threaded nonce search
//! - [`PowCarrier`]: Anything that carries a trailing nonce
//! - [`ConnectionId`]: Identity of a peer or module connection

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cookie;
pub mod error;
pub mod id;
pub mod pow;

pub use cookie::{CHALLENGE_SIZE, Cookie, CookieKey, KEY_SIZE, TAG_SIZE};
pub use error::{AdmissionError, AdmissionResult};
pub use id::ConnectionId;
pub use pow::{
    DEFAULT_WORKERS, HashDigest, PowCarrier, PowNonce, ProofOfWork, check_proof_of_work,
    difficulty, digest_of, leading_zero_bits,
};
