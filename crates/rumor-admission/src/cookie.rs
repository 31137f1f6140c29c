//! Stateless admission cookies.
//!
//! A cookie binds a random challenge, an issuance time and the identity of the
//! connection it was issued to. It is sealed with ChaCha20-Poly1305 using the
//! challenge itself as the AEAD nonce, and the challenge is sent in clear in
//! front of the ciphertext. The issuer keeps no record of the cookies it hands
//! out: a cookie is accepted when it opens under the issuer's key, names the
//! connection it arrives on, and is recent enough.
//!
//! Sealed layout: `challenge || AEAD(timestamp_ms || challenge || destination)`

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AdmissionError, AdmissionResult};
use crate::id::ConnectionId;

/// Size of the cookie key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of the challenge in bytes; equal to the AEAD nonce size.
pub const CHALLENGE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const TIMESTAMP_SIZE: usize = 8;

/// Symmetric key used to seal and open cookies.
///
/// The key is zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CookieKey {
    bytes: [u8; KEY_SIZE],
}

impl CookieKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> AdmissionResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| AdmissionError::InvalidKey {
            reason: format!("key must be exactly {KEY_SIZE} bytes, got {}", bytes.len()),
        })?;
        Ok(Self { bytes })
    }

    /// Returns the key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(&self.bytes.into())
    }
}

impl std::fmt::Debug for CookieKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// An admission challenge bound to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    challenge: [u8; CHALLENGE_SIZE],
    issued_at_ms: i64,
    destination: ConnectionId,
}

impl Cookie {
    /// Creates a fresh cookie for `destination` with a random challenge.
    #[must_use]
    pub fn new(destination: impl Into<ConnectionId>) -> Self {
        let mut challenge = [0u8; CHALLENGE_SIZE];
        rand::thread_rng().fill_bytes(&mut challenge);
        Self {
            challenge,
            issued_at_ms: Utc::now().timestamp_millis(),
            destination: destination.into(),
        }
    }

    /// Returns the random challenge.
    #[must_use]
    pub const fn challenge(&self) -> &[u8; CHALLENGE_SIZE] {
        &self.challenge
    }

    /// Returns the issuance time in unix milliseconds.
    #[must_use]
    pub const fn issued_at_ms(&self) -> i64 {
        self.issued_at_ms
    }

    /// Returns the issuance time.
    #[must_use]
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.issued_at_ms)
    }

    /// Returns the connection this cookie was issued to.
    #[must_use]
    pub const fn destination(&self) -> &ConnectionId {
        &self.destination
    }

    /// Seals the cookie under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the AEAD refuses the input.
    pub fn seal(&self, key: &CookieKey) -> AdmissionResult<Vec<u8>> {
        let destination = self.destination.as_bytes();
        let mut plaintext =
            Vec::with_capacity(TIMESTAMP_SIZE + CHALLENGE_SIZE + destination.len());
        plaintext.extend_from_slice(&self.issued_at_ms.to_be_bytes());
        plaintext.extend_from_slice(&self.challenge);
        plaintext.extend_from_slice(destination);

        let ciphertext = key
            .cipher()
            .encrypt(Nonce::from_slice(&self.challenge), plaintext.as_slice())
            .map_err(|e| AdmissionError::MalformedCookie {
                reason: format!("sealing failed: {e}"),
            })?;

        let mut sealed = Vec::with_capacity(CHALLENGE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&self.challenge);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Opens a sealed cookie.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::CookieAuthentication`] if decryption fails and
    /// [`AdmissionError::MalformedCookie`] if the input is too short or the
    /// decrypted contents are inconsistent.
    pub fn open(key: &CookieKey, sealed: &[u8]) -> AdmissionResult<Self> {
        let minimum = CHALLENGE_SIZE + TAG_SIZE + TIMESTAMP_SIZE + CHALLENGE_SIZE;
        if sealed.len() < minimum {
            return Err(AdmissionError::MalformedCookie {
                reason: format!(
                    "expected at least {minimum} bytes, got {}",
                    sealed.len()
                ),
            });
        }

        let (nonce, ciphertext) = sealed.split_at(CHALLENGE_SIZE);
        let plaintext = key
            .cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AdmissionError::CookieAuthentication)?;

        let (timestamp, rest) = plaintext.split_at(TIMESTAMP_SIZE);
        let (challenge, destination) = rest.split_at(CHALLENGE_SIZE);
        if challenge != nonce {
            return Err(AdmissionError::MalformedCookie {
                reason: "sealed challenge does not match its nonce".to_string(),
            });
        }

        let destination =
            String::from_utf8(destination.to_vec()).map_err(|e| AdmissionError::MalformedCookie {
                reason: format!("destination is not UTF-8: {e}"),
            })?;

        let mut issued = [0u8; TIMESTAMP_SIZE];
        issued.copy_from_slice(timestamp);
        let mut challenge_bytes = [0u8; CHALLENGE_SIZE];
        challenge_bytes.copy_from_slice(challenge);

        Ok(Self {
            challenge: challenge_bytes,
            issued_at_ms: i64::from_be_bytes(issued),
            destination: ConnectionId::from(destination),
        })
    }

    /// Checks that the cookie names `expected` and is at most `max_age` old.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::WrongDestination`] or [`AdmissionError::StaleCookie`].
    pub fn check(&self, expected: &ConnectionId, max_age: Duration) -> AdmissionResult<()> {
        self.check_at(expected, max_age, Utc::now())
    }

    /// Same as [`Cookie::check`] against an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::WrongDestination`] or [`AdmissionError::StaleCookie`].
    pub fn check_at(
        &self,
        expected: &ConnectionId,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> AdmissionResult<()> {
        if &self.destination != expected {
            return Err(AdmissionError::WrongDestination {
                expected: expected.to_string(),
                found: self.destination.to_string(),
            });
        }

        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let age_ms = now.timestamp_millis().saturating_sub(self.issued_at_ms);
        if age_ms > max_age_ms || age_ms < -max_age_ms {
            return Err(AdmissionError::StaleCookie { age_ms, max_age_ms });
        }
        Ok(())
    }
}
