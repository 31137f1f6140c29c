//! Gossip strategy configuration.

use std::time::Duration;

/// Tunables for the gossip strategy and its admission handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyConfig {
    /// Maximum peers contacted per round, and cumulative fan-out per message.
    pub degree: usize,
    /// Maximum number of messages waiting to be relayed.
    pub cache_size: usize,
    /// Period of dissemination rounds.
    pub gossip_interval: Duration,
    /// Rounds a pending message is offered before it is dropped.
    pub relay_rounds: u32,
    /// Number of message ids remembered for deduplication.
    pub seen_cache_size: usize,
    /// Leading zero bits required of proof digests.
    pub difficulty: u32,
    /// Proof-of-work search threads.
    pub pow_workers: usize,
    /// Oldest cookie accepted in a proof.
    pub cookie_max_age: Duration,
    /// Period between re-challenges of valid peers.
    pub challenge_interval: Duration,
    /// Valid peers that have not re-proved within this window are dropped.
    pub validity_timeout: Duration,
    /// Connections that have not finished the handshake within this window are dropped.
    pub handshake_timeout: Duration,
    /// Outbound queue depth per peer.
    pub channel_buffer: usize,
    /// Timeout when dialing a neighbor.
    pub connect_timeout: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            degree: 30,
            cache_size: 50,
            gossip_interval: Duration::from_secs(1),
            relay_rounds: 3,
            seen_cache_size: 1000,
            difficulty: 20,
            pow_workers: rumor_admission::DEFAULT_WORKERS,
            cookie_max_age: Duration::from_secs(60),
            challenge_interval: Duration::from_secs(30),
            validity_timeout: Duration::from_secs(90),
            handshake_timeout: Duration::from_secs(30),
            channel_buffer: 256,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl StrategyConfig {
    /// Creates a config suited to local testing: cheap proofs and fast rounds.
    #[must_use]
    pub fn local_testing() -> Self {
        Self {
            gossip_interval: Duration::from_millis(50),
            difficulty: 8,
            pow_workers: 4,
            challenge_interval: Duration::from_secs(5),
            validity_timeout: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ..Self::default()
        }
    }

    /// Sets the gossip degree.
    #[must_use]
    pub const fn with_degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    /// Sets the pending cache size.
    #[must_use]
    pub const fn with_cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Sets the round period.
    #[must_use]
    pub const fn with_gossip_interval(mut self, interval: Duration) -> Self {
        self.gossip_interval = interval;
        self
    }

    /// Sets how many rounds a message is offered.
    #[must_use]
    pub const fn with_relay_rounds(mut self, rounds: u32) -> Self {
        self.relay_rounds = rounds;
        self
    }

    /// Sets the proof-of-work difficulty in bits.
    #[must_use]
    pub const fn with_difficulty(mut self, bits: u32) -> Self {
        self.difficulty = bits;
        self
    }

    /// Sets the number of proof-of-work threads.
    #[must_use]
    pub const fn with_pow_workers(mut self, workers: usize) -> Self {
        self.pow_workers = workers;
        self
    }

    /// Sets the maximum accepted cookie age.
    #[must_use]
    pub const fn with_cookie_max_age(mut self, max_age: Duration) -> Self {
        self.cookie_max_age = max_age;
        self
    }

    /// Sets the re-challenge period and the validity window.
    #[must_use]
    pub const fn with_revalidation(mut self, challenge_interval: Duration, validity_timeout: Duration) -> Self {
        self.challenge_interval = challenge_interval;
        self.validity_timeout = validity_timeout;
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}
