//! Node configuration.
//!
//! Configuration for a rumor node, split into:
//! - Gossip tunables (`[gossip]`), converted into a [`StrategyConfig`]
//! - Listener addresses and bootstrap neighbors (`[network]`)

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use rumor_p2p::StrategyConfig;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;

/// Gossip dissemination and admission tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GossipConfig {
    /// Neighbors contacted per round.
    pub degree: usize,
    /// Pending-message cap.
    pub cache_size: usize,
    /// Round period in seconds.
    pub gossip_timer: f64,
    /// Rounds a pending message is offered before it is dropped.
    pub relay_rounds: u32,
    /// Message ids remembered for deduplication.
    pub seen_cache_size: usize,
    /// Leading zero bits required of proof digests.
    pub difficulty: u32,
    /// Proof-of-work search threads.
    pub pow_workers: usize,
    /// Oldest cookie accepted, in seconds.
    pub cookie_max_age: u64,
    /// Seconds between re-challenges of admitted peers.
    pub challenge_interval: u64,
    /// Seconds a valid peer may go without re-proving.
    pub validity_timeout: u64,
    /// Seconds a new connection has to finish the handshake.
    pub handshake_timeout: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            degree: 30,
            cache_size: 50,
            gossip_timer: 1.0,
            relay_rounds: 3,
            seen_cache_size: 1000,
            difficulty: 20,
            pow_workers: rumor_admission::DEFAULT_WORKERS,
            cookie_max_age: 60,
            challenge_interval: 30,
            validity_timeout: 90,
            handshake_timeout: 30,
        }
    }
}

/// Listener addresses and bootstrap peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address of the local module API.
    pub api_address: SocketAddr,
    /// Address peers connect to.
    pub p2p_address: SocketAddr,
    /// Peers dialed at startup.
    pub neighbors: Vec<SocketAddr>,
    /// Seconds to wait when dialing a neighbor.
    pub connect_timeout: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_address: SocketAddr::from(([127, 0, 0, 1], 7001)),
            p2p_address: SocketAddr::from(([127, 0, 0, 1], 6001)),
            neighbors: Vec::new(),
            connect_timeout: 10,
        }
    }
}

/// Main node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Gossip configuration.
    #[serde(default)]
    pub gossip: GossipConfig,
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            NodeError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, NodeError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| NodeError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self)
            .map_err(|e| NodeError::Config(format!("failed to serialize config: {e}")))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), NodeError> {
        let gossip = &self.gossip;

        if gossip.degree == 0 {
            return Err(NodeError::Config(
                "gossip.degree must be greater than 0".to_string(),
            ));
        }

        if gossip.cache_size == 0 {
            return Err(NodeError::Config(
                "gossip.cache_size must be greater than 0".to_string(),
            ));
        }

        if !gossip.gossip_timer.is_finite() || gossip.gossip_timer <= 0.0 {
            return Err(NodeError::Config(
                "gossip.gossip_timer must be a positive number of seconds".to_string(),
            ));
        }

        for (name, secs) in [
            ("cookie_max_age", gossip.cookie_max_age),
            ("challenge_interval", gossip.challenge_interval),
            ("validity_timeout", gossip.validity_timeout),
            ("handshake_timeout", gossip.handshake_timeout),
        ] {
            if secs == 0 {
                return Err(NodeError::Config(format!(
                    "gossip.{name} must be greater than 0"
                )));
            }
        }

        if gossip.difficulty > 256 {
            return Err(NodeError::Config(
                "gossip.difficulty cannot exceed 256 bits".to_string(),
            ));
        }

        if gossip.pow_workers == 0 {
            return Err(NodeError::Config(
                "gossip.pow_workers must be greater than 0".to_string(),
            ));
        }

        if gossip.validity_timeout <= gossip.challenge_interval {
            return Err(NodeError::Config(
                "gossip.validity_timeout must exceed gossip.challenge_interval".to_string(),
            ));
        }

        if self.network.connect_timeout == 0 {
            return Err(NodeError::Config(
                "network.connect_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Converts the gossip section into strategy settings.
    ///
    /// Call after [`validate`](Self::validate); an unrepresentable round
    /// period falls back to the default.
    #[must_use]
    pub fn strategy_config(&self) -> StrategyConfig {
        let gossip = &self.gossip;
        let defaults = StrategyConfig::default();
        let gossip_interval = Duration::try_from_secs_f64(gossip.gossip_timer)
            .unwrap_or(defaults.gossip_interval);

        StrategyConfig {
            degree: gossip.degree,
            cache_size: gossip.cache_size,
            gossip_interval,
            relay_rounds: gossip.relay_rounds,
            seen_cache_size: gossip.seen_cache_size,
            difficulty: gossip.difficulty,
            pow_workers: gossip.pow_workers,
            cookie_max_age: Duration::from_secs(gossip.cookie_max_age),
            challenge_interval: Duration::from_secs(gossip.challenge_interval),
            validity_timeout: Duration::from_secs(gossip.validity_timeout),
            handshake_timeout: Duration::from_secs(gossip.handshake_timeout),
            connect_timeout: Duration::from_secs(self.network.connect_timeout),
            ..defaults
        }
    }
}
