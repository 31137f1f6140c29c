//! Wires the listeners, the gossip strategy and the router into one node.

use crate::api::ApiServer;
use crate::config::NodeConfig;
use crate::error::NodeResult;
use crate::registry::TypeRegistry;
use crate::router::Router;
use futures::future::join_all;
use rumor_p2p::{ConnectionManager, GossipStrategy, PeerTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Depth of the channels between the router, the strategy and the API server.
const CHANNEL_BUFFER: usize = 256;

/// A running gossip node.
pub struct GossipNode {
    api: ApiServer,
    p2p_addr: SocketAddr,
    strategy: GossipStrategy,
    registry: Arc<TypeRegistry>,
    router_cancel: CancellationToken,
    router: JoinHandle<()>,
}

impl GossipNode {
    /// Binds both listeners, starts the strategy and router, then dials the
    /// configured neighbors.
    ///
    /// Neighbors that cannot be reached are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a listener cannot
    /// be bound.
    pub async fn start(config: &NodeConfig) -> NodeResult<Self> {
        config.validate()?;
        let strategy_config = config.strategy_config();

        let (api, module_events) = ApiServer::bind(config.network.api_address, CHANNEL_BUFFER).await?;
        let (transport, peer_events) =
            match PeerTransport::bind(config.network.p2p_address, &strategy_config).await {
                Ok(bound) => bound,
                Err(e) => {
                    api.close().await;
                    return Err(e.into());
                }
            };
        let transport = Arc::new(transport);
        let p2p_addr = transport.local_addr();

        let (to_strategy, commands) = mpsc::channel(CHANNEL_BUFFER);
        let (notifications, from_strategy) = mpsc::channel(CHANNEL_BUFFER);
        let strategy = GossipStrategy::spawn(
            strategy_config,
            Box::new(Arc::clone(&transport)),
            peer_events,
            commands,
            notifications,
        );

        let registry = Arc::new(TypeRegistry::new());
        let router_cancel = CancellationToken::new();
        let router = tokio::spawn(Router::new(Arc::clone(&registry), to_strategy).run(
            module_events,
            from_strategy,
            router_cancel.clone(),
        ));

        let dials = config
            .network
            .neighbors
            .iter()
            .map(|&addr| {
                let transport = Arc::clone(&transport);
                async move {
                    if let Err(e) = transport.dial(addr).await {
                        warn!(peer = %addr, error = %e, "Failed to dial neighbor");
                    }
                }
            });
        join_all(dials).await;

        info!(
            api = %api.local_addr(),
            p2p = %p2p_addr,
            neighbors = config.network.neighbors.len(),
            "Gossip node started"
        );

        Ok(Self {
            api,
            p2p_addr,
            strategy,
            registry,
            router_cancel,
            router,
        })
    }

    /// Address modules connect to.
    #[must_use]
    pub const fn api_addr(&self) -> SocketAddr {
        self.api.local_addr()
    }

    /// Address peers connect to.
    #[must_use]
    pub const fn p2p_addr(&self) -> SocketAddr {
        self.p2p_addr
    }

    /// Peer connection registry.
    #[must_use]
    pub fn connections(&self) -> Arc<ConnectionManager> {
        self.strategy.connections()
    }

    /// Module type registry.
    #[must_use]
    pub fn registry(&self) -> Arc<TypeRegistry> {
        Arc::clone(&self.registry)
    }

    /// Stops the router and the module API, then closes the strategy and
    /// its transport.
    pub async fn shutdown(self) {
        self.router_cancel.cancel();
        if let Err(e) = self.router.await {
            warn!(error = %e, "Router task ended abnormally");
        }
        self.api.close().await;
        self.strategy.close().await;
        info!("Gossip node stopped");
    }
}
