//! Routes messages between local modules and the gossip strategy.

use crate::api::{FromModule, ModuleEvent, ModuleSender, ToModule};
use crate::error::{NodeError, NodeResult};
use crate::registry::{RegisteredModule, TypeRegistry};
use rumor_admission::ConnectionId;
use rumor_p2p::{FromStrategy, ToStrategy};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Central event loop between modules and the strategy.
pub struct Router {
    registry: Arc<TypeRegistry>,
    to_strategy: mpsc::Sender<ToStrategy>,
    modules: HashMap<ConnectionId, ModuleSender>,
}

impl Router {
    /// Creates a router over a shared registry.
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>, to_strategy: mpsc::Sender<ToStrategy>) -> Self {
        Self {
            registry,
            to_strategy,
            modules: HashMap::new(),
        }
    }

    /// Returns the shared registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Runs until `cancel` fires or both inputs close.
    pub async fn run(
        mut self,
        mut module_events: mpsc::Receiver<ModuleEvent>,
        mut from_strategy: mpsc::Receiver<FromStrategy>,
        cancel: CancellationToken,
    ) {
        let mut modules_open = true;
        let mut strategy_open = true;

        while modules_open || strategy_open {
            // Module events first so a subscription is applied before
            // notifications queued after it.
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = module_events.recv(), if modules_open => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_module_event(event).await {
                            warn!(error = %e, "Module request failed");
                        }
                    }
                    None => modules_open = false,
                },
                notification = from_strategy.recv(), if strategy_open => match notification {
                    Some(notification) => {
                        if let Err(e) = self.handle_notification(notification).await {
                            warn!(error = %e, "Notification not delivered");
                        }
                    }
                    None => strategy_open = false,
                },
            }
        }

        info!("Router stopped");
    }

    /// Applies one module event.
    ///
    /// # Errors
    ///
    /// Returns registry errors and [`NodeError::ChannelClosed`] if the
    /// strategy is gone.
    pub async fn handle_module_event(&mut self, event: ModuleEvent) -> NodeResult<()> {
        match event {
            ModuleEvent::Connected { id, sender } => {
                debug!(module = %id, "Module attached");
                self.modules.insert(id, sender);
                Ok(())
            }
            ModuleEvent::Message { id, message } => match message {
                FromModule::Notify { data_type } => self.handle_notify(&id, data_type),
                FromModule::Announce {
                    ttl,
                    data_type,
                    payload,
                } => self.handle_announce(ttl, data_type, payload).await,
                FromModule::Validation { message_id, valid } => {
                    self.handle_validation(message_id, valid).await
                }
            },
            ModuleEvent::Disconnected { id } => {
                self.modules.remove(&id);
                match self.registry.unregister(&id) {
                    Ok(_) => debug!(module = %id, "Module detached"),
                    Err(NodeError::ModuleNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                Ok(())
            }
        }
    }

    /// Registers the module for a gossip type.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ModuleNotFound`] for an unknown module and
    /// [`NodeError::DuplicateRegistration`] for a repeated subscription.
    pub fn handle_notify(&self, id: &ConnectionId, data_type: u16) -> NodeResult<()> {
        let sender = self
            .modules
            .get(id)
            .cloned()
            .ok_or_else(|| NodeError::ModuleNotFound(id.clone()))?;
        self.registry
            .register(data_type, RegisteredModule::new(sender))?;
        info!(module = %id, data_type, "Module subscribed");
        Ok(())
    }

    /// Forwards a local announcement to the strategy.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::TypeNotRegistered`] if no local module registered
    /// the type; nothing is forwarded in that case.
    pub async fn handle_announce(
        &self,
        ttl: u8,
        data_type: u16,
        payload: Vec<u8>,
    ) -> NodeResult<()> {
        if !self.registry.is_registered(data_type) {
            return Err(NodeError::TypeNotRegistered(data_type));
        }
        self.send_to_strategy(ToStrategy::Announce {
            ttl,
            data_type,
            payload,
        })
        .await
    }

    /// Forwards a module's verdict to the strategy.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ChannelClosed`] if the strategy is gone.
    pub async fn handle_validation(&self, message_id: u16, valid: bool) -> NodeResult<()> {
        self.send_to_strategy(ToStrategy::Validation { message_id, valid })
            .await
    }

    /// Delivers a notification to every module registered for its type.
    ///
    /// When no module takes it, or it is too large for a module frame, the
    /// strategy receives a negative validation so the message is not relayed.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ChannelClosed`] if the strategy is gone.
    pub async fn handle_notification(&self, notification: FromStrategy) -> NodeResult<()> {
        let FromStrategy::Notification {
            message_id,
            data_type,
            payload,
        } = notification;

        let message = ToModule::Notification {
            message_id,
            data_type,
            payload,
        };
        if let Err(e) = message.frame_size() {
            warn!(message_id, data_type, error = %e, "Notification cannot reach modules");
            return self.handle_validation(message_id, false).await;
        }

        let mut delivered = 0usize;
        for module in self.registry.modules_for(data_type) {
            match module.sender().try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(module = %module.id(), error = %e, "Dropping notification"),
            }
        }

        if delivered == 0 {
            debug!(message_id, data_type, "No module took notification");
            return self.handle_validation(message_id, false).await;
        }
        Ok(())
    }

    async fn send_to_strategy(&self, command: ToStrategy) -> NodeResult<()> {
        self.to_strategy
            .send(command)
            .await
            .map_err(|_| NodeError::ChannelClosed("strategy"))
    }
}
