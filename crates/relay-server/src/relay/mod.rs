//! Relay core: admission, routing, liveness, and termination.

pub mod gateway;
pub mod liveness;
pub mod router;
pub mod termination;

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::config::ServerConfig;
use crate::registry::{SessionRegistry, SessionStore};
use crate::websocket::hub::ConnectionHub;

use self::gateway::Gateway;
use self::liveness::{ExpirySweeper, Liveness};
use self::router::RelayRouter;
use self::termination::Terminator;

/// Shared services handed to every connection and HTTP handler.
pub struct RelayContext {
    /// Resolved configuration.
    pub config: ServerConfig,
    /// Session registry.
    pub registry: Arc<SessionRegistry>,
    /// Channel publisher.
    pub router: Arc<RelayRouter>,
    /// Local connections.
    pub hub: Arc<ConnectionHub>,
    /// Handshake admission.
    pub gateway: Gateway,
    /// TTL refresh.
    pub liveness: Liveness,
    /// Session teardown.
    pub terminator: Terminator,
}

impl RelayContext {
    /// Wire the relay services over a store and a bus.
    pub fn new(config: ServerConfig, store: Arc<dyn SessionStore>, bus: Arc<dyn MessageBus>) -> Self {
        let registry = Arc::new(SessionRegistry::new(store, config.session_ttl_secs));
        let router = Arc::new(RelayRouter::new(bus, config.retry.clone()));
        let hub = Arc::new(ConnectionHub::new());
        let gateway = Gateway::new(registry.clone(), router.clone(), hub.clone(), config.role_conflict);
        let liveness = Liveness::new(registry.clone(), config.retry.clone());
        let terminator = Terminator::new(registry.clone(), router.clone(), hub.clone());
        Self {
            config,
            registry,
            router,
            hub,
            gateway,
            liveness,
            terminator,
        }
    }

    /// Expiry sweeper bound to this context.
    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.registry.clone(),
            self.hub.clone(),
            self.terminator.clone(),
            self.config.sweep_interval,
        )
    }
}
