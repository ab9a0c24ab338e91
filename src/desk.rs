//! `AgentDesk`, one handle wiring gateway, cache, mutations and notifier.

use std::sync::Arc;

use tracing::info;

use crate::cache::CacheStore;
use crate::config::DeskConfig;
use crate::error::{self, GatewayError};
use crate::gateway::{Gateway, HttpGateway};
use crate::model::{Agent, AgentListing, Document, HealthStatus, Pagination};
use crate::mutations::MutationCoordinator;
use crate::notifier::OperationNotifier;

/// Client-side state for the agent/document service.
///
/// Create one at startup and call [`AgentDesk::shutdown`] when done; tests
/// build independent instances with [`AgentDesk::with_gateway`].
#[derive(Clone)]
pub struct AgentDesk {
    gateway: Arc<dyn Gateway>,
    cache: CacheStore,
    notifier: OperationNotifier,
    mutations: MutationCoordinator,
}

impl AgentDesk {
    /// Talk to the service over HTTP at `config.api_base_url`.
    pub fn new(config: DeskConfig) -> error::Result<Self> {
        let gateway = HttpGateway::from_config(&config)?;
        info!(base_url = gateway.base_url(), "Agent desk connected over HTTP");
        Ok(Self::with_gateway(Arc::new(gateway), config))
    }

    pub fn with_gateway(gateway: Arc<dyn Gateway>, config: DeskConfig) -> Self {
        let cache = CacheStore::new(Arc::clone(&gateway), config.cache);
        let notifier = OperationNotifier::new(config.notifier);
        let mutations =
            MutationCoordinator::new(Arc::clone(&gateway), cache.clone(), notifier.clone());
        Self {
            gateway,
            cache,
            notifier,
            mutations,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn notifier(&self) -> &OperationNotifier {
        &self.notifier
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    pub async fn agents(&self, page: Pagination) -> Result<AgentListing, GatewayError> {
        self.cache.agents(page).await
    }

    pub async fn agent(&self, id: &str) -> Result<Option<Agent>, GatewayError> {
        self.cache.agent(id).await
    }

    pub async fn documents(&self, agent_id: &str) -> Result<Vec<Document>, GatewayError> {
        self.cache.documents(agent_id).await
    }

    pub async fn agent_details(&self, page: Pagination) -> Result<Vec<Agent>, GatewayError> {
        self.cache.agent_details(page).await
    }

    /// Service health. Never cached.
    pub async fn health(&self) -> Result<HealthStatus, GatewayError> {
        self.gateway.health().await
    }

    /// Cancel tracked operations and stop background refreshes.
    pub async fn shutdown(&self) {
        self.notifier.shutdown().await;
        self.cache.shutdown().await;
        info!("Agent desk shut down");
    }
}
