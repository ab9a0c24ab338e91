//! Backend gateway: the single translation point between the service's
//! wire contract and the crate's typed model.

mod envelope;
pub mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpGateway;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::model::{
    Agent, AgentDetail, AgentListing, AgentPatch, Document, HealthStatus, NewAgent, Pagination,
    UploadFile,
};

/// Calls against the agent/document service.
///
/// Implementations never retry; read retries belong to the cache and
/// mutations are never retried.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// `GET /agents?skip&limit`.
    async fn list_agents(&self, page: Pagination) -> Result<AgentListing, GatewayError>;

    /// `GET /agents/{id}` with the documents returned alongside it.
    /// `Ok(None)` when the agent does not exist or the body has an
    /// unknown shape.
    async fn get_agent_detail(&self, id: &str) -> Result<Option<AgentDetail>, GatewayError>;

    /// `GET /agents/{id}`.
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, GatewayError> {
        Ok(self.get_agent_detail(id).await?.map(|detail| detail.agent))
    }

    /// `POST /agents`.
    async fn create_agent(&self, agent: &NewAgent) -> Result<Agent, GatewayError>;

    /// `PUT /agents/{id}`.
    async fn update_agent(&self, id: &str, patch: &AgentPatch) -> Result<Agent, GatewayError>;

    /// `DELETE /agents/{id}`. The service cascades to the agent's documents.
    async fn delete_agent(&self, id: &str) -> Result<(), GatewayError>;

    /// `POST /documents/upload` (multipart).
    async fn upload_document(
        &self,
        agent_id: &str,
        file: UploadFile,
        description: Option<&str>,
    ) -> Result<Document, GatewayError>;

    /// `GET /documents`, optionally filtered by agent.
    async fn list_documents(&self, agent_id: Option<&str>) -> Result<Vec<Document>, GatewayError>;

    /// `GET /documents/{id}`.
    async fn get_document(&self, id: &str) -> Result<Document, GatewayError>;

    /// `DELETE /documents/{id}`.
    async fn delete_document(&self, id: &str) -> Result<(), GatewayError>;

    /// `GET /health`.
    async fn health(&self) -> Result<HealthStatus, GatewayError>;
}
