//! Writes against the service, followed by the cache effects that keep
//! dependent reads consistent.
//!
//! Cache effects run only after the call succeeds. Document counts are
//! never adjusted locally: anything showing a count is invalidated and
//! re-read from the service.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{CacheKey, CacheStore, CachedValue};
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::model::{Agent, AgentPatch, AgentSummary, Document, NewAgent, UploadFile};
use crate::notifier::{OperationId, OperationKind, OperationMessages, OperationNotifier};

const AGENTS_LIST: &str = "agents-list";

fn messages_for(kind: OperationKind) -> OperationMessages {
    match kind {
        OperationKind::CreateAgent => OperationMessages::new(
            "Creating agent…",
            "Still creating the agent…",
            "Agent created",
        ),
        OperationKind::UpdateAgent => OperationMessages::new(
            "Saving agent…",
            "Still saving the agent…",
            "Agent saved",
        ),
        OperationKind::DeleteAgent => OperationMessages::new(
            "Deleting agent…",
            "Still deleting the agent and its documents…",
            "Agent deleted",
        ),
        OperationKind::UploadDocument => OperationMessages::new(
            "Uploading document…",
            "Large files take a while, still uploading…",
            "Document uploaded",
        ),
        OperationKind::DeleteDocument => OperationMessages::new(
            "Deleting document…",
            "Still deleting the document…",
            "Document deleted",
        ),
        OperationKind::Other => {
            OperationMessages::new("Working…", "This is taking longer than usual…", "Done")
        }
    }
}

/// Runs create/update/delete calls and reconciles the cache afterwards.
#[derive(Clone)]
pub struct MutationCoordinator {
    gateway: Arc<dyn Gateway>,
    cache: CacheStore,
    notifier: OperationNotifier,
}

impl MutationCoordinator {
    pub fn new(gateway: Arc<dyn Gateway>, cache: CacheStore, notifier: OperationNotifier) -> Self {
        Self {
            gateway,
            cache,
            notifier,
        }
    }

    async fn tracked<T, Fut>(
        &self,
        label: String,
        kind: OperationKind,
        call: Fut,
    ) -> Result<T, GatewayError>
    where
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let id = OperationId::unique(label);
        debug!(operation_id = %id, kind = %kind, "Mutation started");
        self.notifier
            .track(id, kind, messages_for(kind), call)
            .await
    }

    /// Create an agent. The new agent is written to `agent:{id}` and put
    /// at the head of every cached first page; the list family is then
    /// invalidated so ordering and totals come from the service.
    pub async fn create_agent(&self, new_agent: NewAgent) -> Result<Agent, GatewayError> {
        let gateway = Arc::clone(&self.gateway);
        let created = self
            .tracked(
                format!("create-agent:{}", new_agent.name),
                OperationKind::CreateAgent,
                async move { gateway.create_agent(&new_agent).await },
            )
            .await?;

        self.cache
            .set_exact(
                &CacheKey::agent(&created.id),
                CachedValue::Agent(Some(created.clone())),
            )
            .await;

        let summary = AgentSummary::from(&created);
        let pages = self
            .cache
            .patch_matching(AGENTS_LIST, |key, value| {
                if !matches!(key, CacheKey::AgentsList(page) if page.is_first_page()) {
                    return false;
                }
                match value.as_agents_mut() {
                    Some(listing) if !listing.items.iter().any(|item| item.id == summary.id) => {
                        listing.items.insert(0, summary.clone());
                        true
                    }
                    _ => false,
                }
            })
            .await;
        self.cache.invalidate_prefix(AGENTS_LIST).await;

        info!(agent_id = %created.id, pages, "Agent created");
        Ok(created)
    }

    /// Update an agent. The returned agent replaces `agent:{id}` and its
    /// row in every cached list page; nothing needs refetching.
    pub async fn update_agent(&self, id: &str, patch: AgentPatch) -> Result<Agent, GatewayError> {
        let gateway = Arc::clone(&self.gateway);
        let agent_id = id.to_string();
        let updated = self
            .tracked(
                format!("update-agent:{id}"),
                OperationKind::UpdateAgent,
                async move { gateway.update_agent(&agent_id, &patch).await },
            )
            .await?;

        self.cache
            .set_exact(
                &CacheKey::agent(&updated.id),
                CachedValue::Agent(Some(updated.clone())),
            )
            .await;

        let summary = AgentSummary::from(&updated);
        let pages = self
            .cache
            .patch_matching(AGENTS_LIST, |_, value| {
                let Some(listing) = value.as_agents_mut() else {
                    return false;
                };
                let mut replaced = false;
                for item in listing.items.iter_mut().filter(|item| item.id == summary.id) {
                    *item = summary.clone();
                    replaced = true;
                }
                replaced
            })
            .await;

        info!(agent_id = %updated.id, pages, "Agent updated");
        Ok(updated)
    }

    /// Delete an agent. Its row leaves every cached list page, `agent:{id}`
    /// is evicted and its documents (deleted by the service) go stale.
    pub async fn delete_agent(&self, id: &str) -> Result<(), GatewayError> {
        let gateway = Arc::clone(&self.gateway);
        let agent_id = id.to_string();
        self.tracked(
            format!("delete-agent:{id}"),
            OperationKind::DeleteAgent,
            async move { gateway.delete_agent(&agent_id).await },
        )
        .await?;

        let pages = self
            .cache
            .patch_matching(AGENTS_LIST, |_, value| {
                let Some(listing) = value.as_agents_mut() else {
                    return false;
                };
                let before = listing.items.len();
                listing.items.retain(|item| item.id != id);
                listing.items.len() != before
            })
            .await;
        self.cache.evict(&CacheKey::agent(id)).await;
        self.cache
            .invalidate_prefix(&CacheKey::documents(id).to_string())
            .await;
        self.cache.invalidate(&CacheKey::all_documents()).await;

        info!(agent_id = id, pages, "Agent deleted");
        Ok(())
    }

    /// Upload a document. Everything that lists documents or shows the
    /// agent's document count is invalidated.
    pub async fn upload_document(
        &self,
        agent_id: &str,
        file: UploadFile,
        description: Option<String>,
    ) -> Result<Document, GatewayError> {
        let gateway = Arc::clone(&self.gateway);
        let target = agent_id.to_string();
        let label = format!("upload:{}", file.filename);
        let document = self
            .tracked(label, OperationKind::UploadDocument, async move {
                gateway
                    .upload_document(&target, file, description.as_deref())
                    .await
            })
            .await?;

        self.invalidate_document_views(agent_id).await;
        info!(agent_id, document_id = %document.id, "Document uploaded");
        Ok(document)
    }

    /// Delete a document. It is removed from cached document lists right
    /// away; counts are invalidated.
    pub async fn delete_document(&self, id: &str, agent_id: &str) -> Result<(), GatewayError> {
        let gateway = Arc::clone(&self.gateway);
        let document_id = id.to_string();
        self.tracked(
            format!("delete-document:{id}"),
            OperationKind::DeleteDocument,
            async move { gateway.delete_document(&document_id).await },
        )
        .await?;

        for key in [CacheKey::documents(agent_id), CacheKey::all_documents()] {
            self.cache
                .patch(&key, |value| {
                    if let Some(documents) = value.as_documents_mut() {
                        documents.retain(|d| d.id != id);
                    }
                })
                .await;
        }
        self.cache.invalidate(&CacheKey::agent(agent_id)).await;
        self.cache.invalidate_prefix(AGENTS_LIST).await;

        info!(agent_id, document_id = id, "Document deleted");
        Ok(())
    }

    async fn invalidate_document_views(&self, agent_id: &str) {
        self.cache.invalidate(&CacheKey::documents(agent_id)).await;
        self.cache.invalidate(&CacheKey::all_documents()).await;
        self.cache.invalidate(&CacheKey::agent(agent_id)).await;
        self.cache.invalidate_prefix(AGENTS_LIST).await;
    }
}
