//! In-memory gateway for unit tests (no HTTP).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::Gateway;
use crate::error::GatewayError;
use crate::model::{
    Agent, AgentDetail, AgentListing, AgentPatch, AgentSummary, Document, DocumentType,
    HealthStatus, NewAgent, Pagination, UploadFile,
};

#[derive(Default)]
struct ServerState {
    agents: Vec<Agent>,
    documents: Vec<Document>,
}

impl ServerState {
    fn with_count(&self, agent: &Agent) -> Agent {
        let mut agent = agent.clone();
        agent.documents_count = self
            .documents
            .iter()
            .filter(|d| d.agent_id == agent.id)
            .count() as u64;
        agent
    }
}

/// Stub service: keeps agents and documents in memory, counts calls,
/// and can inject latency and failures.
pub(crate) struct StubGateway {
    state: Mutex<ServerState>,
    latency: Mutex<Duration>,
    failures: Mutex<VecDeque<GatewayError>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    next_id: AtomicU64,
}

impl StubGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState::default()),
            latency: Mutex::new(Duration::ZERO),
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Insert an agent directly into server state.
    pub fn seed_agent(&self, name: &str, prompt: &str) -> Agent {
        let now = Utc::now();
        let agent = Agent {
            id: self.next_id("agent"),
            name: name.to_string(),
            prompt: prompt.to_string(),
            documents_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().unwrap().agents.insert(0, agent.clone());
        agent
    }

    /// Insert a document directly into server state.
    pub fn seed_document(&self, agent_id: &str, filename: &str) -> Document {
        let document = Document {
            id: self.next_id("doc"),
            agent_id: agent_id.to_string(),
            filename: filename.to_string(),
            document_type: DocumentType::from_filename(filename).unwrap_or(DocumentType::Txt),
            file_url: format!("memory://{agent_id}/{filename}"),
            file_size_bytes: 1,
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().documents.push(document.clone());
        document
    }

    /// Change an agent behind the cache's back.
    pub fn rename_on_server(&self, id: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(agent) = state.agents.iter_mut().find(|a| a.id == id) {
            agent.name = name.to_string();
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Fail the next call (of any kind) with `err`.
    pub fn fail_next(&self, err: GatewayError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    async fn enter(&self, method: &'static str) -> Result<(), GatewayError> {
        *self.calls.lock().unwrap().entry(method).or_insert(0) += 1;
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub(crate) fn offline() -> GatewayError {
    GatewayError::Connectivity {
        reason: "connection refused".into(),
    }
}

pub(crate) fn not_found(what: &str) -> GatewayError {
    GatewayError::Server {
        kind: "NOT_FOUND".into(),
        message: format!("{what} not found"),
        status: Some(404),
        action_hint: None,
    }
}

#[async_trait]
impl Gateway for StubGateway {
    async fn list_agents(&self, page: Pagination) -> Result<AgentListing, GatewayError> {
        self.enter("list_agents").await?;
        let state = self.state.lock().unwrap();
        let total = state.agents.len() as u64;
        let items: Vec<AgentSummary> = state
            .agents
            .iter()
            .skip(page.skip as usize)
            .take(page.limit as usize)
            .map(|a| AgentSummary::from(&state.with_count(a)))
            .collect();
        let has_more = u64::from(page.skip + page.limit) < total;
        Ok(AgentListing {
            items,
            total,
            skip: page.skip,
            limit: page.limit,
            has_more,
            next_skip: has_more.then_some(page.skip + page.limit),
        })
    }

    async fn get_agent_detail(&self, id: &str) -> Result<Option<AgentDetail>, GatewayError> {
        self.enter("get_agent").await?;
        let state = self.state.lock().unwrap();
        Ok(state.agents.iter().find(|a| a.id == id).map(|a| AgentDetail {
            agent: state.with_count(a),
            documents: state
                .documents
                .iter()
                .filter(|d| d.agent_id == id)
                .cloned()
                .collect(),
        }))
    }

    async fn create_agent(&self, agent: &NewAgent) -> Result<Agent, GatewayError> {
        self.enter("create_agent").await?;
        Ok(self.seed_agent(&agent.name, &agent.prompt))
    }

    async fn update_agent(&self, id: &str, patch: &AgentPatch) -> Result<Agent, GatewayError> {
        self.enter("update_agent").await?;
        let mut state = self.state.lock().unwrap();
        let agent = state
            .agents
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| not_found("agent"))?;
        if let Some(name) = &patch.name {
            agent.name = name.clone();
        }
        if let Some(prompt) = &patch.prompt {
            agent.prompt = prompt.clone();
        }
        agent.updated_at = Utc::now();
        let agent = agent.clone();
        Ok(state.with_count(&agent))
    }

    async fn delete_agent(&self, id: &str) -> Result<(), GatewayError> {
        self.enter("delete_agent").await?;
        let mut state = self.state.lock().unwrap();
        let before = state.agents.len();
        state.agents.retain(|a| a.id != id);
        if state.agents.len() == before {
            return Err(not_found("agent"));
        }
        state.documents.retain(|d| d.agent_id != id);
        Ok(())
    }

    async fn upload_document(
        &self,
        agent_id: &str,
        file: UploadFile,
        _description: Option<&str>,
    ) -> Result<Document, GatewayError> {
        self.enter("upload_document").await?;
        let exists = self
            .state
            .lock()
            .unwrap()
            .agents
            .iter()
            .any(|a| a.id == agent_id);
        if !exists {
            return Err(not_found("agent"));
        }
        Ok(self.seed_document(agent_id, &file.filename))
    }

    async fn list_documents(&self, agent_id: Option<&str>) -> Result<Vec<Document>, GatewayError> {
        self.enter("list_documents").await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .documents
            .iter()
            .filter(|d| agent_id.is_none_or(|id| d.agent_id == id))
            .cloned()
            .collect())
    }

    async fn get_document(&self, id: &str) -> Result<Document, GatewayError> {
        self.enter("get_document").await?;
        let state = self.state.lock().unwrap();
        state
            .documents
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| not_found("document"))
    }

    async fn delete_document(&self, id: &str) -> Result<(), GatewayError> {
        self.enter("delete_document").await?;
        let mut state = self.state.lock().unwrap();
        let before = state.documents.len();
        state.documents.retain(|d| d.id != id);
        if state.documents.len() == before {
            return Err(not_found("document"));
        }
        Ok(())
    }

    async fn health(&self) -> Result<HealthStatus, GatewayError> {
        self.enter("health").await?;
        Ok(HealthStatus {
            status: "healthy".into(),
            service: "stub".into(),
            version: "0.0.0".into(),
            environment: None,
        })
    }
}
