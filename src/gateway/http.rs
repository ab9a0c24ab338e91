//! HTTP gateway. Talks to the agent/document service over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Gateway, envelope};
use crate::config::DeskConfig;
use crate::error::{ConfigError, GatewayError};
use crate::model::{
    Agent, AgentDetail, AgentListing, AgentPatch, Document, HealthStatus, NewAgent, Pagination,
    UploadFile,
};

/// `reqwest`-backed [`Gateway`].
pub struct HttpGateway {
    base_url: String,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &DeskConfig) -> Result<Self, ConfigError> {
        Self::new(config.api_base_url.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send and map transport failures and non-2xx answers to the taxonomy.
    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request.send().await.map_err(transport_error)?;
        ensure_success(response).await
    }

    async fn send_json(&self, request: RequestBuilder) -> Result<Value, GatewayError> {
        let response = self.send(request).await?;
        read_json(response).await
    }
}

/// Classify a `reqwest` failure. A connect failure means nothing was sent;
/// a timeout after connecting means the outcome is unknown.
fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_connect() {
        GatewayError::Connectivity {
            reason: err.to_string(),
        }
    } else if err.is_timeout() {
        GatewayError::Timeout {
            reason: err.to_string(),
        }
    } else if err.is_decode() {
        GatewayError::malformed(err.to_string())
    } else {
        GatewayError::Unknown {
            message: err.to_string(),
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.map_err(transport_error)?;
    let err = envelope::error(status.as_u16(), &body);
    debug!(status = status.as_u16(), error = %err, "Service returned an error");
    Err(err)
}

async fn read_json(response: Response) -> Result<Value, GatewayError> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        warn!(error = %e, "Response body is not JSON");
        GatewayError::malformed(format!("invalid JSON body: {e}"))
    })
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn list_agents(&self, page: Pagination) -> Result<AgentListing, GatewayError> {
        let request = self
            .client
            .get(self.url("/agents"))
            .query(&[("skip", page.skip), ("limit", page.limit)]);
        envelope::listing(self.send_json(request).await?)
    }

    async fn get_agent_detail(&self, id: &str) -> Result<Option<AgentDetail>, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/agents/{id}")))
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            warn!(agent_id = %id, "Agent not found");
            return Ok(None);
        }

        let bytes = ensure_success(response)
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;
        // Any body that does not decode to an agent reads as absent.
        let detail = serde_json::from_slice::<Value>(&bytes)
            .map_err(|e| GatewayError::malformed(format!("invalid JSON body: {e}")))
            .and_then(envelope::agent);
        match detail {
            Ok(detail) => Ok(Some(detail)),
            Err(e) => {
                warn!(agent_id = %id, error = %e, "Unrecognised agent response shape");
                Ok(None)
            }
        }
    }

    async fn create_agent(&self, agent: &NewAgent) -> Result<Agent, GatewayError> {
        let request = self.client.post(self.url("/agents")).json(agent);
        let created = envelope::bare_agent(self.send_json(request).await?)?;
        info!(agent_id = %created.id, name = %created.name, "Agent created");
        Ok(created)
    }

    async fn update_agent(&self, id: &str, patch: &AgentPatch) -> Result<Agent, GatewayError> {
        let request = self
            .client
            .put(self.url(&format!("/agents/{id}")))
            .json(patch);
        envelope::bare_agent(self.send_json(request).await?)
    }

    async fn delete_agent(&self, id: &str) -> Result<(), GatewayError> {
        self.send(self.client.delete(self.url(&format!("/agents/{id}"))))
            .await?;
        info!(agent_id = %id, "Agent deleted");
        Ok(())
    }

    async fn upload_document(
        &self,
        agent_id: &str,
        file: UploadFile,
        description: Option<&str>,
    ) -> Result<Document, GatewayError> {
        let filename = file.filename.clone();
        let size = file.len();
        let part = Part::bytes(file.bytes)
            .file_name(file.filename)
            .mime_str(&file.content_type)
            .map_err(|e| GatewayError::Unknown {
                message: format!("invalid content type {:?}: {e}", file.content_type),
            })?;

        let mut form = Form::new()
            .text("agent_id", agent_id.to_string())
            .part("file", part);
        if let Some(description) = description {
            form = form.text("description", description.to_string());
        }

        let request = self
            .client
            .post(self.url("/documents/upload"))
            .multipart(form);
        let document = envelope::uploaded_document(self.send_json(request).await?)?;
        info!(
            agent_id = %agent_id,
            document_id = %document.id,
            filename = %filename,
            size,
            "Document uploaded"
        );
        Ok(document)
    }

    async fn list_documents(&self, agent_id: Option<&str>) -> Result<Vec<Document>, GatewayError> {
        let mut request = self.client.get(self.url("/documents"));
        if let Some(agent_id) = agent_id {
            request = request.query(&[("agent_id", agent_id)]);
        }
        envelope::documents(self.send_json(request).await?)
    }

    async fn get_document(&self, id: &str) -> Result<Document, GatewayError> {
        let request = self.client.get(self.url(&format!("/documents/{id}")));
        envelope::document(self.send_json(request).await?)
    }

    async fn delete_document(&self, id: &str) -> Result<(), GatewayError> {
        self.send(self.client.delete(self.url(&format!("/documents/{id}"))))
            .await?;
        info!(document_id = %id, "Document deleted");
        Ok(())
    }

    async fn health(&self) -> Result<HealthStatus, GatewayError> {
        let body = self.send_json(self.client.get(self.url("/health"))).await?;
        serde_json::from_value(body).map_err(|e| GatewayError::malformed(format!("health: {e}")))
    }
}
