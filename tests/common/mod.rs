//! Fake agent/document service for integration tests.
//!
//! Speaks the same wire contract as the real backend: naive ISO
//! timestamps, the `{success, data}` envelope on document endpoints, the
//! structured error envelope, and legacy `{detail}` errors for 404s.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct FakeAgent {
    id: String,
    name: String,
    prompt: String,
    created_at: String,
    updated_at: String,
}

#[derive(Clone)]
struct FakeDocument {
    id: String,
    agent_id: String,
    filename: String,
    document_type: String,
    size: usize,
    created_at: String,
}

/// What the last upload request carried.
#[derive(Debug, Clone, Default)]
pub struct ReceivedUpload {
    pub agent_id: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub description: Option<String>,
    pub size: usize,
}

#[derive(Default)]
struct Backend {
    agents: Vec<FakeAgent>,
    documents: Vec<FakeDocument>,
    next_id: u64,
    bare_agents: bool,
    health_delay: Duration,
    last_upload: Option<ReceivedUpload>,
    requests: HashMap<String, usize>,
}

impl Backend {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    fn count(&self, agent_id: &str) -> usize {
        self.documents.iter().filter(|d| d.agent_id == agent_id).count()
    }

    fn agent_json(&self, agent: &FakeAgent) -> Value {
        json!({
            "id": agent.id,
            "name": agent.name,
            "prompt": agent.prompt,
            "documents_count": self.count(&agent.id),
            "created_at": agent.created_at,
            "updated_at": agent.updated_at,
        })
    }

    fn hit(&mut self, route: &str) {
        *self.requests.entry(route.to_string()).or_insert(0) += 1;
    }
}

fn document_json(doc: &FakeDocument) -> Value {
    json!({
        "id": doc.id,
        "agent_id": doc.agent_id,
        "filename": doc.filename,
        "document_type": doc.document_type,
        "file_url": format!("https://files.test/{}/{}", doc.agent_id, doc.filename),
        "file_size": doc.size,
        "created_at": doc.created_at,
    })
}

/// Python `datetime.isoformat()` style: no offset.
fn naive_now() -> String {
    Utc::now()
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

fn structured_error(status: StatusCode, kind: &str, message: &str, action: Option<&str>) -> Response {
    let mut details = json!({});
    if let Some(action) = action {
        details["action"] = json!(action);
    }
    let body = json!({
        "success": false,
        "error": {
            "type": kind,
            "message": message,
            "status_code": status.as_u16(),
            "details": details,
        }
    });
    (status, Json(body)).into_response()
}

fn legacy_not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "detail": format!("{what} not found") })),
    )
        .into_response()
}

/// Handle to the running fake service.
#[derive(Clone)]
pub struct FakeService {
    pub base_url: String,
    backend: Arc<Mutex<Backend>>,
}

impl FakeService {
    /// Serve `GET /agents/{id}` as a bare agent instead of `{agent, documents}`.
    pub fn set_bare_agents(&self, bare: bool) {
        self.backend.lock().unwrap().bare_agents = bare;
    }

    pub fn set_health_delay(&self, delay: Duration) {
        self.backend.lock().unwrap().health_delay = delay;
    }

    pub fn last_upload(&self) -> Option<ReceivedUpload> {
        self.backend.lock().unwrap().last_upload.clone()
    }

    /// Requests served for a route label such as `"GET /agents/{id}"`.
    pub fn requests(&self, route: &str) -> usize {
        self.backend
            .lock()
            .unwrap()
            .requests
            .get(route)
            .copied()
            .unwrap_or(0)
    }

    /// Insert an agent directly; returns its id.
    pub fn seed_agent(&self, name: &str, prompt: &str) -> String {
        let mut backend = self.backend.lock().unwrap();
        let id = backend.next_id("agt");
        let now = naive_now();
        backend.agents.insert(
            0,
            FakeAgent {
                id: id.clone(),
                name: name.to_string(),
                prompt: prompt.to_string(),
                created_at: now.clone(),
                updated_at: now,
            },
        );
        id
    }
}

/// Start the fake service on a random port.
pub async fn start_fake_service() -> FakeService {
    let backend = Arc::new(Mutex::new(Backend::default()));
    let service = FakeService {
        base_url: String::new(),
        backend: Arc::clone(&backend),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/agents", get(list_agents).post(create_agent))
        .route(
            "/agents/{id}",
            get(get_agent).put(update_agent).delete(delete_agent),
        )
        .route("/documents", get(list_documents))
        .route("/documents/upload", post(upload_document))
        .route("/documents/{id}", get(get_document).delete(delete_document))
        .with_state(service.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    FakeService {
        base_url: format!("http://127.0.0.1:{port}"),
        backend,
    }
}

async fn health(State(svc): State<FakeService>) -> Json<Value> {
    let delay = {
        let mut backend = svc.backend.lock().unwrap();
        backend.hit("GET /health");
        backend.health_delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Json(json!({
        "status": "healthy",
        "service": "agent-service",
        "version": "1.0.0",
        "environment": "test",
    }))
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

async fn list_agents(State(svc): State<FakeService>, Query(page): Query<PageQuery>) -> Json<Value> {
    let mut backend = svc.backend.lock().unwrap();
    backend.hit("GET /agents");
    let total = backend.agents.len();
    let items: Vec<Value> = backend
        .agents
        .iter()
        .skip(page.skip)
        .take(page.limit)
        .map(|a| {
            json!({
                "id": a.id,
                "documents_count": backend.count(&a.id),
                "created_at": a.created_at,
            })
        })
        .collect();
    let has_more = page.skip + page.limit < total;
    let next_skip = has_more.then_some(page.skip + page.limit);
    Json(json!({
        "items": items,
        "total": total,
        "skip": page.skip,
        "limit": page.limit,
        "has_more": has_more,
        "next_skip": next_skip,
    }))
}

async fn get_agent(State(svc): State<FakeService>, Path(id): Path<String>) -> Response {
    if id == "agt_garbled" {
        return (StatusCode::OK, "<html>maintenance</html>").into_response();
    }
    let mut backend = svc.backend.lock().unwrap();
    backend.hit("GET /agents/{id}");
    let Some(agent) = backend.agents.iter().find(|a| a.id == id) else {
        return legacy_not_found("Agent");
    };
    let agent = backend.agent_json(agent);
    if backend.bare_agents {
        return Json(agent).into_response();
    }
    let documents: Vec<Value> = backend
        .documents
        .iter()
        .filter(|d| d.agent_id == id)
        .map(document_json)
        .collect();
    Json(json!({ "agent": agent, "documents": documents })).into_response()
}

#[derive(Deserialize)]
struct AgentBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

async fn create_agent(State(svc): State<FakeService>, Json(body): Json<AgentBody>) -> Response {
    let name = body.name.unwrap_or_default();
    if name.trim().is_empty() {
        return structured_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "ValidationError",
            "name required",
            Some("Give the agent a name"),
        );
    }
    let mut backend = svc.backend.lock().unwrap();
    backend.hit("POST /agents");
    let now = naive_now();
    let agent = FakeAgent {
        id: backend.next_id("agt"),
        name,
        prompt: body.prompt.unwrap_or_default(),
        created_at: now.clone(),
        updated_at: now,
    };
    let body = backend.agent_json(&agent);
    backend.agents.insert(0, agent);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn update_agent(
    State(svc): State<FakeService>,
    Path(id): Path<String>,
    Json(body): Json<AgentBody>,
) -> Response {
    if body.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return structured_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "ValidationError",
            "name required",
            None,
        );
    }
    let mut backend = svc.backend.lock().unwrap();
    backend.hit("PUT /agents/{id}");
    let Some(index) = backend.agents.iter().position(|a| a.id == id) else {
        return legacy_not_found("Agent");
    };
    {
        let agent = &mut backend.agents[index];
        if let Some(name) = body.name {
            agent.name = name;
        }
        if let Some(prompt) = body.prompt {
            agent.prompt = prompt;
        }
        agent.updated_at = naive_now();
    }
    let agent = backend.agents[index].clone();
    Json(backend.agent_json(&agent)).into_response()
}

async fn delete_agent(State(svc): State<FakeService>, Path(id): Path<String>) -> Response {
    let mut backend = svc.backend.lock().unwrap();
    backend.hit("DELETE /agents/{id}");
    let before = backend.agents.len();
    backend.agents.retain(|a| a.id != id);
    if backend.agents.len() == before {
        return legacy_not_found("Agent");
    }
    backend.documents.retain(|d| d.agent_id != id);
    StatusCode::NO_CONTENT.into_response()
}

async fn upload_document(State(svc): State<FakeService>, mut multipart: Multipart) -> Response {
    let mut received = ReceivedUpload::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "agent_id" => received.agent_id = field.text().await.unwrap_or_default(),
            "description" => received.description = field.text().await.ok(),
            "file" => {
                received.filename = field.file_name().unwrap_or_default().to_string();
                received.content_type = field.content_type().map(str::to_string);
                received.size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
            }
            _ => {}
        }
    }

    let mut backend = svc.backend.lock().unwrap();
    backend.hit("POST /documents/upload");
    backend.last_upload = Some(received.clone());
    if !backend.agents.iter().any(|a| a.id == received.agent_id) {
        return structured_error(
            StatusCode::NOT_FOUND,
            "NotFoundError",
            "Agent not found",
            Some("Pick an existing agent"),
        );
    }
    let extension = received
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let document = FakeDocument {
        id: backend.next_id("doc"),
        agent_id: received.agent_id.clone(),
        filename: received.filename.clone(),
        document_type: extension,
        size: received.size,
        created_at: naive_now(),
    };
    let body = json!({
        "success": true,
        "message": "Document uploaded successfully",
        "data": {
            "document": document_json(&document),
            "file_info": { "size": document.size, "content_type": received.content_type },
            "upload_status": "completed",
        }
    });
    backend.documents.push(document);
    Json(body).into_response()
}

async fn list_documents(
    State(svc): State<FakeService>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut backend = svc.backend.lock().unwrap();
    backend.hit("GET /documents");
    let agent_id = query.get("agent_id");
    let documents: Vec<Value> = backend
        .documents
        .iter()
        .filter(|d| agent_id.is_none_or(|id| &d.agent_id == id))
        .map(document_json)
        .collect();
    Json(json!({
        "success": true,
        "message": "ok",
        "data": { "documents": documents },
    }))
}

async fn get_document(State(svc): State<FakeService>, Path(id): Path<String>) -> Response {
    if id == "explode" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }
    if id == "stall" {
        return (StatusCode::INTERNAL_SERVER_ERROR, stalled_body()).into_response();
    }
    let mut backend = svc.backend.lock().unwrap();
    backend.hit("GET /documents/{id}");
    match backend.documents.iter().find(|d| d.id == id) {
        Some(doc) => Json(document_json(doc)).into_response(),
        None => structured_error(StatusCode::NOT_FOUND, "NotFoundError", "Document not found", None),
    }
}

async fn delete_document(State(svc): State<FakeService>, Path(id): Path<String>) -> Response {
    let mut backend = svc.backend.lock().unwrap();
    backend.hit("DELETE /documents/{id}");
    let before = backend.documents.len();
    backend.documents.retain(|d| d.id != id);
    if backend.documents.len() == before {
        return structured_error(StatusCode::NOT_FOUND, "NotFoundError", "Document not found", None);
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Sends the start of an error body, then hangs.
fn stalled_body() -> Body {
    let head = futures::stream::once(async {
        Ok::<_, std::io::Error>(Bytes::from_static(b"{\"detail\": "))
    });
    let tail = futures::stream::once(async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, std::io::Error>(Bytes::from_static(b"\"late\"}"))
    });
    Body::from_stream(head.chain(tail))
}
