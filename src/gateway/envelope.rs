//! Response-shape decoding.
//!
//! The service answers the same resource in more than one shape (bare
//! object or `{success, data}` envelope). Each known shape has one decoder
//! here; anything else becomes `MalformedResponse`.

use serde::Deserialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::model::{Agent, AgentDetail, AgentListing, Document};

/// `GET /agents/{id}`: `{agent, documents}` or a bare agent.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AgentBody {
    Detail(AgentDetail),
    Bare(Agent),
}

/// `{success, message, data}` wrapper used by the document endpoints.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct DocumentsData {
    documents: Vec<Document>,
}

#[derive(Debug, Deserialize)]
struct DocumentData {
    document: Document,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    #[serde(default)]
    document: Option<Document>,
    #[serde(default)]
    file_info: Option<Value>,
    #[serde(default)]
    upload_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DocumentsBody {
    Bare(Vec<Document>),
    Enveloped(DataEnvelope<DocumentsData>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DocumentBody {
    Bare(Document),
    Enveloped(DataEnvelope<DocumentData>),
}

/// `{success: false, error: {type, message, status_code, details: {action}}}`
#[derive(Debug, Deserialize)]
struct StructuredError {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    details: Option<ErrorDetails>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    #[serde(default)]
    action: Option<String>,
}

fn shape_error(what: &str, err: serde_json::Error) -> GatewayError {
    GatewayError::malformed(format!("{what}: {err}"))
}

pub(crate) fn agent(body: Value) -> Result<AgentDetail, GatewayError> {
    match serde_json::from_value::<AgentBody>(body).map_err(|e| shape_error("agent", e))? {
        AgentBody::Detail(detail) => Ok(detail),
        AgentBody::Bare(agent) => Ok(AgentDetail {
            agent,
            documents: Vec::new(),
        }),
    }
}

pub(crate) fn bare_agent(body: Value) -> Result<Agent, GatewayError> {
    serde_json::from_value(body).map_err(|e| shape_error("agent", e))
}

pub(crate) fn listing(body: Value) -> Result<AgentListing, GatewayError> {
    serde_json::from_value(body).map_err(|e| shape_error("agent listing", e))
}

pub(crate) fn documents(body: Value) -> Result<Vec<Document>, GatewayError> {
    match serde_json::from_value::<DocumentsBody>(body)
        .map_err(|e| shape_error("document list", e))?
    {
        DocumentsBody::Bare(documents) => Ok(documents),
        DocumentsBody::Enveloped(envelope) => {
            unwrap_envelope(envelope, "document list").map(|data| data.documents)
        }
    }
}

pub(crate) fn document(body: Value) -> Result<Document, GatewayError> {
    match serde_json::from_value::<DocumentBody>(body).map_err(|e| shape_error("document", e))? {
        DocumentBody::Bare(document) => Ok(document),
        DocumentBody::Enveloped(envelope) => {
            unwrap_envelope(envelope, "document").map(|data| data.document)
        }
    }
}

/// `POST /documents/upload` only answers with the envelope shape.
pub(crate) fn uploaded_document(body: Value) -> Result<Document, GatewayError> {
    let envelope: DataEnvelope<UploadData> =
        serde_json::from_value(body).map_err(|e| shape_error("upload", e))?;
    let data = unwrap_envelope(envelope, "upload")?;
    if let Some(status) = &data.upload_status {
        tracing::debug!(upload_status = %status, has_file_info = data.file_info.is_some(), "Upload acknowledged");
    }
    data.document
        .ok_or_else(|| GatewayError::malformed("upload: data.document missing"))
}

fn unwrap_envelope<T>(envelope: DataEnvelope<T>, what: &str) -> Result<T, GatewayError> {
    if !envelope.success {
        return Err(GatewayError::malformed(format!(
            "{what}: success=false ({})",
            envelope.message.as_deref().unwrap_or("no message")
        )));
    }
    envelope
        .data
        .ok_or_else(|| GatewayError::malformed(format!("{what}: data missing")))
}

/// Translate a non-success HTTP response body into the error taxonomy.
pub(crate) fn error(status: u16, body: &str) -> GatewayError {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return GatewayError::Unknown {
            message: format!("HTTP {status}: {}", snippet(body)),
        };
    };

    if let Ok(structured) = serde_json::from_value::<StructuredError>(value.clone()) {
        let detail = structured.error;
        return GatewayError::Server {
            kind: detail.kind,
            message: detail.message,
            status: detail.status_code.or(Some(status)),
            action_hint: detail.details.and_then(|d| d.action),
        };
    }

    match legacy_message(&value) {
        Some(message) => GatewayError::Server {
            kind: format!("HTTP_{status}"),
            message,
            status: Some(status),
            action_hint: None,
        },
        None => GatewayError::Unknown {
            message: format!("HTTP {status}: {}", snippet(body)),
        },
    }
}

/// `{detail|message|error: string}`. FastAPI validation failures put a list
/// of `{msg}` objects under `detail`.
fn legacy_message(value: &Value) -> Option<String> {
    for field in ["detail", "message", "error"] {
        match value.get(field) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Array(items)) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|item| item.get("msg").and_then(Value::as_str))
                    .collect();
                if !msgs.is_empty() {
                    return Some(msgs.join("; "));
                }
            }
            _ => {}
        }
    }
    None
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty body".to_string();
    }
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
