//! Error types for Agent Desk.
//!
//! `GatewayError` is the one taxonomy every user-facing failure text is
//! derived from. Nothing else in the crate builds messages from raw
//! transport errors.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Notifier error: {0}")]
    Notifier(#[from] NotifierError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Failures talking to the agent/document service.
///
/// Cloneable because one failed fetch is handed to every reader that
/// joined the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The request never reached the server.
    #[error("Service unreachable: {reason}")]
    Connectivity { reason: String },

    /// The request was sent but no answer arrived in time. The server may
    /// or may not have applied it.
    #[error("Request timed out: {reason}")]
    Timeout { reason: String },

    /// Structured business error returned by the server.
    #[error("Server error {kind}: {message}")]
    Server {
        kind: String,
        message: String,
        status: Option<u16>,
        action_hint: Option<String>,
    },

    /// The response violated the wire contract.
    #[error("Malformed response: {reason}")]
    MalformedResponse { reason: String },

    #[error("Unexpected error: {message}")]
    Unknown { message: String },
}

impl GatewayError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }

    /// Whether a read may be retried. Mutations are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity { .. } | Self::Timeout { .. })
    }

    /// HTTP status carried by a server error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => *status,
            _ => None,
        }
    }

    /// Text shown to the user when an operation fails with this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connectivity { .. } => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            Self::Timeout { .. } => {
                "The server took too long to answer. The change may still have been applied; refresh before retrying.".to_string()
            }
            Self::Server { message, .. } => message.clone(),
            Self::MalformedResponse { .. } => {
                "The server sent an unexpected response. Please try again.".to_string()
            }
            Self::Unknown { message } => message.clone(),
        }
    }

    /// Suggested next step for the user.
    pub fn action_hint(&self) -> Option<String> {
        match self {
            Self::Connectivity { .. } => Some("Check your network connection".to_string()),
            Self::Timeout { .. } => Some("Refresh to confirm the result before retrying".to_string()),
            Self::Server { action_hint, .. } => action_hint.clone(),
            Self::MalformedResponse { .. } | Self::Unknown { .. } => None,
        }
    }
}

/// Operation tracking errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Operation {id} is still active; use a unique identifier per operation")]
    OperationActive { id: String },
}

/// Result type alias for Agent Desk.
pub type Result<T> = std::result::Result<T, Error>;
