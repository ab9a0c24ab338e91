//! Cache keys and key-family patterns.

use crate::model::Pagination;

/// Which documents a `documents:` key holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentScope {
    Agent(String),
    All,
}

impl DocumentScope {
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Agent(id) => Some(id),
            Self::All => None,
        }
    }
}

/// Logical key of a cached read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// `agents-list:{skip}:{limit}`
    AgentsList(Pagination),
    /// `agent:{id}`
    Agent(String),
    /// `documents:{agentId}` or `documents:*`
    Documents(DocumentScope),
}

impl CacheKey {
    pub fn agents_list(page: Pagination) -> Self {
        Self::AgentsList(page)
    }

    pub fn agent(id: impl Into<String>) -> Self {
        Self::Agent(id.into())
    }

    pub fn documents(agent_id: impl Into<String>) -> Self {
        Self::Documents(DocumentScope::Agent(agent_id.into()))
    }

    pub fn all_documents() -> Self {
        Self::Documents(DocumentScope::All)
    }

    /// Whether this key belongs to the family named by `pattern`.
    ///
    /// A pattern ending in `*` is a raw prefix (`documents:*` covers every
    /// documents key). Any other pattern matches the key itself and its
    /// `:`-separated children, so `agents-list` covers every page and
    /// `documents:a1` does not cover `documents:a10`.
    pub fn matches(&self, pattern: &str) -> bool {
        let rendered = self.to_string();
        match pattern.strip_suffix('*') {
            Some(prefix) => rendered.starts_with(prefix),
            None => {
                rendered == pattern
                    || rendered
                        .strip_prefix(pattern)
                        .is_some_and(|rest| rest.starts_with(':'))
            }
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentsList(page) => write!(f, "agents-list:{}:{}", page.skip, page.limit),
            Self::Agent(id) => write!(f, "agent:{id}"),
            Self::Documents(DocumentScope::Agent(id)) => write!(f, "documents:{id}"),
            Self::Documents(DocumentScope::All) => write!(f, "documents:*"),
        }
    }
}
