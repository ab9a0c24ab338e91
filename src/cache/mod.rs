//! Cache of server-derived state: agent list pages, single agents and
//! document lists, each with a staleness window.

pub mod key;
pub mod store;

pub use key::{CacheKey, DocumentScope};
pub use store::{CacheStore, EntrySnapshot};

use crate::error::GatewayError;
use crate::model::{Agent, AgentListing, Document};

/// Value held under a [`CacheKey`]. The variant always follows the key:
/// `AgentsList` → `Agents`, `Agent` → `Agent`, `Documents` → `Documents`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    Agents(AgentListing),
    /// `None` when the service reported the agent as absent.
    Agent(Option<Agent>),
    Documents(Vec<Document>),
}

impl CachedValue {
    pub fn as_agents_mut(&mut self) -> Option<&mut AgentListing> {
        match self {
            Self::Agents(listing) => Some(listing),
            _ => None,
        }
    }

    pub fn as_documents_mut(&mut self) -> Option<&mut Vec<Document>> {
        match self {
            Self::Documents(documents) => Some(documents),
            _ => None,
        }
    }
}

/// Change notifications for views observing the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// A new value is visible under the key.
    Updated(CacheKey),
    /// The key was marked stale; its value is still served.
    Invalidated(CacheKey),
    /// The value was dropped.
    Evicted(CacheKey),
    /// A refresh gave up; any previous value is still served.
    RefreshFailed { key: CacheKey, error: GatewayError },
}
