//! Agent Desk: client-side sync layer for the agent/document service.

pub mod cache;
pub mod config;
pub mod desk;
pub mod error;
pub mod gateway;
pub mod model;
pub mod mutations;
pub mod notifier;

pub use desk::AgentDesk;
pub use error::{Error, GatewayError, Result};
