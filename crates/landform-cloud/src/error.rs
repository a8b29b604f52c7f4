//! Cloud error types

use landform_core::{Address, EvalError, GraphError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while planning or applying
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("No provider supports resource type '{resource_type}' ({address})")]
    UnsupportedResource {
        address: Address,
        resource_type: String,
    },

    #[error("State file error: {0}")]
    StateError(String),

    #[error("State corruption in {path}: {reason}")]
    StateCorruption { path: PathBuf, reason: String },

    #[error(
        "Timed out after {waited:?} waiting for the state lock held by {holder} since {acquired_at} (token {token})"
    )]
    LockTimeout {
        holder: String,
        token: String,
        acquired_at: String,
        waited: Duration,
    },

    #[error("Lock error: {0}")]
    LockError(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("{address}: {source}")]
    Provider {
        address: Address,
        source: ProviderError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported by a provider for a single operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Network(_))
    }
}

/// Errors in the step graph built by the planner
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan steps form a cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("plan refers to {0}, which is not in the resource graph")]
    UnknownAddress(Address),
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited("slow down".into()).is_transient());
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(!ProviderError::Validation("bad cidr".into()).is_transient());
        assert!(!ProviderError::PermissionDenied("nope".into()).is_transient());
        assert!(!ProviderError::NotFound("vpc-1".into()).is_transient());
        assert!(!ProviderError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn test_graph_error_is_transparent() {
        let err: CloudError = GraphError::DuplicateAddress(Address::new("vpc", "main")).into();
        assert_eq!(err.to_string(), "duplicate resource address: vpc.main");
    }
}
