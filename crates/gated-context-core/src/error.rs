//! Error taxonomy shared by every component.
//!
//! Each variant corresponds to one failure kind that callers must be able to
//! tell apart: schema violations are fatal, `NotAuthorized` is an expected
//! business outcome, and the infrastructure faults (`StoreUnavailable`,
//! `ProviderError`, `IndexUnavailable`, `Timeout`) may be retried with backoff.
//!
//! An empty access set is **not** an error; see
//! [`RetrievalOutcome::NoAccessibleDocuments`](crate::retrieval::RetrievalOutcome).

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type GateResult<T> = Result<T, GateError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// The relation is not declared for the resource type (or the type is unknown).
    #[error("invalid relation '{relation}' for resource type '{resource_type}'")]
    InvalidRelation {
        resource_type: String,
        relation: String,
    },

    /// The subject lacks the relation an operation requires.
    #[error("{subject} is not authorized on {resource}")]
    NotAuthorized { subject: String, resource: String },

    /// The relation store backend failed (I/O, connection, stale replica).
    #[error("relation store unavailable: {0}")]
    StoreUnavailable(String),

    /// The embedding provider failed (quota, network, malformed response).
    #[error("embedding provider error: {0}")]
    ProviderError(String),

    /// The vector index backend failed.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// A caller-bounded call exceeded its deadline.
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// The relation schema could not be loaded (cycle, dangling implication).
    #[error("invalid relation schema: {0}")]
    InvalidSchema(String),

    /// The request itself is malformed (zero top_k, empty query, bad subject).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GateError {
    pub fn invalid_relation(resource_type: impl Into<String>, relation: impl Into<String>) -> Self {
        GateError::InvalidRelation {
            resource_type: resource_type.into(),
            relation: relation.into(),
        }
    }

    pub fn not_authorized(subject: impl ToString, resource: impl ToString) -> Self {
        GateError::NotAuthorized {
            subject: subject.to_string(),
            resource: resource.to_string(),
        }
    }

    /// Transient infrastructure faults. Authorization denials and schema
    /// violations are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::StoreUnavailable(_)
                | GateError::ProviderError(_)
                | GateError::IndexUnavailable(_)
                | GateError::Timeout { .. }
        )
    }

    /// True only for [`GateError::NotAuthorized`].
    pub fn is_denial(&self) -> bool {
        matches!(self, GateError::NotAuthorized { .. })
    }

    /// Stable machine-readable code, used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            GateError::InvalidRelation { .. } => "invalid_relation",
            GateError::NotAuthorized { .. } => "not_authorized",
            GateError::StoreUnavailable(_) => "store_unavailable",
            GateError::ProviderError(_) => "provider_error",
            GateError::IndexUnavailable(_) => "index_unavailable",
            GateError::Timeout { .. } => "timeout",
            GateError::InvalidSchema(_) => "invalid_schema",
            GateError::InvalidRequest(_) => "invalid_request",
        }
    }
}
