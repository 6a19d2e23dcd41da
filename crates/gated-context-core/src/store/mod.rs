//! Relation store: the durable set of warrants.
//!
//! Two layers:
//!
//! - [`WarrantBackend`]: raw backend I/O (insert, delete, filtered read).
//!   Implementations exist for memory ([`memory::InMemoryWarrantBackend`])
//!   and SQLite (in the application crate).
//! - [`RelationStore`]: the contract the rest of the system uses. It
//!   validates relations against the [`RelationSchema`], bounds every call by
//!   a timeout, and retries writes on transient faults (writes are idempotent,
//!   so a retry after an ambiguous failure is safe).
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`write`](RelationStore::write) | Create or delete one warrant (idempotent) |
//! | [`list_warrants`](RelationStore::list_warrants) | Diagnostic listing by resource |
//! | [`read`](RelationStore::read) | Filtered read used by the evaluator |

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::GateResult;
use crate::models::{Consistency, Revision, Warrant, WarrantFilter, WriteOp};
use crate::schema::RelationSchema;
use crate::timing::{with_timeout, RetryPolicy};

/// Raw warrant storage.
///
/// `put` of a present warrant and `delete` of an absent one must succeed
/// without changing anything. Both return the store revision after the call.
#[async_trait]
pub trait WarrantBackend: Send + Sync {
    async fn put(&self, warrant: &Warrant) -> GateResult<Revision>;

    async fn delete(&self, warrant: &Warrant) -> GateResult<Revision>;

    /// Return every warrant matching `filter`.
    ///
    /// With [`Consistency::AtLeast`], a backend that cannot show the requested
    /// revision must fail with `StoreUnavailable` instead of answering stale.
    async fn read(
        &self,
        filter: &WarrantFilter,
        consistency: Consistency,
    ) -> GateResult<Vec<Warrant>>;

    /// Latest revision this backend has applied.
    async fn revision(&self) -> GateResult<Revision>;
}

/// Schema-aware, timeout-bounded access to a [`WarrantBackend`].
#[derive(Clone)]
pub struct RelationStore {
    backend: Arc<dyn WarrantBackend>,
    schema: Arc<RelationSchema>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl RelationStore {
    pub fn new(backend: Arc<dyn WarrantBackend>, schema: Arc<RelationSchema>) -> Self {
        Self {
            backend,
            schema,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn schema(&self) -> &Arc<RelationSchema> {
        &self.schema
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create or delete a warrant.
    ///
    /// Fails with `InvalidRelation` before touching the backend if the
    /// relation is not declared for the resource type.
    pub async fn write(&self, warrant: &Warrant, op: WriteOp) -> GateResult<Revision> {
        self.schema
            .validate(&warrant.resource.resource_type, &warrant.relation)?;

        let revision = self
            .retry
            .run("warrant write", move || {
                with_timeout("warrant write", self.timeout, async move {
                    match op {
                        WriteOp::Create => self.backend.put(warrant).await,
                        WriteOp::Delete => self.backend.delete(warrant).await,
                    }
                })
            })
            .await?;

        tracing::info!(warrant = %warrant, op = ?op, revision = revision.0, "warrant written");
        Ok(revision)
    }

    /// List warrants on a resource type, optionally narrowed to one resource.
    pub async fn list_warrants(
        &self,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> GateResult<Vec<Warrant>> {
        let filter = WarrantFilter {
            resource_type: Some(resource_type.to_string()),
            resource_id: resource_id.map(str::to_string),
            ..Default::default()
        };
        self.read(&filter, Consistency::Eventual).await
    }

    /// Filtered read. Not retried: a failed read is surfaced to the caller.
    pub async fn read(
        &self,
        filter: &WarrantFilter,
        consistency: Consistency,
    ) -> GateResult<Vec<Warrant>> {
        with_timeout(
            "warrant read",
            self.timeout,
            self.backend.read(filter, consistency),
        )
        .await
    }

    pub async fn revision(&self) -> GateResult<Revision> {
        with_timeout("revision read", self.timeout, self.backend.revision()).await
    }
}
