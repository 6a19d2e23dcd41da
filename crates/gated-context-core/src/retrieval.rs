//! Access-filtered retrieval.
//!
//! Each request moves through a fixed sequence of stages:
//!
//! ```text
//! Start ──▶ ResolveAccess ──┬──▶ NoAccess ──────────────▶ Done
//!                           └──▶ Search (embed + index) ─▶ Done
//! ```
//!
//! 1. **ResolveAccess**: `list_accessible(subject, viewer, document)`.
//! 2. **NoAccess**: an empty set ends the request with
//!    [`RetrievalOutcome::NoAccessibleDocuments`]; the index is never queried.
//! 3. **Search**: embed the query, then search with the resolved allow-list
//!    as a pushed-down filter.
//! 4. **Done**: annotate hits with display names.
//!
//! The allow-list resolved in step 1 is the only one used for the rest of
//! the request, so a grant or revoke landing mid-request cannot widen what
//! this request returns. The service holds no per-request mutable state and
//! can serve many subjects concurrently.
//!
//! The relation store may be eventually consistent: a request issued right
//! after a grant can still resolve an empty set. Callers that need to see a
//! specific write pass [`Consistency::AtLeast`] with the revision the write
//! returned.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::DocumentCatalog;
use crate::embedding::EmbeddingProvider;
use crate::error::{GateError, GateResult};
use crate::evaluator::Evaluator;
use crate::index::VectorIndexAdapter;
use crate::models::{Consistency, ResourceRef, Revision, Subject, Warrant, WarrantFilter, WriteOp};
use crate::timing::with_timeout;

/// Names of the resource type and relations the service works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalSettings {
    pub resource_type: String,
    pub viewer_relation: String,
    pub owner_relation: String,
    pub embed_timeout: Duration,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            resource_type: "document".to_string(),
            viewer_relation: "viewer".to_string(),
            owner_relation: "owner".to_string(),
            embed_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub subject: Subject,
    pub query: String,
    pub top_k: usize,
    pub consistency: Consistency,
}

impl RetrievalRequest {
    pub fn new(subject: Subject, query: impl Into<String>, top_k: usize) -> Self {
        Self {
            subject,
            query: query.into(),
            top_k,
            consistency: Consistency::Eventual,
        }
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStage {
    Start,
    ResolveAccess,
    NoAccess,
    Search,
    Done,
}

/// A search hit annotated with its document's display name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub score: f64,
    pub document_id: String,
    pub document_name: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    /// The subject can view no documents. A defined terminal state, not an error.
    NoAccessibleDocuments,
    /// Ranked hits, highest score first. May be empty.
    Results(Vec<RetrievedChunk>),
}

impl RetrievalOutcome {
    pub fn results(&self) -> &[RetrievedChunk] {
        match self {
            RetrievalOutcome::NoAccessibleDocuments => &[],
            RetrievalOutcome::Results(r) => r,
        }
    }

    pub fn is_no_access(&self) -> bool {
        matches!(self, RetrievalOutcome::NoAccessibleDocuments)
    }
}

/// Orchestrates evaluator, embedding provider, and vector index.
#[derive(Clone)]
pub struct RetrievalService {
    evaluator: Evaluator,
    index: VectorIndexAdapter,
    embedder: Arc<dyn EmbeddingProvider>,
    catalog: Arc<dyn DocumentCatalog>,
    settings: RetrievalSettings,
}

impl RetrievalService {
    pub fn new(
        evaluator: Evaluator,
        index: VectorIndexAdapter,
        embedder: Arc<dyn EmbeddingProvider>,
        catalog: Arc<dyn DocumentCatalog>,
    ) -> Self {
        Self {
            evaluator,
            index,
            embedder,
            catalog,
            settings: RetrievalSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RetrievalSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Run a request through every stage.
    pub async fn retrieve(&self, req: &RetrievalRequest) -> GateResult<RetrievalOutcome> {
        trace_stage(RetrievalStage::Start, req);
        validate_request(req)?;

        trace_stage(RetrievalStage::ResolveAccess, req);
        let allowed = self.resolve_access(req).await?;

        if allowed.is_empty() {
            trace_stage(RetrievalStage::NoAccess, req);
            return Ok(RetrievalOutcome::NoAccessibleDocuments);
        }

        trace_stage(RetrievalStage::Search, req);
        let results = self.search_allowed(req, &allowed).await?;

        trace_stage(RetrievalStage::Done, req);
        Ok(RetrievalOutcome::Results(results))
    }

    /// ResolveAccess: documents the subject may view.
    pub async fn resolve_access(&self, req: &RetrievalRequest) -> GateResult<BTreeSet<String>> {
        self.evaluator
            .list_accessible_with(
                &req.subject,
                &self.settings.viewer_relation,
                &self.settings.resource_type,
                req.consistency,
            )
            .await
    }

    /// Search: embed the query and search within `allowed`.
    ///
    /// An empty `allowed` yields no results without contacting the index.
    pub async fn search_allowed(
        &self,
        req: &RetrievalRequest,
        allowed: &BTreeSet<String>,
    ) -> GateResult<Vec<RetrievedChunk>> {
        validate_request(req)?;
        if allowed.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = with_timeout(
            "query embedding",
            self.settings.embed_timeout,
            self.embedder.embed_query(&req.query),
        )
        .await?;

        let hits = self.index.search(&query_vec, allowed, req.top_k).await?;

        let (hits, leaked): (Vec<_>, Vec<_>) = hits
            .into_iter()
            .partition(|h| allowed.contains(&h.document_id));
        for h in &leaked {
            tracing::error!(
                chunk_id = %h.chunk_id,
                document_id = %h.document_id,
                "index returned chunk outside allow-list; dropped"
            );
        }

        let doc_ids: BTreeSet<String> = hits.iter().map(|h| h.document_id.clone()).collect();
        let names = if doc_ids.is_empty() {
            Default::default()
        } else {
            self.catalog.display_names(&doc_ids).await?
        };

        Ok(hits
            .into_iter()
            .map(|h| RetrievedChunk {
                document_name: names.get(&h.document_id).cloned(),
                chunk_id: h.chunk_id,
                score: h.score,
                document_id: h.document_id,
                text: h.text,
            })
            .collect())
    }

    /// Grant `grantee` the viewer relation on every listed resource, provided
    /// `owner` holds the owner relation on all of them.
    ///
    /// All-or-nothing: the first resource `owner` does not own rejects the
    /// whole batch with `NotAuthorized` before anything is written. If a
    /// write fails part-way, warrants created by this call are removed again
    /// and the write error is returned. Returns the revision of the last write.
    ///
    /// Reads are eventually consistent; see [`share_with`](Self::share_with).
    pub async fn share(
        &self,
        owner: &Subject,
        grantee: &Subject,
        resource_ids: &[String],
    ) -> GateResult<Revision> {
        self.share_with(owner, grantee, resource_ids, Consistency::Eventual)
            .await
    }

    /// [`share`](Self::share) with the owner checks and the read of the
    /// grantee's existing warrants made at `consistency`.
    ///
    /// Pass the revision returned by the write that granted ownership (for
    /// example ingestion) so a lagging replica cannot reject the share.
    pub async fn share_with(
        &self,
        owner: &Subject,
        grantee: &Subject,
        resource_ids: &[String],
        consistency: Consistency,
    ) -> GateResult<Revision> {
        if resource_ids.is_empty() {
            return Err(GateError::InvalidRequest(
                "share needs at least one resource".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        let resources: Vec<ResourceRef> = resource_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| ResourceRef::new(&self.settings.resource_type, id.as_str()))
            .collect();

        for resource in &resources {
            let owns = self
                .evaluator
                .check_with(owner, &self.settings.owner_relation, resource, consistency)
                .await?;
            if !owns {
                tracing::info!(%owner, %resource, "share rejected: not owner");
                return Err(GateError::not_authorized(owner, resource));
            }
        }

        let store = self.evaluator.store();
        let existing: BTreeSet<String> = store
            .read(
                &WarrantFilter {
                    resource_type: Some(self.settings.resource_type.clone()),
                    relation: Some(self.settings.viewer_relation.clone()),
                    subject: Some(grantee.clone()),
                    ..Default::default()
                },
                consistency,
            )
            .await?
            .into_iter()
            .map(|w| w.resource.resource_id)
            .collect();

        let mut created: Vec<Warrant> = Vec::new();
        let mut revision = store.revision().await?;
        for resource in resources {
            let warrant = Warrant::new(resource, &self.settings.viewer_relation, grantee.clone());
            match store.write(&warrant, WriteOp::Create).await {
                Ok(rev) => {
                    revision = rev;
                    if !existing.contains(&warrant.resource.resource_id) {
                        created.push(warrant);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, undo = created.len(), "share failed part-way; undoing");
                    for w in created.iter().rev() {
                        if let Err(undo_err) = store.write(w, WriteOp::Delete).await {
                            tracing::error!(warrant = %w, error = %undo_err, "share undo failed");
                        }
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(%owner, %grantee, count = resource_ids.len(), revision = revision.0, "shared");
        Ok(revision)
    }
}

fn validate_request(req: &RetrievalRequest) -> GateResult<()> {
    if req.top_k == 0 {
        return Err(GateError::InvalidRequest(
            "top_k must be a positive integer".to_string(),
        ));
    }
    if req.query.trim().is_empty() {
        return Err(GateError::InvalidRequest(
            "query must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn trace_stage(stage: RetrievalStage, req: &RetrievalRequest) {
    tracing::debug!(stage = ?stage, subject = %req.subject, "retrieval");
}
