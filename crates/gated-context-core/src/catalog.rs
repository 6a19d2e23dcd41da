//! Display metadata for documents.
//!
//! Names and titles belong to the ingestion pipeline, not to the
//! authorization model; the retrieval service only reads them to annotate
//! results it has already filtered.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use crate::error::{GateError, GateResult};

#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    /// Display names for the given ids. Ids without a record are omitted.
    async fn display_names(&self, ids: &BTreeSet<String>) -> GateResult<BTreeMap<String, String>>;
}

/// Map-backed catalog for tests and embedded use.
#[derive(Default)]
pub struct InMemoryCatalog {
    names: RwLock<BTreeMap<String, String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, name: impl Into<String>) {
        if let Ok(mut names) = self.names.write() {
            names.insert(id.into(), name.into());
        }
    }
}

#[async_trait]
impl DocumentCatalog for InMemoryCatalog {
    async fn display_names(&self, ids: &BTreeSet<String>) -> GateResult<BTreeMap<String, String>> {
        let names = self
            .names
            .read()
            .map_err(|_| GateError::IndexUnavailable("catalog lock poisoned".to_string()))?;
        Ok(ids
            .iter()
            .filter_map(|id| names.get(id).map(|n| (id.clone(), n.clone())))
            .collect())
    }
}
