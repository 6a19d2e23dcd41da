//! Wiring: builds the core services over the SQLite backends.
//!
//! [`App`] is what every CLI command and the HTTP server work against. It
//! holds one connection pool shared by the warrant backend and the vector
//! index, so a process never opens the database twice.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use gated_context_core::catalog::DocumentCatalog;
use gated_context_core::embedding::EmbeddingProvider;
use gated_context_core::evaluator::Evaluator;
use gated_context_core::index::VectorIndexAdapter;
use gated_context_core::retrieval::RetrievalService;
use gated_context_core::store::RelationStore;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::migrate;
use crate::sqlite_index::SqliteVectorIndex;
use crate::sqlite_warrants::SqliteWarrantBackend;

#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub index: Arc<SqliteVectorIndex>,
    pub adapter: VectorIndexAdapter,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub service: RetrievalService,
}

impl App {
    /// Connect, bring the schema up to date, and build the services.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        Self::open_with_embedder(config, embedder).await
    }

    pub async fn open_with_embedder(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;

        let store = RelationStore::new(
            Arc::new(SqliteWarrantBackend::new(pool.clone())),
            Arc::new(config.authz.schema()),
        )
        .with_retry(config.authz.retry_policy())
        .with_timeout(config.authz.timeout());

        let index = Arc::new(SqliteVectorIndex::new(pool.clone()));
        let adapter =
            VectorIndexAdapter::new(index.clone()).with_timeout(config.retrieval.timeout());
        let catalog: Arc<dyn DocumentCatalog> = index.clone();

        let service = RetrievalService::new(
            Evaluator::new(store),
            adapter.clone(),
            embedder.clone(),
            catalog,
        )
        .with_settings(config.retrieval_settings());

        Ok(Self {
            config: Arc::new(config.clone()),
            pool,
            index,
            adapter,
            embedder,
            service,
        })
    }

    pub fn evaluator(&self) -> &Evaluator {
        self.service.evaluator()
    }

    pub fn store(&self) -> &RelationStore {
        self.service.evaluator().store()
    }
}
