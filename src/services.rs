//! The assembled application: one store, one pipeline, one engine, one
//! gate, shared by the CLI commands and the HTTP server.

use anyhow::Result;
use std::sync::Arc;

use tender_index_core::embedding::{Completer, Embedder};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::engine::Engine;
use crate::gate::Gate;
use crate::llm::create_completer;
use crate::migrate::run_migrations;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::sqlite_store::SqliteStore;
use crate::storage::FsBlobStorage;

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub blobs: Arc<FsBlobStorage>,
    pub pipeline: Pipeline,
    pub engine: Engine,
    pub gate: Gate,
}

impl Services {
    /// Connect, migrate, and build the configured providers.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let completer = create_completer(&config.completion)?;
        Self::open_with(config, embedder, completer).await
    }

    /// Like [`open`](Self::open) with caller-supplied model providers.
    pub async fn open_with(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
    ) -> Result<Self> {
        let pool = db::connect(config).await?;
        run_migrations(&pool).await?;

        let store = Arc::new(SqliteStore::new(pool));
        let blobs = Arc::new(FsBlobStorage::new(config.storage.root.clone()));
        let pipeline = Pipeline::new(
            store.clone(),
            store.clone(),
            blobs.clone(),
            embedder.clone(),
            completer.clone(),
            PipelineSettings::from_config(config),
        );
        let engine = Engine::new(
            store.clone(),
            embedder,
            completer,
            config.retrieval.params(),
        );
        let gate = Gate::new(
            store.clone(),
            store.clone(),
            store.clone(),
            config.plan_matrix()?,
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            blobs,
            pipeline,
            engine,
            gate,
        })
    }
}
