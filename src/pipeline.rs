//! Per-document indexing pipeline.
//!
//! [`Pipeline::ensure_index`] creates the document row if absent and, only
//! when this call created it, spawns one background run through
//! Extract → Chunk → Embed → (Summary). Each stage starts with a
//! compare-and-set status transition; losing a CAS means another run owns
//! the row and this one stops without writing. Any stage error moves the
//! row to `FAILED` with the error text.
//!
//! Runs are bounded by a semaphore of `pipeline.max_concurrent_jobs`
//! permits. Request handlers never wait on a run.

use anyhow::{anyhow, bail, Context, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tender_index_core::chunk::{chunk_pages, is_blank};
use tender_index_core::embedding::{Completer, Embedder};
use tender_index_core::models::{DocStatus, IndexState, Stage};
use tender_index_core::resolver::{identify, ResolveError, ResolvedDocument, Visibility};
use tender_index_core::retrieval::BriefLength;
use tender_index_core::store::{BlobStorage, DocumentStore, NewDocument, Transition, UploadCatalog};

use crate::config::Config;
use crate::embedding::embed_batched;
use crate::engine::build_brief;
use crate::extract::extract_pages;

/// Knobs for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_tokens: usize,
    pub batch_size: usize,
    pub summary: bool,
    pub max_concurrent_jobs: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_tokens: config.chunking.max_tokens,
            batch_size: config.embedding.batch_size,
            summary: config.pipeline.summary,
            max_concurrent_jobs: config.pipeline.max_concurrent_jobs,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnsureOptions {
    /// Move a `FAILED` document back to `PENDING` and run it again.
    pub restart_failed: bool,
}

struct Inner {
    docs: Arc<dyn DocumentStore>,
    uploads: Arc<dyn UploadCatalog>,
    blobs: Arc<dyn BlobStorage>,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    settings: PipelineSettings,
    jobs: Arc<Semaphore>,
    running: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl Pipeline {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        uploads: Arc<dyn UploadCatalog>,
        blobs: Arc<dyn BlobStorage>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        settings: PipelineSettings,
    ) -> Self {
        let jobs = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(Inner {
                docs,
                uploads,
                blobs,
                embedder,
                completer,
                settings,
                jobs,
                running: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Idempotently ensure a document exists and is (being) indexed.
    pub async fn ensure_index(
        &self,
        doc: &ResolvedDocument,
        options: EnsureOptions,
    ) -> Result<IndexState> {
        if doc.visibility != Visibility::Member {
            bail!("ensure_index requires member access to {}", doc.doc_hash);
        }
        let (row, created) = self
            .inner
            .docs
            .insert_if_absent(&NewDocument {
                doc_hash: doc.doc_hash.clone(),
                org_id: doc.org_id.clone(),
                tender_id: doc.tender_id.clone(),
                upload_id: doc.upload_id.clone(),
                file_name: doc.file_name.clone(),
            })
            .await?;

        if created {
            info!(doc_hash = %row.doc_hash, upload_id = %row.upload_id, "document created, queued");
            self.spawn(row.doc_hash.clone(), row.upload_id.clone());
            let mut state = row.state();
            state.created = true;
            return Ok(state);
        }

        if options.restart_failed
            && row.status == DocStatus::Failed
            && self.inner.docs.restart_failed(&row.doc_hash).await?
        {
            info!(doc_hash = %row.doc_hash, "restarting failed document");
            let fresh = self
                .inner
                .docs
                .get_document(&row.doc_hash)
                .await?
                .ok_or_else(|| anyhow!("document {} missing after restart", row.doc_hash))?;
            self.spawn(row.doc_hash.clone(), row.upload_id.clone());
            return Ok(fresh.state());
        }

        Ok(row.state())
    }

    /// Hook for the transport layer once an upload's bytes have landed.
    /// Anonymous and non-indexable uploads are skipped (`Ok(None)`).
    pub async fn trigger_ingestion(&self, upload_id: &str) -> Result<Option<IndexState>> {
        let upload = self
            .inner
            .uploads
            .upload(upload_id)
            .await?
            .ok_or_else(|| anyhow!("upload not found: {}", upload_id))?;

        if upload.org_id.is_none() {
            info!(upload_id, "upload has no organization, skipping ingestion");
            return Ok(None);
        }
        match identify(&upload, Visibility::Member) {
            Ok(resolved) => Ok(Some(
                self.ensure_index(&resolved, EnsureOptions::default()).await?,
            )),
            Err(ResolveError::UnsupportedFileType(ct)) => {
                info!(upload_id, content_type = %ct, "unsupported file type, skipping ingestion");
                Ok(None)
            }
            Err(e) => Err(anyhow!(e)),
        }
    }

    /// Wait for every run spawned so far. Used by the CLI, which would
    /// otherwise exit with runs still in flight.
    pub async fn drain(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = match self.inner.running.lock() {
                Ok(mut running) => running.drain(..).collect(),
                Err(_) => return,
            };
            if handles.is_empty() {
                return;
            }
            for h in handles {
                if let Err(e) = h.await {
                    error!(error = %e, "pipeline task panicked");
                }
            }
        }
    }

    fn spawn(&self, doc_hash: String, upload_id: String) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let Ok(_permit) = inner.jobs.clone().acquire_owned().await else {
                return;
            };
            inner.run(&doc_hash, &upload_id).await;
        });
        if let Ok(mut running) = self.inner.running.lock() {
            running.retain(|h| !h.is_finished());
            running.push(handle);
        }
    }
}

/// Tracks the status the row is at, for CAS and for failure reporting.
struct Cursor {
    status: DocStatus,
    stage: Stage,
}

impl Inner {
    async fn run(&self, doc_hash: &str, upload_id: &str) {
        let mut at = Cursor {
            status: DocStatus::Pending,
            stage: Stage::Queued,
        };
        match self.stages(doc_hash, upload_id, &mut at).await {
            Ok(true) => info!(doc_hash, "document ready"),
            Ok(false) => info!(doc_hash, status = %at.status, "run superseded, stopping"),
            Err(e) => {
                let reason = e.to_string();
                error!(
                    doc_hash,
                    stage = %at.stage,
                    error = %format!("{:#}", e),
                    "pipeline stage failed"
                );
                let failed = Transition {
                    from: at.status,
                    to: DocStatus::Failed,
                    stage: at.stage,
                    error: Some(&reason),
                };
                match self.docs.transition(doc_hash, failed).await {
                    Ok(true) => {}
                    Ok(false) => warn!(doc_hash, "could not mark failed; row moved on"),
                    Err(e) => error!(doc_hash, error = %e, "could not record failure"),
                }
            }
        }
    }

    /// Advance `at` to `(to, stage)`. `Ok(false)` when the CAS is lost.
    async fn advance(
        &self,
        doc_hash: &str,
        at: &mut Cursor,
        to: DocStatus,
        stage: Stage,
    ) -> Result<bool> {
        let moved = self
            .docs
            .transition(
                doc_hash,
                Transition {
                    from: at.status,
                    to,
                    stage,
                    error: None,
                },
            )
            .await?;
        if moved {
            at.status = to;
            at.stage = stage;
        }
        Ok(moved)
    }

    /// Returns `Ok(true)` when the document reached `READY`.
    async fn stages(&self, doc_hash: &str, upload_id: &str, at: &mut Cursor) -> Result<bool> {
        // Extract
        if !self.advance(doc_hash, at, DocStatus::Extracting, Stage::Extract).await? {
            return Ok(false);
        }
        let upload = self
            .uploads
            .upload(upload_id)
            .await?
            .ok_or_else(|| anyhow!("upload not found: {}", upload_id))?;
        let bytes = self
            .blobs
            .get(&upload.storage_key)
            .await
            .context("failed to fetch file bytes")?;
        let content_type = upload.content_type.clone();
        let pages = tokio::task::spawn_blocking(move || extract_pages(&bytes, &content_type))
            .await
            .map_err(|e| anyhow!("extract task failed: {}", e))??;
        if is_blank(&pages) {
            bail!("no extractable text");
        }
        self.docs.set_page_count(doc_hash, pages.len() as i64).await?;

        // Chunk
        if !self.advance(doc_hash, at, DocStatus::Chunking, Stage::Chunk).await? {
            return Ok(false);
        }
        let chunks = chunk_pages(doc_hash, &pages, self.settings.max_tokens);
        if chunks.is_empty() {
            bail!("no extractable text");
        }
        self.docs.replace_chunks(doc_hash, &chunks).await?;
        info!(doc_hash, chunks = chunks.len(), pages = pages.len(), "chunked");

        // Embed
        if !self.advance(doc_hash, at, DocStatus::Embedding, Stage::Embed).await? {
            return Ok(false);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors =
            embed_batched(self.embedder.as_ref(), &texts, self.settings.batch_size).await?;
        if vectors.len() != chunks.len() {
            bail!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        let pairs: Vec<(String, Vec<f32>)> = chunks
            .iter()
            .map(|c| c.id.clone())
            .zip(vectors)
            .collect();
        self.docs.store_vectors(doc_hash, &pairs).await?;
        info!(doc_hash, model = self.embedder.model_name(), "embedded");

        // Summary
        if self.settings.summary {
            if !self.advance(doc_hash, at, DocStatus::Embedding, Stage::Summary).await? {
                return Ok(false);
            }
            let doc = self
                .docs
                .get_document(doc_hash)
                .await?
                .ok_or_else(|| anyhow!("document {} disappeared", doc_hash))?;
            build_brief(
                self.docs.as_ref(),
                self.completer.as_ref(),
                &doc,
                BriefLength::Medium,
            )
            .await
            .context("summary")?;
        }

        self.advance(doc_hash, at, DocStatus::Ready, Stage::Done).await
    }
}
