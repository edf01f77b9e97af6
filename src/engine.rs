//! Grounded Q&A and tender briefs over one indexed document.
//!
//! Both operations require the document to be `READY` and only ever read
//! that document's chunks.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use tender_index_core::embedding::{Completer, Embedder};
use tender_index_core::models::{DocStatus, Document};
use tender_index_core::resolver::ResolvedDocument;
use tender_index_core::retrieval::{
    ask_prompt, brief_prompt, finish_answer, parse_brief, rank_chunks, AskAnswer, Brief,
    BriefLength, RetrievalParams,
};
use tender_index_core::store::DocumentStore;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No row yet, or the row has not reached `READY`.
    #[error("document is not indexed (status: {})", .0.map(|s| s.as_str()).unwrap_or("NONE"))]
    NotIndexed(Option<DocStatus>),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotIndexed(_) => "not_indexed",
            EngineError::BadRequest(_) => "bad_request",
            EngineError::Internal(_) => "internal",
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    docs: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    params: RetrievalParams,
}

impl Engine {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            docs,
            embedder,
            completer,
            params,
        }
    }

    /// The document row behind `resolved`, if it belongs to the resolved
    /// org and is `READY`. Callers check this before metering a request.
    pub async fn require_ready(
        &self,
        resolved: &ResolvedDocument,
    ) -> Result<Document, EngineError> {
        let doc = self.docs.get_document(&resolved.doc_hash).await?;
        match doc {
            Some(d) if d.org_id != resolved.org_id => Err(EngineError::NotIndexed(None)),
            Some(d) if d.status == DocStatus::Ready => Ok(d),
            Some(d) => Err(EngineError::NotIndexed(Some(d.status))),
            None => Err(EngineError::NotIndexed(None)),
        }
    }

    /// Answer `question` from the document's own text, or the not-found
    /// sentinel when nothing in it is relevant.
    pub async fn ask(
        &self,
        resolved: &ResolvedDocument,
        question: &str,
    ) -> Result<AskAnswer, EngineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(EngineError::BadRequest(
                "question must not be empty".to_string(),
            ));
        }
        let doc = self.require_ready(resolved).await?;

        let query_vec = self
            .embedder
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))?;

        let candidates = self.docs.chunk_vectors(&doc.doc_hash).await?;
        let hits = rank_chunks(&query_vec, candidates, &self.params);
        if hits.is_empty() {
            debug!(doc_hash = %doc.doc_hash, "no chunk above relevance threshold");
            return Ok(AskAnswer::not_found());
        }

        let prompt = ask_prompt(&doc.file_name, question, &hits);
        let reply = self.completer.complete(&prompt).await?;
        Ok(finish_answer(
            &doc.file_name,
            &reply,
            &hits,
            self.params.snippet_chars,
        ))
    }

    /// Structured brief, served from cache when one exists for `length`.
    pub async fn brief(
        &self,
        resolved: &ResolvedDocument,
        length: BriefLength,
    ) -> Result<Brief, EngineError> {
        let doc = self.require_ready(resolved).await?;
        if let Some(cached) = self.docs.get_brief(&doc.doc_hash, length).await? {
            return Ok(cached);
        }
        Ok(build_brief(self.docs.as_ref(), self.completer.as_ref(), &doc, length).await?)
    }
}

/// Generate and cache the brief for `doc` from its leading chunks.
/// Shared by [`Engine::brief`] and the pipeline's summary stage.
pub async fn build_brief(
    docs: &dyn DocumentStore,
    completer: &dyn Completer,
    doc: &Document,
    length: BriefLength,
) -> Result<Brief> {
    let chunks = docs.chunks(&doc.doc_hash, length.chunk_budget()).await?;
    if chunks.is_empty() {
        return Err(anyhow!("document {} has no chunks", doc.doc_hash));
    }
    let prompt = brief_prompt(&doc.file_name, &chunks, length);
    let reply = completer.complete(&prompt).await?;
    let brief = parse_brief(&reply, length)?;
    docs.put_brief(&doc.doc_hash, length, &brief).await?;
    info!(doc_hash = %doc.doc_hash, length = length.as_str(), "brief generated");
    Ok(brief)
}
