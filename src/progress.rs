//! Index progress: the read-only projection pollers see.
//!
//! Every read goes straight to the document row or its event log; nothing
//! here holds state between calls, so an abandoned poller costs nothing
//! and never affects the pipeline run it was watching.
//!
//! `tdx progress --watch` drives [`watch`], which re-reads the row on a
//! fixed interval and hands each newly observed state to a
//! [`ProgressReporter`]. Reports go to **stderr** so stdout stays
//! parseable for scripts.

use anyhow::{bail, Result};
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

use tender_index_core::models::{
    summarize_tender, AccessLevel, DocStatus, DocumentEvent, Progress, Stage, TenderIngestion,
};
use tender_index_core::store::DocumentStore;

/// Current state of one document, or `None` when it does not exist or is
/// not visible to `access`.
pub async fn progress(
    docs: &dyn DocumentStore,
    access: &AccessLevel,
    doc_hash: &str,
) -> Result<Option<Progress>> {
    Ok(docs
        .get_document(doc_hash)
        .await?
        .filter(|d| d.readable_by(access))
        .map(|d| Progress::from(&d)))
}

/// Transition log of one document, with the same visibility rule as
/// [`progress`].
pub async fn history(
    docs: &dyn DocumentStore,
    access: &AccessLevel,
    doc_hash: &str,
) -> Result<Option<Vec<DocumentEvent>>> {
    match docs.get_document(doc_hash).await? {
        Some(d) if d.readable_by(access) => Ok(Some(docs.events(doc_hash).await?)),
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentState {
    pub doc_hash: String,
    pub file_name: String,
    pub status: DocStatus,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenderSummary {
    pub tender_id: String,
    pub status: TenderIngestion,
    pub documents: Vec<DocumentState>,
}

/// Derived ingestion state of one org's tender plus its documents.
pub async fn tender_summary(
    docs: &dyn DocumentStore,
    org_id: &str,
    tender_id: &str,
) -> Result<TenderSummary> {
    let rows = docs.tender_documents(org_id, tender_id).await?;
    let statuses: Vec<DocStatus> = rows.iter().map(|d| d.status).collect();
    Ok(TenderSummary {
        tender_id: tender_id.to_string(),
        status: summarize_tender(&statuses),
        documents: rows
            .into_iter()
            .map(|d| DocumentState {
                doc_hash: d.doc_hash,
                file_name: d.file_name,
                status: d.status,
                stage: d.stage,
                error: d.error,
            })
            .collect(),
    })
}

/// Receives each newly observed state during a watch.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, doc_hash: &str, progress: &Progress);
}

/// Human-friendly lines: `index 3f9a1c2b  EMBEDDING  embed`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, doc_hash: &str, progress: &Progress) {
        let mut line = format!(
            "index {}  {}  {}",
            short_hash(doc_hash),
            progress.status,
            progress.stage
        );
        if let Some(err) = &progress.error {
            line.push_str(&format!("  error: {}", err));
        }
        line.push('\n');
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, doc_hash: &str, progress: &Progress) {
        let obj = serde_json::json!({
            "event": "progress",
            "doc_hash": doc_hash,
            "status": progress.status,
            "stage": progress.stage,
            "error": progress.error,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _doc_hash: &str, _progress: &Progress) {}
}

fn short_hash(doc_hash: &str) -> &str {
    doc_hash.get(..8).unwrap_or(doc_hash)
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Poll until the document reaches a terminal state, reporting each state
/// that differs from the last one seen. Returns the terminal state.
pub async fn watch(
    docs: &dyn DocumentStore,
    access: &AccessLevel,
    doc_hash: &str,
    interval: Duration,
    reporter: &dyn ProgressReporter,
) -> Result<Progress> {
    let mut last: Option<(DocStatus, Stage)> = None;
    loop {
        let Some(current) = progress(docs, access, doc_hash).await? else {
            bail!("document not found: {}", doc_hash);
        };
        if last != Some((current.status, current.stage)) {
            reporter.report(doc_hash, &current);
            last = Some((current.status, current.stage));
        }
        if current.status.is_terminal() {
            return Ok(current);
        }
        tokio::time::sleep(interval).await;
    }
}
