//! Storage abstraction.
//!
//! The pipeline, the engine and the gate only talk to storage through
//! these traits. The application crate implements them on SQLite;
//! [`memory::InMemoryStore`] implements them in-process for tests.
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`DocumentStore`] | documents, chunks, vectors, event log, cached briefs |
//! | [`UploadCatalog`] | upload records owned by the transport layer |
//! | [`OrgDirectory`] | org tier and trial window |
//! | [`UsageLedger`] | atomic, ceiling-enforcing usage counters |
//! | [`AuditSink`] | gate decision log |
//! | [`BlobStorage`] | raw file bytes |
//!
//! Implementations must make [`DocumentStore::insert_if_absent`],
//! [`DocumentStore::transition`] and [`UsageLedger::apply`] atomic with
//! respect to concurrent callers.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::gate::{AuditEvent, LedgerAction};
use crate::models::{
    Chunk, ChunkVector, DocStatus, Document, DocumentEvent, OrgAccount, Stage, UploadRecord,
    UsageSnapshot,
};
use crate::retrieval::{Brief, BriefLength};

/// Fields needed to create a document row.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub doc_hash: String,
    pub org_id: String,
    pub tender_id: String,
    pub upload_id: String,
    pub file_name: String,
}

/// A status change, applied only if the row is currently at `from`.
#[derive(Debug, Clone)]
pub struct Transition<'a> {
    pub from: DocStatus,
    pub to: DocStatus,
    pub stage: Stage,
    pub error: Option<&'a str>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a `PENDING` document unless one already exists for the
    /// hash. Returns the row and whether this call created it.
    async fn insert_if_absent(&self, doc: &NewDocument) -> Result<(Document, bool)>;

    async fn get_document(&self, doc_hash: &str) -> Result<Option<Document>>;

    /// Compare-and-set status change. Returns `false` when the row is not
    /// at `t.from`; nothing is written in that case. A successful change
    /// appends to the event log in the same atomic step.
    async fn transition(&self, doc_hash: &str, t: Transition<'_>) -> Result<bool>;

    /// Move a `FAILED` document back to `PENDING`, discarding its chunks,
    /// vectors and cached briefs. Returns `false` if it was not `FAILED`.
    async fn restart_failed(&self, doc_hash: &str) -> Result<bool>;

    async fn set_page_count(&self, doc_hash: &str, pages: i64) -> Result<()>;

    /// Replace the document's chunk set.
    async fn replace_chunks(&self, doc_hash: &str, chunks: &[Chunk]) -> Result<()>;

    /// Store vectors for chunks of this document, `(chunk_id, vector)`.
    async fn store_vectors(&self, doc_hash: &str, vectors: &[(String, Vec<f32>)]) -> Result<()>;

    /// Chunks of one document in index order, at most `limit`.
    async fn chunks(&self, doc_hash: &str, limit: usize) -> Result<Vec<Chunk>>;

    /// All embedded chunks of one document.
    async fn chunk_vectors(&self, doc_hash: &str) -> Result<Vec<ChunkVector>>;

    /// Transition log in order.
    async fn events(&self, doc_hash: &str) -> Result<Vec<DocumentEvent>>;

    /// Documents of one org's tender.
    async fn tender_documents(&self, org_id: &str, tender_id: &str) -> Result<Vec<Document>>;

    async fn get_brief(&self, doc_hash: &str, length: BriefLength) -> Result<Option<Brief>>;

    async fn put_brief(&self, doc_hash: &str, length: BriefLength, brief: &Brief) -> Result<()>;
}

/// Result of a member-scoped upload lookup.
#[derive(Debug, Clone)]
pub enum MemberLookup {
    Found(UploadRecord),
    /// Exists, but belongs to another org.
    Forbidden,
    Missing,
}

#[async_trait]
pub trait UploadCatalog: Send + Sync {
    /// Unscoped lookup by upload id, for the pipeline's own use.
    async fn upload(&self, upload_id: &str) -> Result<Option<UploadRecord>>;

    /// Lookup by upload id or file id within `org_id`.
    async fn member_lookup(&self, org_id: &str, file_ref: &str) -> Result<MemberLookup>;

    /// Lookup by upload id or file id among published uploads only.
    async fn public_lookup(&self, file_ref: &str) -> Result<Option<UploadRecord>>;
}

#[async_trait]
pub trait OrgDirectory: Send + Sync {
    async fn org(&self, org_id: &str) -> Result<Option<OrgAccount>>;
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    /// Apply all `actions` for `org_id` atomically, each only while its
    /// ceiling has headroom. Returns `None` when all applied, or the index
    /// of the first action that could not apply (nothing is applied).
    async fn apply(&self, org_id: &str, actions: &[LedgerAction]) -> Result<Option<usize>>;

    /// Compensate previously applied `actions` (decrement, floor 0;
    /// credits are returned).
    async fn release(&self, org_id: &str, actions: &[LedgerAction]) -> Result<()>;

    async fn snapshot(&self, org_id: &str, tender_id: &str, period: &str) -> Result<UsageSnapshot>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Raw byte storage (the external transport's backing store).
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store bytes, returning a handle for [`get`](BlobStorage::get).
    async fn put(&self, bytes: &[u8]) -> Result<String>;
    async fn get(&self, handle: &str) -> Result<Vec<u8>>;
}
